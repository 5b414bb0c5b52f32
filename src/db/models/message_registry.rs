use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Telegram message id. `0` is never a valid id and is read as "no message".
pub type MessageId = i32;

/// A registered project message.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProjectMessage {
    pub project_id: String,
    pub message_id: i64,
    pub updated_at: NaiveDateTime,
}

/// The two messages that exist once per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingletonSlot {
    /// Digest of all projects that currently need votes.
    Overview,
    /// Pillar participation table.
    Rates,
}

impl SingletonSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            SingletonSlot::Overview => "overview",
            SingletonSlot::Rates => "rates",
        }
    }
}

/// Difference between registered project messages and the backend's current set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectsDiff {
    /// Current projects that have no message yet, in input order.
    pub new: Vec<String>,
    /// Registered projects that are no longer current, sorted.
    pub removed: Vec<String>,
}

impl ProjectsDiff {
    pub fn compute<S: AsRef<str>>(registered: &HashMap<String, MessageId>, current: &[S]) -> Self {
        let current_set: HashSet<&str> = current.iter().map(|id| id.as_ref()).collect();

        let new = current
            .iter()
            .map(|id| id.as_ref())
            .filter(|id| registered.get(*id).copied().unwrap_or(0) == 0)
            .map(str::to_string)
            .collect();

        let mut removed: Vec<String> = registered
            .keys()
            .filter(|id| !current_set.contains(id.as_str()))
            .cloned()
            .collect();
        removed.sort();

        ProjectsDiff { new, removed }
    }
}

/// On-disk state file written by earlier deployments of the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyState {
    #[serde(rename = "message-ids", default)]
    pub message_ids: LegacyMessageIds,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyMessageIds {
    #[serde(default)]
    pub overview: MessageId,
    #[serde(default)]
    pub rates: MessageId,
    #[serde(default)]
    pub projects: HashMap<String, MessageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_new_and_removed() {
        let registered = HashMap::from([("A".to_string(), 1), ("B".to_string(), 2)]);
        let diff = ProjectsDiff::compute(&registered, &["B", "C"]);
        assert_eq!(diff.new, vec!["C".to_string()]);
        assert_eq!(diff.removed, vec!["A".to_string()]);
    }

    #[test]
    fn zero_message_id_counts_as_unregistered() {
        let registered = HashMap::from([("A".to_string(), 0)]);
        let diff = ProjectsDiff::compute(&registered, &["A"]);
        assert_eq!(diff.new, vec!["A".to_string()]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn legacy_state_parses_state_file_layout() {
        let raw = r#"{"message-ids": {"overview": 12, "rates": 0, "projects": {"p1": 40}}}"#;
        let state: LegacyState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.message_ids.overview, 12);
        assert_eq!(state.message_ids.rates, 0);
        assert_eq!(state.message_ids.projects.get("p1"), Some(&40));
    }
}
