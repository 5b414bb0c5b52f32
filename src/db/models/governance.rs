use serde::{Deserialize, Serialize};

/// Project status codes as published by the governance backend.
pub const PROJECT_STATUS_VOTING: u8 = 0;
pub const PROJECT_STATUS_ACCEPTED: u8 = 1;
pub const PROJECT_STATUS_PAID: u8 = 2;
pub const PROJECT_STATUS_CLOSED: u8 = 3;
pub const PROJECT_STATUS_COMPLETED: u8 = 4;

/// Phase status codes share the first four values with projects.
pub const PHASE_STATUS_VOTING: u8 = 0;
pub const PHASE_STATUS_ACCEPTED: u8 = 1;
pub const PHASE_STATUS_PAID: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Votes {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    /// Id of the owning project.
    pub pid: String,
    pub created: i64,
    pub name: String,
    pub description: String,
    pub url: String,
    pub znn: u64,
    pub qsr: u64,
    pub status: u8,
    pub votes: Votes,
}

/// Snapshot of a project as returned by the backend's query socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub created: i64,
    pub description: String,
    pub status: u8,
    pub name: String,
    pub owner: String,
    pub url: String,
    pub qsr: u64,
    pub znn: u64,
    pub phases: Vec<Phase>,
    pub votes: Votes,
}

/// Combined project/phase state used to pick the display template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    ProjectNeedsVoting,
    ProjectAccepted,
    ProjectPaid,
    ProjectClosed,
    ProjectCompleted,
    PhaseNeedsVoting,
    PhaseActive,
    PhasePaid,
    PhaseClosed,
}

impl Project {
    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.last()
    }

    pub fn is_accepted(&self) -> bool {
        self.status == PROJECT_STATUS_ACCEPTED
    }

    pub fn current_phase_needs_votes(&self) -> bool {
        self.current_phase()
            .map(|phase| phase.status == PHASE_STATUS_VOTING)
            .unwrap_or(false)
    }

    /// Open projects and accepted projects whose latest phase awaits a vote.
    pub fn needs_votes(&self) -> bool {
        self.status == PROJECT_STATUS_VOTING
            || (self.is_accepted() && self.current_phase_needs_votes())
    }

    /// Paid, closed and completed projects no longer change.
    pub fn has_left_active_state(&self) -> bool {
        self.status > PROJECT_STATUS_ACCEPTED
    }

    pub fn display_status(&self) -> DisplayStatus {
        match self.status {
            PROJECT_STATUS_VOTING => return DisplayStatus::ProjectNeedsVoting,
            PROJECT_STATUS_PAID => return DisplayStatus::ProjectPaid,
            PROJECT_STATUS_CLOSED => return DisplayStatus::ProjectClosed,
            PROJECT_STATUS_COMPLETED => return DisplayStatus::ProjectCompleted,
            _ => {}
        }

        match self.current_phase() {
            None => DisplayStatus::ProjectAccepted,
            Some(phase) => match phase.status {
                PHASE_STATUS_VOTING => DisplayStatus::PhaseNeedsVoting,
                PHASE_STATUS_ACCEPTED => DisplayStatus::PhaseActive,
                PHASE_STATUS_PAID => DisplayStatus::PhasePaid,
                _ => DisplayStatus::PhaseClosed,
            },
        }
    }
}

pub fn project_needs_votes(project: &Project) -> bool {
    project.needs_votes()
}

/// Projects that belong in the overview digest, oldest first.
pub fn projects_needing_votes<'a, I>(projects: I) -> Vec<&'a Project>
where
    I: IntoIterator<Item = &'a Project>,
{
    let mut selected: Vec<&Project> = projects
        .into_iter()
        .filter(|p| project_needs_votes(p))
        .collect();
    selected.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    selected
}

/// Status codes at or above this value mean the entity left the active state.
pub fn status_left_active(status: u8) -> bool {
    status > PROJECT_STATUS_ACCEPTED
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn phase(pid: &str, status: u8) -> Phase {
        Phase {
            id: format!("{pid}-phase"),
            pid: pid.to_string(),
            created: 1_700_000_100,
            name: "Milestone".to_string(),
            description: "First deliverable".to_string(),
            url: "https://example.org/phase".to_string(),
            znn: 500,
            qsr: 5000,
            status,
            votes: Votes {
                yes: 3,
                no: 1,
                abstain: 0,
            },
        }
    }

    pub fn project(id: &str, status: u8, phases: Vec<Phase>) -> Project {
        Project {
            id: id.to_string(),
            created: 1_700_000_000,
            description: "Build the thing".to_string(),
            status,
            name: format!("Project {id}"),
            owner: "z1qowner".to_string(),
            url: "https://example.org/project".to_string(),
            qsr: 10_000,
            znn: 1_000,
            phases,
            votes: Votes {
                yes: 10,
                no: 2,
                abstain: 1,
            },
        }
    }
}
