//! HTML text for every message the relay posts. Telegram's HTML parse mode
//! is used throughout.

use crate::db::{DisplayStatus, Phase, Project, Votes};
use crate::services::events::PillarRate;

pub const OVERVIEW_HEADER: &str = "<b>These projects need voting</b>\n\n";
pub const RATES_HEADER: &str = "<b>Pillar participation rate (>0)</b>\n\
                                for voting on active projects and phases\n\
                                Ongoing | All time\n\n";

const QUORUM_PENDING: &str = "<b>Quorum not reached yet</b>";

pub fn votes(votes: &Votes) -> String {
    format!(
        "<b>Yes</b> {}, <b>No</b> {}, <b>Abstain</b> {}\n",
        votes.yes, votes.no, votes.abstain
    )
}

pub fn funds(znn: u64, qsr: u64) -> String {
    format!("{} ZNN, {} QSR", znn, qsr)
}

/// Human label for a status code reached through an update.
pub fn status_label(status: u8) -> &'static str {
    match status {
        1 => "accepted",
        2 => "paid",
        3 => "closed",
        4 => "completed",
        other => {
            tracing::error!("Invalid status {} requested for status label", other);
            "<code>bot error</code>"
        }
    }
}

fn status_block(project: &Project) -> String {
    let status = project.display_status();
    let phase_count = project.phases.len();

    match (status, project.current_phase()) {
        (DisplayStatus::ProjectNeedsVoting, _) => {
            format!("{}\n{}", votes(&project.votes), QUORUM_PENDING)
        }
        (DisplayStatus::ProjectAccepted, _) => format!("{}\n<b>Accepted</b>", votes(&project.votes)),
        (DisplayStatus::ProjectPaid, _) => "<b>Paid</b>".to_string(),
        (DisplayStatus::ProjectClosed, _) => "<b>Closed</b>".to_string(),
        (DisplayStatus::ProjectCompleted, _) => "<b>Completed</b>".to_string(),
        (DisplayStatus::PhaseNeedsVoting, Some(phase)) => format!(
            "\nPhase {}: {}\n{}\n{}\n{}\n{}",
            phase_count,
            phase.name,
            phase.url,
            funds(phase.znn, phase.qsr),
            votes(&phase.votes),
            QUORUM_PENDING
        ),
        (DisplayStatus::PhasePaid, Some(phase)) => format!(
            "\nPhase {} has been paid {}",
            phase_count,
            funds(phase.znn, phase.qsr)
        ),
        (DisplayStatus::PhaseActive, _) => format!("\nPhase {} has been accepted", phase_count),
        _ => format!("\nPhase {} has been closed", phase_count),
    }
}

/// Full text of a project's own message.
pub fn project_text(project: &Project) -> String {
    format!(
        "<b>{}</b>\nTotal: {}\n{}\n\n{}\n{}\n\n",
        project.name,
        funds(project.znn, project.qsr),
        status_block(project),
        project.url,
        project.description
    )
}

/// Text of the message posted when a project is first seen.
pub fn new_project_text(project: &Project) -> String {
    format!("<b>New proposal</b>\n{}", project_text(project))
}

pub fn phase_text(phase: &Phase) -> String {
    format!(
        "<b>{}</b>\n{}\n{}\n\n{}",
        phase.name,
        phase.description,
        funds(phase.znn, phase.qsr),
        phase.url
    )
}

/// One overview paragraph. Only meaningful for projects still voting or
/// accepted.
pub fn project_summary(project: &Project) -> String {
    match (project.status, project.current_phase()) {
        (1, Some(phase)) => {
            let mut summary = format!(
                "<b>{}</b> <i>Phase {}</i>\n{}",
                project.name,
                project.phases.len(),
                votes(&phase.votes)
            );
            if phase.status >= 2 {
                summary.push_str(&format!("<i>{}</i>", status_label(phase.status)));
            }
            summary
        }
        (1, None) => format!(
            "<b>{}</b>\n{} (<i>Accepted</i>)",
            project.name,
            votes(&project.votes)
        ),
        (0, _) => format!("<b>{}</b>\n{}", project.name, votes(&project.votes)),
        (status, _) => {
            tracing::error!(
                "Unexpected status {} for overview summary of {}",
                status,
                project.id
            );
            String::new()
        }
    }
}

/// Overview digest for the given projects, in the given order.
pub fn overview_text(projects: &[&Project]) -> String {
    let summaries: Vec<String> = projects.iter().map(|p| project_summary(p)).collect();
    format!("{}{}", OVERVIEW_HEADER, summaries.join("\n"))
}

/// Participation table: descending all-time rate, zero rows counted in the
/// footer instead of listed.
pub fn rates_text(rates: &[PillarRate]) -> String {
    let mut sorted: Vec<&PillarRate> = rates.iter().collect();
    sorted.sort_by(|a, b| b.rate.total_cmp(&a.rate));

    let rows: Vec<String> = sorted
        .iter()
        .filter(|p| p.rate > 0.0)
        .map(|p| format!(" <code>{:.2}|{:.2}</code> - {}", p.active_rate, p.rate, p.name))
        .collect();
    let never_voted = sorted.len() - rows.len();

    format!(
        "{}{}\n\n{}/{} never voted",
        RATES_HEADER,
        rows.join("\n"),
        never_voted,
        sorted.len()
    )
}

pub fn project_status_notice(project: &Project, status: u8) -> String {
    format!(
        "<b>{}</b>\nThe project has been {}",
        project.name,
        status_label(status)
    )
}

pub fn phase_status_notice(project: &Project, status: u8) -> String {
    format!(
        "<b>{}</b>\nCurrent phase was {}",
        project.name,
        status_label(status)
    )
}

pub fn new_phase_notice(project: &Project, phase: &Phase) -> String {
    format!(
        "<b>{}</b>\nNew phase is open for voting:\n\n{}",
        project.name,
        phase_text(phase)
    )
}

pub fn phase_reset_notice(project: &Project, phase: &Phase) -> String {
    format!(
        "<b>{}</b>\nCurrent phase was reset:\n\n{}",
        project.name,
        phase_text(phase)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{phase, project};

    #[test]
    fn votes_line() {
        let v = Votes {
            yes: 3,
            no: 1,
            abstain: 2,
        };
        assert_eq!(votes(&v), "<b>Yes</b> 3, <b>No</b> 1, <b>Abstain</b> 2\n");
    }

    #[test]
    fn open_project_text() {
        let p = project("p1", 0, vec![]);
        assert_eq!(
            project_text(&p),
            "<b>Project p1</b>\nTotal: 1000 ZNN, 10000 QSR\n\
             <b>Yes</b> 10, <b>No</b> 2, <b>Abstain</b> 1\n\n\
             <b>Quorum not reached yet</b>\n\n\
             https://example.org/project\nBuild the thing\n\n"
        );
        assert!(new_project_text(&p).starts_with("<b>New proposal</b>\n<b>Project p1</b>"));
    }

    #[test]
    fn phase_in_vote_is_described() {
        let p = project("p1", 1, vec![phase("p1", 2), phase("p1", 0)]);
        let text = project_text(&p);
        assert!(text.contains("\nPhase 2: Milestone\nhttps://example.org/phase\n500 ZNN, 5000 QSR\n"));
        assert!(text.contains("<b>Quorum not reached yet</b>"));
    }

    #[test]
    fn finished_phase_is_described() {
        let paid = project("p1", 1, vec![phase("p1", 2)]);
        assert!(project_text(&paid).contains("Phase 1 has been paid 500 ZNN, 5000 QSR"));

        let active = project("p1", 1, vec![phase("p1", 1)]);
        assert!(project_text(&active).contains("Phase 1 has been accepted"));

        let closed = project("p1", 1, vec![phase("p1", 3)]);
        assert!(project_text(&closed).contains("Phase 1 has been closed"));
    }

    #[test]
    fn terminal_project_text() {
        assert!(project_text(&project("p1", 3, vec![])).contains("\n<b>Closed</b>\n"));
        assert!(project_text(&project("p1", 4, vec![])).contains("\n<b>Completed</b>\n"));
        assert!(project_text(&project("p1", 2, vec![])).contains("\n<b>Paid</b>\n"));
    }

    #[test]
    fn summaries() {
        assert_eq!(
            project_summary(&project("a", 0, vec![])),
            "<b>Project a</b>\n<b>Yes</b> 10, <b>No</b> 2, <b>Abstain</b> 1\n"
        );
        assert_eq!(
            project_summary(&project("a", 1, vec![])),
            "<b>Project a</b>\n<b>Yes</b> 10, <b>No</b> 2, <b>Abstain</b> 1\n (<i>Accepted</i>)"
        );
        assert_eq!(
            project_summary(&project("a", 1, vec![phase("a", 0)])),
            "<b>Project a</b> <i>Phase 1</i>\n<b>Yes</b> 3, <b>No</b> 1, <b>Abstain</b> 0\n"
        );
        assert!(project_summary(&project("a", 1, vec![phase("a", 2)])).ends_with("<i>paid</i>"));
    }

    #[test]
    fn overview_joins_summaries_under_header() {
        let a = project("a", 0, vec![]);
        let b = project("b", 0, vec![]);
        let text = overview_text(&[&a, &b]);
        assert!(text.starts_with(OVERVIEW_HEADER));
        assert!(text.contains("Abstain</b> 1\n\n<b>Project b</b>"));
        assert_eq!(overview_text(&[]), OVERVIEW_HEADER);
    }

    #[test]
    fn rates_table_sorts_and_counts_non_voters() {
        let rates = vec![
            PillarRate {
                name: "low".to_string(),
                rate: 0.25,
                active_rate: 0.5,
            },
            PillarRate {
                name: "idle".to_string(),
                rate: 0.0,
                active_rate: 0.0,
            },
            PillarRate {
                name: "high".to_string(),
                rate: 0.9,
                active_rate: 1.0,
            },
        ];
        let text = rates_text(&rates);
        assert!(text.starts_with(RATES_HEADER));
        assert!(text.contains(" <code>1.00|0.90</code> - high\n <code>0.50|0.25</code> - low"));
        assert!(!text.contains("idle"));
        assert!(text.ends_with("\n\n1/3 never voted"));
    }

    #[test]
    fn notices() {
        let p = project("p1", 2, vec![]);
        assert_eq!(
            project_status_notice(&p, 2),
            "<b>Project p1</b>\nThe project has been paid"
        );
        assert_eq!(
            phase_status_notice(&p, 7),
            "<b>Project p1</b>\nCurrent phase was <code>bot error</code>"
        );
        let ph = phase("p1", 0);
        assert!(new_phase_notice(&p, &ph).contains("New phase is open for voting:\n\n<b>Milestone</b>"));
        assert!(phase_reset_notice(&p, &ph).contains("Current phase was reset:\n\n"));
    }
}
