use std::fmt;

use crate::engine::PassState;
use crate::model::{Direction, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    /// Rewrites the origin item with the identity the other side assigned.
    IdentityFeedback,
    Prune,
    CreateContainer,
    DeleteContainer,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::IdentityFeedback => "identity-feedback",
            ActionKind::Prune => "prune",
            ActionKind::CreateContainer => "create-container",
            ActionKind::DeleteContainer => "delete-container",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Created { identity: String },
    Updated,
    Deleted,
    AlreadyGone,
    Skipped,
    Failed { message: String },
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }

    /// Whether a write call reached the side.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Created { .. } | ActionOutcome::Updated | ActionOutcome::Deleted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub side: Side,
    pub container: String,
    /// Empty for container-level actions.
    pub item: String,
    pub outcome: ActionOutcome,
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.item.is_empty() {
            write!(f, "{} {} '{}': ", self.kind.as_str(), self.side, self.container)?;
        } else {
            write!(
                f,
                "{} {} '{}' in '{}': ",
                self.kind.as_str(),
                self.side,
                self.item,
                self.container
            )?;
        }
        match &self.outcome {
            ActionOutcome::Created { identity } => write!(f, "created as {identity}"),
            ActionOutcome::Updated => f.write_str("updated"),
            ActionOutcome::Deleted => f.write_str("deleted"),
            ActionOutcome::AlreadyGone => f.write_str("already gone"),
            ActionOutcome::Skipped => f.write_str("skipped"),
            ActionOutcome::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    Completed,
    Skipped { reason: String },
    Failed { state: PassState, error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutcome {
    pub container: String,
    pub direction: Direction,
    pub status: PassStatus,
    pub actions: Vec<ActionRecord>,
}

impl ContainerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, PassStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub already_gone: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    fn add(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Created { .. } => self.created += 1,
            ActionOutcome::Updated => self.updated += 1,
            ActionOutcome::Deleted => self.deleted += 1,
            ActionOutcome::AlreadyGone => self.already_gone += 1,
            ActionOutcome::Skipped => self.skipped += 1,
            ActionOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Aggregated result of one driver run across all containers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Container-level actions taken while pairing.
    pub pairing: Vec<ActionRecord>,
    pub containers: Vec<ContainerOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.pairing.iter().any(|record| record.outcome.is_failure())
            && !self.containers.iter().any(ContainerOutcome::is_failed)
    }

    pub fn failed_containers(&self) -> impl Iterator<Item = &ContainerOutcome> {
        self.containers.iter().filter(|outcome| outcome.is_failed())
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionRecord> {
        self.pairing
            .iter()
            .chain(self.containers.iter().flat_map(|outcome| outcome.actions.iter()))
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for record in self.actions() {
            tally.add(&record.outcome);
        }
        tally
    }

    pub fn mutation_count(&self) -> usize {
        self.actions()
            .filter(|record| record.outcome.is_applied())
            .count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tally = self.tally();
        let failed = self.failed_containers().count();
        write!(
            f,
            "containers={} failed={} created={} updated={} deleted={} already_gone={} skipped={} action_failures={}",
            self.containers.len(),
            failed,
            tally.created,
            tally.updated,
            tally.deleted,
            tally.already_gone,
            tally.skipped,
            tally.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: ActionOutcome) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::Create,
            side: Side::Remote,
            container: "Work".into(),
            item: "X".into(),
            outcome,
        }
    }

    #[test]
    fn tally_counts_each_outcome() {
        let report = RunReport {
            pairing: vec![record(ActionOutcome::Created {
                identity: "c1".into(),
            })],
            containers: vec![ContainerOutcome {
                container: "Work <> Work".into(),
                direction: Direction::Bidirectional,
                status: PassStatus::Completed,
                actions: vec![
                    record(ActionOutcome::Updated),
                    record(ActionOutcome::AlreadyGone),
                    record(ActionOutcome::Skipped),
                ],
            }],
        };
        let tally = report.tally();
        assert_eq!(tally.created, 1);
        assert_eq!(tally.updated, 1);
        assert_eq!(tally.already_gone, 1);
        assert_eq!(tally.skipped, 1);
        assert_eq!(report.mutation_count(), 2);
        assert!(report.is_success());
    }

    #[test]
    fn failed_container_fails_the_run() {
        let report = RunReport {
            pairing: Vec::new(),
            containers: vec![ContainerOutcome {
                container: "Work <> Work".into(),
                direction: Direction::Bidirectional,
                status: PassStatus::Failed {
                    state: PassState::Enumerating,
                    error: "offline".into(),
                },
                actions: Vec::new(),
            }],
        };
        assert!(!report.is_success());
        assert_eq!(report.failed_containers().count(), 1);
    }

    #[test]
    fn record_display_reads_as_log_line() {
        let line = record(ActionOutcome::Created {
            identity: "r1".into(),
        })
        .to_string();
        assert_eq!(line, "create remote 'X' in 'Work': created as r1");
    }
}
