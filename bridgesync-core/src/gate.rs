use std::fmt;

use crate::model::Side;
use crate::report::ActionKind;

/// A mutation the engine is about to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub kind: ActionKind,
    pub side: Side,
    pub container: String,
    pub item: Option<String>,
}

impl PlannedAction {
    pub fn item(kind: ActionKind, side: Side, container: &str, item: &str) -> Self {
        Self {
            kind,
            side,
            container: container.to_string(),
            item: Some(item.to_string()),
        }
    }

    pub fn container(kind: ActionKind, side: Side, container: &str) -> Self {
        Self {
            kind,
            side,
            container: container.to_string(),
            item: None,
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            ActionKind::Create | ActionKind::CreateContainer => "Create",
            ActionKind::Update | ActionKind::IdentityFeedback => "Update",
            ActionKind::Delete | ActionKind::Prune | ActionKind::DeleteContainer => "Delete",
        };
        match &self.item {
            Some(item) => write!(
                f,
                "{verb} {} item {item} in {}",
                self.side, self.container
            ),
            None => write!(f, "{verb} {} container {}", self.side, self.container),
        }
    }
}

/// Consulted before every mutating call. A refusal turns the action into
/// a `Skipped` outcome.
pub trait ActionGate: Send + Sync {
    fn allow(&self, action: &PlannedAction) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ActionGate for AllowAll {
    fn allow(&self, _action: &PlannedAction) -> bool {
        true
    }
}

/// Refuses every mutation and logs what would have been done.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl ActionGate for DryRun {
    fn allow(&self, action: &PlannedAction) -> bool {
        tracing::info!("dry run: {action}");
        false
    }
}

impl<F> ActionGate for F
where
    F: Fn(&PlannedAction) -> bool + Send + Sync,
{
    fn allow(&self, action: &PlannedAction) -> bool {
        self(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_item_and_container_actions() {
        let item = PlannedAction::item(ActionKind::Create, Side::Remote, "Work", "X");
        assert_eq!(item.to_string(), "Create remote item X in Work");
        let container = PlannedAction::container(ActionKind::DeleteContainer, Side::Local, "Old");
        assert_eq!(container.to_string(), "Delete local container Old");
    }

    #[test]
    fn closures_act_as_gates() {
        let only_remote = |action: &PlannedAction| action.side == Side::Remote;
        assert!(only_remote.allow(&PlannedAction::item(
            ActionKind::Update,
            Side::Remote,
            "Work",
            "X"
        )));
        assert!(!only_remote.allow(&PlannedAction::item(
            ActionKind::Update,
            Side::Local,
            "Work",
            "X"
        )));
    }

    #[test]
    fn dry_run_refuses_everything() {
        let action = PlannedAction::container(ActionKind::CreateContainer, Side::Remote, "Work");
        assert!(!DryRun.allow(&action));
        assert!(AllowAll.allow(&action));
    }
}
