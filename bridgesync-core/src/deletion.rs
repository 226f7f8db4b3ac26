//! Tombstone-by-absence: whatever the previous snapshot lists but the current
//! enumeration no longer holds was deleted on that side.

use crate::adapter::ItemAdapter;
use crate::collaborator::{CollaboratorError, Mutator};
use crate::gate::{ActionGate, PlannedAction};
use crate::matcher::{match_index, match_index_where};
use crate::model::{ContainerRef, Item, Side, SnapshotEntry};
use crate::report::{ActionKind, ActionOutcome, ActionRecord};

/// Entries of `previous` with no counterpart in `current`.
///
/// An absent snapshot means the container side was never reconciled, so
/// nothing can be inferred from it.
pub fn detect_removed(previous: Option<&[SnapshotEntry]>, current: &[Item]) -> Vec<SnapshotEntry> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let mut claimed = vec![false; current.len()];
    let mut removed = Vec::new();
    for entry in previous {
        match match_index_where(entry, current, |index| !claimed[index]) {
            Some(index) => claimed[index] = true,
            None => removed.push(entry.clone()),
        }
    }
    removed
}

/// Where removals observed on the other side are mirrored to.
pub struct DeletionTarget<'a, M: ?Sized> {
    pub store: &'a M,
    pub side: Side,
    pub container: &'a ContainerRef,
    pub adapter: &'a dyn ItemAdapter,
    pub gate: &'a dyn ActionGate,
}

/// Result of one propagation round.
#[derive(Debug, Default)]
pub struct Propagation {
    pub actions: Vec<ActionRecord>,
    /// The gate refused at least one delete.
    pub refused: bool,
}

impl<M> DeletionTarget<'_, M>
where
    M: Mutator + Sync + ?Sized,
{
    /// Deletes the counterpart of every removed entry from `view`'s side.
    ///
    /// `view` is the target side's current enumeration and loses every item
    /// that is deleted or found already gone. The first error other than
    /// not-found aborts the round and is returned along with the actions
    /// taken so far.
    pub async fn propagate(
        &self,
        removed: &[SnapshotEntry],
        view: &mut Vec<Item>,
    ) -> Result<Propagation, (Propagation, CollaboratorError)> {
        let mut round = Propagation::default();
        for entry in removed {
            let Some(index) = match_index(entry, view) else {
                tracing::debug!(
                    "{} counterpart of '{}' in '{}' is already gone",
                    self.side,
                    entry.display_name,
                    self.container.name
                );
                round
                    .actions
                    .push(self.record(&entry.display_name, ActionOutcome::AlreadyGone));
                continue;
            };

            let planned = PlannedAction::item(
                ActionKind::Delete,
                self.side,
                &self.container.name,
                &view[index].display_name,
            );
            if !self.gate.allow(&planned) {
                round.refused = true;
                round
                    .actions
                    .push(self.record(&entry.display_name, ActionOutcome::Skipped));
                continue;
            }

            match self.delete_with_resources(&view[index]).await {
                Ok(outcome) => {
                    let gone = view.remove(index);
                    tracing::info!(
                        "deleted {} item '{}' from '{}'",
                        self.side,
                        gone.display_name,
                        self.container.name
                    );
                    round.actions.push(self.record(&gone.display_name, outcome));
                }
                Err(err) => {
                    tracing::warn!(
                        "deleting {} item '{}' from '{}' failed: {err}",
                        self.side,
                        entry.display_name,
                        self.container.name
                    );
                    round.actions.push(self.record(
                        &entry.display_name,
                        ActionOutcome::Failed {
                            message: err.to_string(),
                        },
                    ));
                    return Err((round, err));
                }
            }
        }
        Ok(round)
    }

    async fn delete_with_resources(&self, item: &Item) -> Result<ActionOutcome, CollaboratorError> {
        for resource in self.adapter.owned_resources(item) {
            match self.store.discard_resource(self.container, &resource).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        match self.store.delete(self.container, item).await {
            Ok(()) => Ok(ActionOutcome::Deleted),
            Err(err) if err.is_not_found() => Ok(ActionOutcome::AlreadyGone),
            Err(err) => Err(err),
        }
    }

    fn record(&self, item: &str, outcome: ActionOutcome) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::Delete,
            side: self.side,
            container: self.container.name.clone(),
            item: item.to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NoteAdapter;
    use crate::gate::{AllowAll, DryRun};
    use crate::memory::{CallOp, MemoryStore};
    use crate::model::{Attachment, NotePayload, Payload};
    use time::macros::datetime;

    fn item(identity: Option<&str>, name: &str) -> Item {
        Item::note(identity, name, datetime!(2024-01-01 00:00 UTC), "")
    }

    #[test]
    fn absent_snapshot_infers_nothing() {
        assert!(detect_removed(None, &[]).is_empty());
    }

    #[test]
    fn empty_snapshot_infers_nothing_either() {
        assert!(detect_removed(Some(&[]), &[item(Some("a"), "A")]).is_empty());
    }

    #[test]
    fn missing_entries_are_removed() {
        let previous = vec![
            SnapshotEntry::new(Some("a"), "A"),
            SnapshotEntry::new(Some("b"), "B"),
            SnapshotEntry::new(None, "C"),
        ];
        let current = vec![item(Some("a"), "Renamed A"), item(Some("c"), "C")];
        let removed = detect_removed(Some(&previous), &current);
        assert_eq!(removed, vec![SnapshotEntry::new(Some("b"), "B")]);
    }

    #[test]
    fn one_current_item_accounts_for_one_entry() {
        let previous = vec![SnapshotEntry::new(None, "X"), SnapshotEntry::new(None, "X")];
        let removed = detect_removed(Some(&previous), &[item(None, "X")]);
        assert_eq!(removed, vec![SnapshotEntry::new(None, "X")]);
    }

    fn note_with_attachment(identity: &str, name: &str) -> Item {
        Item::new(
            Some(identity),
            name,
            datetime!(2024-01-01 00:00 UTC),
            Payload::Note(NotePayload {
                body: String::new(),
                attachments: vec![Attachment {
                    name: "scan.pdf".into(),
                    reference: format!("{identity}/scan.pdf"),
                }],
            }),
        )
    }

    #[tokio::test]
    async fn propagate_discards_resources_then_deletes() {
        let store = MemoryStore::new("r");
        let work = store.add_container("Work");
        store.insert("Work", note_with_attachment("r1", "X"));
        store.insert("Work", item(Some("r2"), "Y"));
        let mut view = store.items("Work");

        let target = DeletionTarget {
            store: &store,
            side: Side::Remote,
            container: &work,
            adapter: &NoteAdapter,
            gate: &AllowAll,
        };
        let round = target
            .propagate(
                &[
                    SnapshotEntry::new(Some("r1"), "X"),
                    SnapshotEntry::new(Some("gone"), "Z"),
                ],
                &mut view,
            )
            .await
            .unwrap();

        let outcomes: Vec<_> = round.actions.iter().map(|a| a.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![ActionOutcome::Deleted, ActionOutcome::AlreadyGone]
        );
        assert_eq!(view.len(), 1);
        assert_eq!(store.items("Work").len(), 1);
        let ops: Vec<_> = store.mutations().into_iter().map(|call| call.op).collect();
        assert_eq!(ops, vec![CallOp::Discard, CallOp::Delete]);
    }

    #[tokio::test]
    async fn refused_deletes_are_skipped() {
        let store = MemoryStore::new("r");
        let work = store.add_container("Work");
        store.insert("Work", item(Some("r1"), "X"));
        let mut view = store.items("Work");

        let target = DeletionTarget {
            store: &store,
            side: Side::Remote,
            container: &work,
            adapter: &NoteAdapter,
            gate: &DryRun,
        };
        let round = target
            .propagate(&[SnapshotEntry::new(Some("r1"), "X")], &mut view)
            .await
            .unwrap();
        assert!(round.refused);
        assert_eq!(round.actions[0].outcome, ActionOutcome::Skipped);
        assert_eq!(view.len(), 1);
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn hard_failure_stops_the_round() {
        let store = MemoryStore::new("r");
        let work = store.add_container("Work");
        store.insert("Work", item(Some("r1"), "X"));
        store.insert("Work", item(Some("r2"), "Y"));
        store.fail_on(CallOp::Delete, "X");
        let mut view = store.items("Work");

        let target = DeletionTarget {
            store: &store,
            side: Side::Remote,
            container: &work,
            adapter: &NoteAdapter,
            gate: &AllowAll,
        };
        let (round, err) = target
            .propagate(
                &[
                    SnapshotEntry::new(Some("r1"), "X"),
                    SnapshotEntry::new(Some("r2"), "Y"),
                ],
                &mut view,
            )
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(round.actions.len(), 1);
        assert!(round.actions[0].outcome.is_failure());
        assert_eq!(store.items("Work").len(), 2);
    }
}
