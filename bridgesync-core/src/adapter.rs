use crate::model::{Item, ItemKind, Payload};

/// A sub-resource owned by an item that must be discarded before the item
/// itself is deleted (note attachments, for instance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedResource {
    pub owner: Option<String>,
    pub name: String,
    pub reference: String,
}

/// Kind-specific rules the engine defers to.
pub trait ItemAdapter: Send + Sync {
    fn kind(&self) -> ItemKind;

    /// Builds the write request sent to the losing side.
    ///
    /// The request is a full copy of `winner`. When the receiving side
    /// already holds the item under its own identity, that identity is kept
    /// so the side can locate what it is asked to overwrite.
    fn seed(&self, winner: &Item, existing: Option<&Item>) -> Item {
        let mut seed = winner.clone();
        if let Some(identity) = existing.and_then(Item::identity) {
            seed.identity = Some(identity.to_string());
        }
        seed
    }

    fn owned_resources(&self, _item: &Item) -> Vec<OwnedResource> {
        Vec::new()
    }

    /// Items the local side may drop during housekeeping.
    fn is_prunable(&self, _item: &Item) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoteAdapter;

impl ItemAdapter for NoteAdapter {
    fn kind(&self) -> ItemKind {
        ItemKind::Note
    }

    fn owned_resources(&self, item: &Item) -> Vec<OwnedResource> {
        let Payload::Note(note) = &item.payload else {
            return Vec::new();
        };
        note.attachments
            .iter()
            .map(|attachment| OwnedResource {
                owner: item.identity().map(str::to_string),
                name: attachment.name.clone(),
                reference: attachment.reference.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReminderAdapter;

impl ItemAdapter for ReminderAdapter {
    fn kind(&self) -> ItemKind {
        ItemKind::Reminder
    }

    fn is_prunable(&self, item: &Item) -> bool {
        matches!(&item.payload, Payload::Reminder(reminder) if reminder.completed)
    }
}

pub fn adapter_for(kind: ItemKind) -> Box<dyn ItemAdapter> {
    match kind {
        ItemKind::Note => Box::new(NoteAdapter),
        ItemKind::Reminder => Box::new(ReminderAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, NotePayload, ReminderPayload};
    use time::macros::datetime;

    #[test]
    fn seed_keeps_receiving_side_identity() {
        let winner = Item::note(Some("l1"), "X", datetime!(2024-01-02 00:00 UTC), "new");
        let existing = Item::note(Some("r1"), "X", datetime!(2024-01-01 00:00 UTC), "old");
        let seed = NoteAdapter.seed(&winner, Some(&existing));
        assert_eq!(seed.identity(), Some("r1"));
        assert_eq!(seed.payload, winner.payload);
        assert_eq!(seed.modified_at, winner.modified_at);
    }

    #[test]
    fn seed_uses_winner_identity_when_receiver_has_none() {
        let winner = Item::note(Some("r7"), "X", datetime!(2024-01-02 00:00 UTC), "new");
        let existing = Item::note(None, "X", datetime!(2024-01-01 00:00 UTC), "old");
        assert_eq!(
            NoteAdapter.seed(&winner, Some(&existing)).identity(),
            Some("r7")
        );
        assert_eq!(NoteAdapter.seed(&winner, None).identity(), Some("r7"));
    }

    #[test]
    fn note_attachments_are_owned_resources() {
        let item = Item::new(
            Some("n1"),
            "Trip",
            datetime!(2024-01-01 00:00 UTC),
            Payload::Note(NotePayload {
                body: "see map".into(),
                attachments: vec![Attachment {
                    name: "map.png".into(),
                    reference: ".attachments.n1/map.png".into(),
                }],
            }),
        );
        let owned = NoteAdapter.owned_resources(&item);
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].owner.as_deref(), Some("n1"));
        assert_eq!(owned[0].name, "map.png");
    }

    #[test]
    fn only_completed_reminders_are_prunable() {
        let mut payload = ReminderPayload::default();
        let open = Item::new(
            Some("a"),
            "Call",
            datetime!(2024-01-01 00:00 UTC),
            Payload::Reminder(payload.clone()),
        );
        payload.completed = true;
        let done = Item::new(
            Some("b"),
            "Pay",
            datetime!(2024-01-01 00:00 UTC),
            Payload::Reminder(payload),
        );
        assert!(!ReminderAdapter.is_prunable(&open));
        assert!(ReminderAdapter.is_prunable(&done));
        assert!(!NoteAdapter.is_prunable(&done));
    }
}
