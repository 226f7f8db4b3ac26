use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }

}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync policy of one container pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    None,
    LocalToRemote,
    RemoteToLocal,
    Bidirectional,
}

impl Direction {
    /// Whether the engine may issue create/update/delete calls against `side`.
    pub fn writes_to(self, side: Side) -> bool {
        match (self, side) {
            (Direction::Bidirectional, _) => true,
            (Direction::LocalToRemote, Side::Remote) => true,
            (Direction::RemoteToLocal, Side::Local) => true,
            _ => false,
        }
    }

    /// Whether a deletion observed on `side` is mirrored onto the other side.
    pub fn propagates_deletions_from(self, side: Side) -> bool {
        self.writes_to(side.other())
    }

    pub fn is_none(self) -> bool {
        self == Direction::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::None => "none",
            Direction::LocalToRemote => "local_to_remote",
            Direction::RemoteToLocal => "remote_to_local",
            Direction::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Direction::None),
            "local_to_remote" => Some(Direction::LocalToRemote),
            "remote_to_local" => Some(Direction::RemoteToLocal),
            "bidirectional" => Some(Direction::Bidirectional),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Note,
    Reminder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Note => "note",
            ItemKind::Reminder => "reminder",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "note" | "notes" => Some(ItemKind::Note),
            "reminder" | "reminders" => Some(ItemKind::Reminder),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotePayload {
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReminderPayload {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub remind_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub completed: bool,
}

/// Side-specific content. The engine copies it around but never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Note(NotePayload),
    Reminder(ReminderPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub identity: Option<String>,
    pub display_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    pub payload: Payload,
}

impl Item {
    pub fn new(
        identity: Option<&str>,
        display_name: impl Into<String>,
        modified_at: OffsetDateTime,
        payload: Payload,
    ) -> Self {
        Self {
            identity: identity.map(str::to_string),
            display_name: display_name.into(),
            modified_at,
            payload,
        }
    }

    pub fn note(
        identity: Option<&str>,
        display_name: impl Into<String>,
        modified_at: OffsetDateTime,
        body: impl Into<String>,
    ) -> Self {
        Self::new(
            identity,
            display_name,
            modified_at,
            Payload::Note(NotePayload {
                body: body.into(),
                attachments: Vec::new(),
            }),
        )
    }

    /// Identity, with the empty string treated as "never synced".
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|id| !id.is_empty())
    }

    /// Modification stamp truncated to whole seconds.
    pub fn modified_secs(&self) -> i64 {
        self.modified_at.unix_timestamp()
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn snapshot_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            identity: self.identity().map(str::to_string),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub name: String,
    pub handle: Option<String>,
}

impl ContainerRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
        }
    }

    pub fn with_handle(name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle.into()),
        }
    }
}

/// A local/remote container pairing for one pass. Rebuilt every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ItemKind,
    pub local: Option<ContainerRef>,
    pub remote: Option<ContainerRef>,
    pub direction: Direction,
}

impl Container {
    pub fn side(&self, side: Side) -> Option<&ContainerRef> {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.local.is_some() && self.remote.is_some()
    }

    /// Key guarding concurrent passes over the same pairing.
    pub fn pass_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind,
            self.local.as_ref().map(|r| r.name.as_str()).unwrap_or(""),
            self.remote.as_ref().map(|r| r.name.as_str()).unwrap_or("")
        )
    }

    pub fn to_record(&self) -> PairingRecord {
        PairingRecord {
            local_name: self.local.as_ref().map(|r| r.name.clone()),
            local_handle: self.local.as_ref().and_then(|r| r.handle.clone()),
            remote_name: self.remote.as_ref().map(|r| r.name.clone()),
            remote_handle: self.remote.as_ref().and_then(|r| r.handle.clone()),
            direction: self.direction,
        }
    }
}

/// Human label used in reports and log lines: `"local <> remote"`.
impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <> {}",
            self.local.as_ref().map(|r| r.name.as_str()).unwrap_or("None"),
            self.remote.as_ref().map(|r| r.name.as_str()).unwrap_or("None")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    pub local_name: Option<String>,
    pub local_handle: Option<String>,
    pub remote_name: Option<String>,
    pub remote_handle: Option<String>,
    pub direction: Direction,
}

impl PairingRecord {
    pub fn name(&self, side: Side) -> Option<&str> {
        match side {
            Side::Local => self.local_name.as_deref(),
            Side::Remote => self.remote_name.as_deref(),
        }
    }

    pub fn container_ref(&self, side: Side) -> Option<ContainerRef> {
        let (name, handle) = match side {
            Side::Local => (&self.local_name, &self.local_handle),
            Side::Remote => (&self.remote_name, &self.remote_handle),
        };
        name.as_ref().map(|name| ContainerRef {
            name: name.clone(),
            handle: handle.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotEntry {
    pub identity: Option<String>,
    pub display_name: String,
}

impl SnapshotEntry {
    pub fn new(identity: Option<&str>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.map(str::to_string),
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn direction_write_permissions() {
        assert!(Direction::Bidirectional.writes_to(Side::Local));
        assert!(Direction::Bidirectional.writes_to(Side::Remote));
        assert!(Direction::LocalToRemote.writes_to(Side::Remote));
        assert!(!Direction::LocalToRemote.writes_to(Side::Local));
        assert!(Direction::RemoteToLocal.writes_to(Side::Local));
        assert!(!Direction::RemoteToLocal.writes_to(Side::Remote));
        assert!(!Direction::None.writes_to(Side::Local));
        assert!(!Direction::None.writes_to(Side::Remote));
    }

    #[test]
    fn deletions_propagate_toward_writable_side() {
        assert!(Direction::LocalToRemote.propagates_deletions_from(Side::Local));
        assert!(!Direction::LocalToRemote.propagates_deletions_from(Side::Remote));
        assert!(Direction::RemoteToLocal.propagates_deletions_from(Side::Remote));
        assert!(Direction::Bidirectional.propagates_deletions_from(Side::Local));
        assert!(Direction::Bidirectional.propagates_deletions_from(Side::Remote));
    }

    #[test]
    fn direction_roundtrips_through_storage_text() {
        for direction in [
            Direction::None,
            Direction::LocalToRemote,
            Direction::RemoteToLocal,
            Direction::Bidirectional,
        ] {
            assert_eq!(Direction::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn empty_identity_counts_as_absent() {
        let item = Item::note(Some(""), "X", datetime!(2024-01-01 00:00 UTC), "");
        assert_eq!(item.identity(), None);
        assert_eq!(item.snapshot_entry(), SnapshotEntry::new(None, "X"));
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let item = Item::note(Some("n1"), "X", datetime!(2024-01-01 00:00 UTC), "hello");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["payload"]["kind"], "note");
        assert_eq!(json["modified_at"], "2024-01-01T00:00:00Z");
        let back: Item = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn container_display_names_both_sides() {
        let container = Container {
            kind: ItemKind::Note,
            local: Some(ContainerRef::named("Work")),
            remote: None,
            direction: Direction::LocalToRemote,
        };
        assert_eq!(container.to_string(), "Work <> None");
        assert_eq!(container.direction.to_string(), "local_to_remote");
    }
}
