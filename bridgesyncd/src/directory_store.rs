//! A side store backed by a plain directory tree.
//!
//! ```text
//! <root>/<container>/<identity>.json
//! <root>/<container>/<identity>.attachments/<reference>
//! ```
//!
//! Hidden entries are ignored, which is also where in-progress writes live.

use std::path::{Component, Path, PathBuf};

use bridgesync_core::{
    CollaboratorError, ContainerProvisioner, ContainerRef, Enumerator, Item, Mutator,
    OwnedResource,
};
use rand::Rng;
use thiserror::Error;

const ITEM_EXT: &str = "json";
const ATTACHMENTS_SUFFIX: &str = ".attachments";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("name is empty")]
    Empty,
    #[error("name {0:?} contains unsupported component")]
    UnsupportedComponent(String),
    #[error("name {0:?} is hidden")]
    Hidden(String),
}

impl From<PathError> for CollaboratorError {
    fn from(err: PathError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

/// Maps a single container, identity or attachment name under `parent`.
pub fn child_path(parent: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name.starts_with('.') {
        return Err(PathError::Hidden(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(parent.join(part)),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}

fn new_identity() -> String {
    format!("{:016x}", rand::thread_rng().r#gen::<u64>())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_none_or(|name| name.starts_with('.'))
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Unavailable(format!("{}: {err}", path.display()))
}

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container: &ContainerRef) -> Result<PathBuf, PathError> {
        child_path(&self.root, &container.name)
    }

    fn item_path(dir: &Path, identity: &str) -> Result<PathBuf, PathError> {
        child_path(dir, &format!("{identity}.{ITEM_EXT}"))
    }

    fn attachments_dir(dir: &Path, identity: &str) -> Result<PathBuf, PathError> {
        child_path(dir, &format!("{identity}{ATTACHMENTS_SUFFIX}"))
    }

    async fn read_items(dir: &Path) -> Result<Vec<(String, Item)>, CollaboratorError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_item = path.extension().and_then(|ext| ext.to_str()) == Some(ITEM_EXT);
            if is_hidden(&path) || !is_item {
                continue;
            }
            let Some(identity) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let raw = tokio::fs::read(&path).await?;
            let item: Item = serde_json::from_slice(&raw).map_err(|err| unavailable(&path, err))?;
            // The file name is authoritative for the identity.
            items.push((identity.to_string(), item.with_identity(identity)));
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }

    /// Identity of the stored file `item` addresses. An identified item only
    /// ever matches its own file; display names are consulted for items that
    /// carry no identity.
    async fn locate(dir: &Path, item: &Item) -> Result<Option<String>, CollaboratorError> {
        if let Some(identity) = item.identity() {
            let exists = tokio::fs::try_exists(Self::item_path(dir, identity)?).await?;
            return Ok(exists.then(|| identity.to_string()));
        }
        let stored = Self::read_items(dir).await?;
        Ok(stored
            .into_iter()
            .find(|(_, candidate)| candidate.display_name == item.display_name)
            .map(|(identity, _)| identity))
    }

    async fn write_item(dir: &Path, identity: &str, item: &Item) -> Result<(), CollaboratorError> {
        let path = Self::item_path(dir, identity)?;
        let tmp = dir.join(format!(".{identity}.{ITEM_EXT}.tmp"));
        let document = item.clone().with_identity(identity);
        let raw = serde_json::to_vec_pretty(&document).map_err(|err| unavailable(&path, err))?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn ensure_dir(dir: &Path) -> Result<(), CollaboratorError> {
        if tokio::fs::try_exists(dir).await? {
            Ok(())
        } else {
            Err(CollaboratorError::NotFound(format!("container {}", dir.display())))
        }
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<(), CollaboratorError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Enumerator for DirectoryStore {
    async fn list(&self, container: &ContainerRef) -> Result<Vec<Item>, CollaboratorError> {
        let dir = self.container_dir(container)?;
        let items = Self::read_items(&dir).await?;
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }
}

impl Mutator for DirectoryStore {
    async fn create(
        &self,
        container: &ContainerRef,
        item: &Item,
    ) -> Result<String, CollaboratorError> {
        let dir = self.container_dir(container)?;
        Self::ensure_dir(&dir).await?;
        let identity = new_identity();
        Self::write_item(&dir, &identity, item).await?;
        tracing::debug!("created {} as {identity} in {}", item.display_name, container.name);
        Ok(identity)
    }

    async fn update(
        &self,
        container: &ContainerRef,
        current: &Item,
        item: &Item,
    ) -> Result<(), CollaboratorError> {
        let dir = self.container_dir(container)?;
        let stored = Self::locate(&dir, current)
            .await?
            .ok_or_else(|| CollaboratorError::NotFound(current.display_name.clone()))?;
        let identity = item.identity().unwrap_or(&stored).to_string();
        Self::write_item(&dir, &identity, item).await?;
        if identity != stored {
            tokio::fs::remove_file(Self::item_path(&dir, &stored)?).await?;
            let old_attachments = Self::attachments_dir(&dir, &stored)?;
            if tokio::fs::try_exists(&old_attachments).await? {
                tokio::fs::rename(&old_attachments, Self::attachments_dir(&dir, &identity)?)
                    .await?;
            }
            tracing::debug!("{}: identity {stored} -> {identity}", item.display_name);
        }
        Ok(())
    }

    async fn delete(&self, container: &ContainerRef, item: &Item) -> Result<(), CollaboratorError> {
        let dir = self.container_dir(container)?;
        let stored = Self::locate(&dir, item)
            .await?
            .ok_or_else(|| CollaboratorError::NotFound(item.display_name.clone()))?;
        tokio::fs::remove_file(Self::item_path(&dir, &stored)?).await?;
        remove_dir_if_present(&Self::attachments_dir(&dir, &stored)?).await
    }

    async fn discard_resource(
        &self,
        container: &ContainerRef,
        resource: &OwnedResource,
    ) -> Result<(), CollaboratorError> {
        let Some(owner) = resource.owner.as_deref() else {
            return Ok(());
        };
        let dir = self.container_dir(container)?;
        let path = child_path(&Self::attachments_dir(&dir, owner)?, &resource.reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ContainerProvisioner for DirectoryStore {
    async fn list_containers(&self) -> Result<Vec<ContainerRef>, CollaboratorError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut containers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_hidden(&path) || !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                containers.push(ContainerRef::with_handle(name, path.display().to_string()));
            }
        }
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn create_container(&self, name: &str) -> Result<ContainerRef, CollaboratorError> {
        let dir = child_path(&self.root, name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(ContainerRef::with_handle(name, dir.display().to_string()))
    }

    async fn delete_container(&self, container: &ContainerRef) -> Result<(), CollaboratorError> {
        let dir = self.container_dir(container)?;
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgesync_core::{Attachment, NotePayload, Payload};
    use tempfile::tempdir;
    use time::macros::datetime;

    fn note(identity: Option<&str>, name: &str, body: &str) -> Item {
        Item::note(identity, name, datetime!(2024-05-01 12:00:30 UTC), body)
    }

    #[test]
    fn child_path_rejects_traversal_and_hidden_names() {
        let root = PathBuf::from("/data");
        assert_eq!(child_path(&root, "Work").unwrap(), PathBuf::from("/data/Work"));
        assert!(matches!(child_path(&root, ""), Err(PathError::Empty)));
        assert!(matches!(
            child_path(&root, "../etc"),
            Err(PathError::Hidden(_))
        ));
        assert!(matches!(
            child_path(&root, "a/b"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            child_path(&root, "/abs"),
            Err(PathError::UnsupportedComponent(_))
        ));
    }

    #[tokio::test]
    async fn create_then_list_round_trips_item() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();

        let identity = store.create(&work, &note(Some("l1"), "X", "hello")).await.unwrap();
        assert_ne!(identity, "l1");
        assert_eq!(identity.len(), 16);

        let items = store.list(&work).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identity(), Some(identity.as_str()));
        assert_eq!(items[0].display_name, "X");
        assert_eq!(items[0].modified_at, datetime!(2024-05-01 12:00:30 UTC));
        assert!(tmp.path().join("Work").join(format!("{identity}.json")).exists());
    }

    #[tokio::test]
    async fn listing_ignores_hidden_and_foreign_files() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        store.create(&work, &note(None, "X", "x")).await.unwrap();
        std::fs::write(tmp.path().join("Work/.partial.json.tmp"), b"{").unwrap();
        std::fs::write(tmp.path().join("Work/readme.txt"), b"hi").unwrap();
        std::fs::create_dir(tmp.path().join(".trash")).unwrap();

        assert_eq!(store.list(&work).await.unwrap().len(), 1);
        let names: Vec<_> = store
            .list_containers()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Work".to_string()]);
    }

    #[tokio::test]
    async fn listing_a_missing_container_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let err = store.list(&ContainerRef::named("Gone")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(
            store
                .create(&ContainerRef::named("Gone"), &note(None, "X", "x"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_unavailable() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        std::fs::write(tmp.path().join("Work/abc.json"), b"not json").unwrap();
        assert!(matches!(
            store.list(&work).await,
            Err(CollaboratorError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn update_with_new_identity_renames_file_and_attachments() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        let old = store.create(&work, &note(None, "X", "v1")).await.unwrap();
        let old_attachments = tmp.path().join(format!("Work/{old}.attachments"));
        std::fs::create_dir(&old_attachments).unwrap();
        std::fs::write(old_attachments.join("pic.png"), b"png").unwrap();

        let current = note(Some(&old), "X", "v1");
        store
            .update(&work, &current, &note(Some("r9"), "X", "v2"))
            .await
            .unwrap();

        let items = store.list(&work).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identity(), Some("r9"));
        assert_eq!(
            items[0].payload,
            Payload::Note(NotePayload {
                body: "v2".into(),
                attachments: Vec::new(),
            })
        );
        assert!(!old_attachments.exists());
        assert!(tmp.path().join("Work/r9.attachments/pic.png").exists());
    }

    #[tokio::test]
    async fn update_and_delete_of_unknown_item_are_not_found() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        let missing = note(Some("nope"), "Missing", "x");
        assert!(
            store
                .update(&work, &missing, &missing)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(store.delete(&work, &missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn same_named_items_are_addressed_by_identity() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        let first = store.create(&work, &note(None, "X", "A")).await.unwrap();
        let second = store.create(&work, &note(None, "X", "C")).await.unwrap();

        let current = note(Some(&second), "X", "C");
        store
            .update(&work, &current, &note(Some("r2"), "X", "C"))
            .await
            .unwrap();

        let mut bodies: Vec<_> = store
            .list(&work)
            .await
            .unwrap()
            .into_iter()
            .map(|item| {
                let identity = item.identity().map(str::to_string);
                let Payload::Note(payload) = item.payload else {
                    panic!("expected a note");
                };
                (identity, payload.body)
            })
            .collect();
        bodies.sort();
        let mut expected = vec![
            (Some(first), "A".to_string()),
            (Some("r2".to_string()), "C".to_string()),
        ];
        expected.sort();
        assert_eq!(bodies, expected);

        // A stale identity never falls back to a same-named file.
        let stale = note(Some(&second), "X", "C");
        assert!(store.delete(&work, &stale).await.unwrap_err().is_not_found());
        assert_eq!(store.list(&work).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_document_and_attachments() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path());
        let work = store.create_container("Work").await.unwrap();
        let mut item = note(None, "X", "x");
        item.payload = Payload::Note(NotePayload {
            body: "x".into(),
            attachments: vec![Attachment {
                name: "Picture".into(),
                reference: "pic.png".into(),
            }],
        });
        let identity = store.create(&work, &item).await.unwrap();
        let attachments = tmp.path().join(format!("Work/{identity}.attachments"));
        std::fs::create_dir(&attachments).unwrap();
        std::fs::write(attachments.join("pic.png"), b"png").unwrap();

        let resource = OwnedResource {
            owner: Some(identity.clone()),
            name: "Picture".into(),
            reference: "pic.png".into(),
        };
        store.discard_resource(&work, &resource).await.unwrap();
        assert!(!attachments.join("pic.png").exists());
        // Discarding twice is harmless.
        store.discard_resource(&work, &resource).await.unwrap();

        store
            .delete(&work, &item.clone().with_identity(identity))
            .await
            .unwrap();
        assert!(store.list(&work).await.unwrap().is_empty());
        assert!(!attachments.exists());
    }

    #[tokio::test]
    async fn container_lifecycle() {
        let tmp = tempdir().unwrap();
        let store = DirectoryStore::new(tmp.path().join("missing-root"));
        assert!(store.list_containers().await.unwrap().is_empty());

        let tasks = store.create_container("Tasks").await.unwrap();
        assert_eq!(store.list_containers().await.unwrap(), vec![tasks.clone()]);
        store.delete_container(&tasks).await.unwrap();
        assert!(store.delete_container(&tasks).await.unwrap_err().is_not_found());
        assert!(store.create_container("../escape").await.is_err());
    }
}
