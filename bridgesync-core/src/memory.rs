//! In-memory side used by tests and dry experiments.
//!
//! Clones share state, so a test can hand one clone to the driver and keep
//! another to inspect the result.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapter::OwnedResource;
use crate::collaborator::{CollaboratorError, ContainerProvisioner, Enumerator, Mutator};
use crate::model::{ContainerRef, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOp {
    List,
    Create,
    Update,
    Delete,
    Discard,
    ListContainers,
    CreateContainer,
    DeleteContainer,
}

impl CallOp {
    pub fn is_mutation(self) -> bool {
        !matches!(self, CallOp::List | CallOp::ListContainers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: CallOp,
    pub container: String,
    /// Display name of the item involved, if any.
    pub target: Option<String>,
}

#[derive(Default)]
struct Inner {
    containers: Vec<(ContainerRef, Vec<Item>)>,
    next_identity: u64,
    next_handle: u64,
    calls: Vec<Call>,
    failures: Vec<(CallOp, String, CollaboratorError)>,
    discarded: Vec<OwnedResource>,
}

impl Inner {
    fn container_mut(&mut self, name: &str) -> Result<&mut Vec<Item>, CollaboratorError> {
        self.containers
            .iter_mut()
            .find(|(container, _)| container.name == name)
            .map(|(_, items)| items)
            .ok_or_else(|| CollaboratorError::NotFound(format!("container {name}")))
    }

    fn injected(&self, op: CallOp, key: &str) -> Option<CollaboratorError> {
        self.failures
            .iter()
            .find(|(failing, target, _)| *failing == op && target == key)
            .map(|(_, _, err)| err.clone())
    }
}

fn locate(items: &[Item], item: &Item) -> Option<usize> {
    match item.identity() {
        Some(identity) => items.iter().position(|c| c.identity() == Some(identity)),
        None => items
            .iter()
            .position(|c| c.identity().is_none() && c.display_name == item.display_name),
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    prefix: String,
    always_assign: bool,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Identities handed out by this store read `<prefix>1`, `<prefix>2`, ...
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            always_assign: false,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Assign a fresh identity on every create, even when the incoming item
    /// already carries one.
    pub fn assigning_identities(mut self) -> Self {
        self.always_assign = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_container(&self, name: &str) -> ContainerRef {
        let mut inner = self.lock();
        if let Some((existing, _)) = inner.containers.iter().find(|(c, _)| c.name == name) {
            return existing.clone();
        }
        inner.next_handle += 1;
        let handle = format!("{}-c{}", self.prefix, inner.next_handle);
        let container = ContainerRef::with_handle(name, handle);
        inner.containers.push((container.clone(), Vec::new()));
        container
    }

    /// Puts `item` in place without logging a call, creating the container
    /// when needed.
    pub fn insert(&self, container: &str, item: Item) {
        self.add_container(container);
        let mut inner = self.lock();
        if let Ok(items) = inner.container_mut(container) {
            items.push(item);
        }
    }

    /// Removes an item by display name without logging a call.
    pub fn remove(&self, container: &str, name: &str) -> Option<Item> {
        let mut inner = self.lock();
        let items = inner.container_mut(container).ok()?;
        let index = items.iter().position(|item| item.display_name == name)?;
        Some(items.remove(index))
    }

    /// Drops a container and its items without logging a call.
    pub fn remove_container(&self, name: &str) {
        self.lock().containers.retain(|(c, _)| c.name != name);
    }

    pub fn items(&self, container: &str) -> Vec<Item> {
        let mut inner = self.lock();
        inner
            .container_mut(container)
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn item(&self, container: &str, name: &str) -> Option<Item> {
        self.items(container)
            .into_iter()
            .find(|item| item.display_name == name)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .iter()
            .map(|(c, _)| c.name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn discarded(&self) -> Vec<OwnedResource> {
        self.lock().discarded.clone()
    }

    /// Makes every `op` against `target` (an item display name, or a
    /// container name for listing and container calls) fail as unavailable.
    pub fn fail_on(&self, op: CallOp, target: &str) {
        self.fail_with(
            op,
            target,
            CollaboratorError::Unavailable(format!("injected {op:?} failure on {target}")),
        );
    }

    pub fn fail_with(&self, op: CallOp, target: &str, err: CollaboratorError) {
        self.lock().failures.push((op, target.to_string(), err));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn begin(
        &self,
        op: CallOp,
        container: &str,
        target: Option<&str>,
    ) -> Result<MutexGuard<'_, Inner>, CollaboratorError> {
        let mut inner = self.lock();
        inner.calls.push(Call {
            op,
            container: container.to_string(),
            target: target.map(str::to_string),
        });
        match inner.injected(op, target.unwrap_or(container)) {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }
}

impl Enumerator for MemoryStore {
    async fn list(&self, container: &ContainerRef) -> Result<Vec<Item>, CollaboratorError> {
        let mut inner = self.begin(CallOp::List, &container.name, None)?;
        inner.container_mut(&container.name).map(|items| items.clone())
    }
}

impl Mutator for MemoryStore {
    async fn create(
        &self,
        container: &ContainerRef,
        item: &Item,
    ) -> Result<String, CollaboratorError> {
        let mut inner = self.begin(CallOp::Create, &container.name, Some(&item.display_name))?;
        let reuse = item
            .identity()
            .filter(|_| !self.always_assign)
            .map(str::to_string);
        let identity = match reuse {
            Some(identity) => identity,
            None => {
                inner.next_identity += 1;
                format!("{}{}", self.prefix, inner.next_identity)
            }
        };
        let items = inner.container_mut(&container.name)?;
        if items.iter().any(|c| c.identity() == Some(identity.as_str())) {
            return Err(CollaboratorError::Unavailable(format!(
                "identity {identity} already taken"
            )));
        }
        items.push(item.clone().with_identity(identity.clone()));
        Ok(identity)
    }

    async fn update(
        &self,
        container: &ContainerRef,
        current: &Item,
        item: &Item,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.begin(CallOp::Update, &container.name, Some(&item.display_name))?;
        let items = inner.container_mut(&container.name)?;
        let index = locate(items, current)
            .ok_or_else(|| CollaboratorError::NotFound(current.display_name.clone()))?;
        items[index] = item.clone();
        Ok(())
    }

    async fn delete(&self, container: &ContainerRef, item: &Item) -> Result<(), CollaboratorError> {
        let mut inner = self.begin(CallOp::Delete, &container.name, Some(&item.display_name))?;
        let items = inner.container_mut(&container.name)?;
        let index = locate(items, item)
            .ok_or_else(|| CollaboratorError::NotFound(item.display_name.clone()))?;
        items.remove(index);
        Ok(())
    }

    async fn discard_resource(
        &self,
        container: &ContainerRef,
        resource: &OwnedResource,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.begin(CallOp::Discard, &container.name, Some(&resource.name))?;
        inner.discarded.push(resource.clone());
        Ok(())
    }
}

impl ContainerProvisioner for MemoryStore {
    async fn list_containers(&self) -> Result<Vec<ContainerRef>, CollaboratorError> {
        let inner = self.begin(CallOp::ListContainers, "", None)?;
        Ok(inner.containers.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn create_container(&self, name: &str) -> Result<ContainerRef, CollaboratorError> {
        drop(self.begin(CallOp::CreateContainer, name, None)?);
        Ok(self.add_container(name))
    }

    async fn delete_container(&self, container: &ContainerRef) -> Result<(), CollaboratorError> {
        let mut inner = self.begin(CallOp::DeleteContainer, &container.name, None)?;
        let before = inner.containers.len();
        inner.containers.retain(|(c, _)| c.name != container.name);
        if inner.containers.len() == before {
            return Err(CollaboratorError::NotFound(format!(
                "container {}",
                container.name
            )));
        }
        Ok(())
    }
}
