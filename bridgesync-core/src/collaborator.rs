use std::future::Future;

use thiserror::Error;

use crate::adapter::OwnedResource;
use crate::model::{ContainerRef, Item};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CollaboratorError::NotFound(_))
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            CollaboratorError::NotFound(err.to_string())
        } else {
            CollaboratorError::Unavailable(err.to_string())
        }
    }
}

pub trait Enumerator {
    fn list(
        &self,
        container: &ContainerRef,
    ) -> impl Future<Output = Result<Vec<Item>, CollaboratorError>> + Send;
}

/// Item-level writes on one side.
///
/// Existing items are addressed by the side's own copy: by its identity when
/// it has one, by display name only when it has none. An item carrying an
/// identity is never resolved by name, since names may repeat.
pub trait Mutator {
    /// Returns the identity the side holds the new item under.
    fn create(
        &self,
        container: &ContainerRef,
        item: &Item,
    ) -> impl Future<Output = Result<String, CollaboratorError>> + Send;

    /// Replaces `current` with `item`. When `item` carries a different
    /// identity the stored item moves to it.
    fn update(
        &self,
        container: &ContainerRef,
        current: &Item,
        item: &Item,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    fn delete(
        &self,
        container: &ContainerRef,
        item: &Item,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    fn discard_resource(
        &self,
        _container: &ContainerRef,
        _resource: &OwnedResource,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        async { Ok(()) }
    }
}

pub trait ContainerProvisioner {
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerRef>, CollaboratorError>> + Send;

    fn create_container(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<ContainerRef, CollaboratorError>> + Send;

    fn delete_container(
        &self,
        container: &ContainerRef,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Everything the driver needs from one side.
pub trait SideStore: Enumerator + Mutator + ContainerProvisioner + Send + Sync {}

impl<T> SideStore for T where T: Enumerator + Mutator + ContainerProvisioner + Send + Sync {}
