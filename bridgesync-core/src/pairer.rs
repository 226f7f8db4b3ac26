//! Container discovery, provisioning and pairing.

use std::collections::{HashMap, HashSet};

use crate::collaborator::{CollaboratorError, SideStore};
use crate::engine::EngineError;
use crate::gate::{ActionGate, PlannedAction};
use crate::model::{Container, ContainerRef, Direction, ItemKind, PairingRecord, Side};
use crate::report::{ActionKind, ActionOutcome, ActionRecord};
use crate::state::StateStore;

/// Which containers sync in which direction, plus the local-to-remote name
/// aliases. Keys are local container names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingPolicy {
    directions: HashMap<String, Direction>,
    aliases: Vec<(String, String)>,
}

impl PairingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direction(mut self, local_name: impl Into<String>, direction: Direction) -> Self {
        self.set_direction(local_name, direction);
        self
    }

    pub fn with_alias(
        mut self,
        local_name: impl Into<String>,
        remote_name: impl Into<String>,
    ) -> Self {
        self.set_alias(local_name, remote_name);
        self
    }

    pub fn set_direction(&mut self, local_name: impl Into<String>, direction: Direction) {
        self.directions.insert(local_name.into(), direction);
    }

    pub fn set_alias(&mut self, local_name: impl Into<String>, remote_name: impl Into<String>) {
        let local_name = local_name.into();
        self.aliases.retain(|(local, _)| *local != local_name);
        self.aliases.push((local_name, remote_name.into()));
    }

    pub fn direction_for(&self, local_name: &str) -> Option<Direction> {
        self.directions.get(local_name).copied()
    }

    pub fn remote_name_for<'a>(&'a self, local_name: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(local, _)| local == local_name)
            .map(|(_, remote)| remote.as_str())
            .unwrap_or(local_name)
    }

    pub fn local_name_for<'a>(&'a self, remote_name: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(_, remote)| remote == remote_name)
            .map(|(local, _)| local.as_str())
            .unwrap_or(remote_name)
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty() && self.aliases.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PairingRun {
    pub containers: Vec<Container>,
    pub actions: Vec<ActionRecord>,
}

pub(crate) struct ContainerPairer<'a, L, R> {
    pub local: &'a L,
    pub remote: &'a R,
    pub state: &'a StateStore,
    pub kind: ItemKind,
    pub policy: &'a PairingPolicy,
    pub gate: &'a dyn ActionGate,
}

impl<L, R> ContainerPairer<'_, L, R>
where
    L: SideStore,
    R: SideStore,
{
    /// Propagates container deletions, pairs what is left, provisions missing
    /// counterparts and persists the resulting pairing table.
    pub async fn run(&self) -> Result<PairingRun, EngineError> {
        let mut local_containers = self
            .local
            .list_containers()
            .await
            .map_err(|source| EngineError::Collaborator {
                side: Side::Local,
                source,
            })?;
        let mut remote_containers = self
            .remote
            .list_containers()
            .await
            .map_err(|source| EngineError::Collaborator {
                side: Side::Remote,
                source,
            })?;
        let previous = self.state.load_pairings(self.kind).await?;

        let mut run = PairingRun::default();
        let mut kept = Vec::new();
        let mut blocked: HashSet<(Side, String)> = HashSet::new();

        for record in &previous {
            let (Some(local_name), Some(remote_name)) =
                (record.local_name.as_deref(), record.remote_name.as_deref())
            else {
                continue;
            };
            let local_present = local_containers.iter().any(|c| c.name == local_name);
            let remote_present = remote_containers.iter().any(|c| c.name == remote_name);
            if local_present && remote_present {
                continue;
            }
            if !local_present && !remote_present {
                self.forget(local_name, remote_name).await?;
                continue;
            }

            let gone = if local_present { Side::Remote } else { Side::Local };
            let direction = self.policy.direction_for(local_name).unwrap_or(record.direction);
            if !direction.propagates_deletions_from(gone) {
                continue;
            }

            let target = gone.other();
            let target_name = record.name(target).unwrap_or_default();
            let listed = match target {
                Side::Local => &local_containers,
                Side::Remote => &remote_containers,
            };
            let target_ref = listed
                .iter()
                .find(|c| c.name == target_name)
                .cloned()
                .or_else(|| record.container_ref(target))
                .unwrap_or_else(|| ContainerRef::named(target_name));

            let outcome = self.delete_container(target, &target_ref).await;
            let removed = matches!(outcome, ActionOutcome::Deleted | ActionOutcome::AlreadyGone);
            run.actions.push(container_record(
                ActionKind::DeleteContainer,
                target,
                target_name,
                outcome,
            ));
            if removed {
                match target {
                    Side::Local => local_containers.retain(|c| c.name != target_name),
                    Side::Remote => remote_containers.retain(|c| c.name != target_name),
                }
                self.forget(local_name, remote_name).await?;
            } else {
                blocked.insert((Side::Local, local_name.to_string()));
                blocked.insert((Side::Remote, remote_name.to_string()));
                kept.push(record.clone());
            }
        }

        let mut claimed = vec![false; remote_containers.len()];
        for local in &local_containers {
            let remote_name = self.policy.remote_name_for(&local.name);
            if blocked.contains(&(Side::Local, local.name.clone()))
                || blocked.contains(&(Side::Remote, remote_name.to_string()))
            {
                continue;
            }
            let direction = resolve_direction(self.policy, &previous, &local.name, remote_name);
            let found = remote_containers
                .iter()
                .enumerate()
                .position(|(index, c)| !claimed[index] && c.name == remote_name);
            let remote = match found {
                Some(index) => {
                    claimed[index] = true;
                    Some(remote_containers[index].clone())
                }
                None if direction.writes_to(Side::Remote) => {
                    self.provision(Side::Remote, remote_name, &mut run.actions)
                        .await
                }
                None => None,
            };
            run.containers.push(Container {
                kind: self.kind,
                local: Some(local.clone()),
                remote,
                direction,
            });
        }

        for (index, remote) in remote_containers.iter().enumerate() {
            if claimed[index] || blocked.contains(&(Side::Remote, remote.name.clone())) {
                continue;
            }
            let local_name = self.policy.local_name_for(&remote.name);
            let direction = resolve_direction(self.policy, &previous, local_name, &remote.name);
            let local = if direction.writes_to(Side::Local) {
                self.provision(Side::Local, local_name, &mut run.actions)
                    .await
            } else {
                None
            };
            run.containers.push(Container {
                kind: self.kind,
                local,
                remote: Some(remote.clone()),
                direction,
            });
        }

        let mut records: Vec<PairingRecord> =
            run.containers.iter().map(Container::to_record).collect();
        records.extend(kept);
        self.state.save_pairings(self.kind, &records).await?;

        for container in &run.containers {
            tracing::info!("{container}: {}", container.direction);
        }
        Ok(run)
    }

    async fn provision(
        &self,
        side: Side,
        name: &str,
        actions: &mut Vec<ActionRecord>,
    ) -> Option<ContainerRef> {
        let planned = PlannedAction::container(ActionKind::CreateContainer, side, name);
        if !self.gate.allow(&planned) {
            actions.push(container_record(
                ActionKind::CreateContainer,
                side,
                name,
                ActionOutcome::Skipped,
            ));
            return None;
        }

        let created = match side {
            Side::Local => self.local.create_container(name).await,
            Side::Remote => self.remote.create_container(name).await,
        };
        match created {
            Ok(container) => {
                tracing::info!("created {side} container '{}'", container.name);
                actions.push(container_record(
                    ActionKind::CreateContainer,
                    side,
                    name,
                    ActionOutcome::Created {
                        identity: container
                            .handle
                            .clone()
                            .unwrap_or_else(|| container.name.clone()),
                    },
                ));
                Some(container)
            }
            Err(err) => {
                tracing::warn!("creating {side} container '{name}' failed: {err}");
                actions.push(container_record(
                    ActionKind::CreateContainer,
                    side,
                    name,
                    ActionOutcome::Failed {
                        message: err.to_string(),
                    },
                ));
                None
            }
        }
    }

    async fn delete_container(&self, side: Side, container: &ContainerRef) -> ActionOutcome {
        let planned = PlannedAction::container(ActionKind::DeleteContainer, side, &container.name);
        if !self.gate.allow(&planned) {
            return ActionOutcome::Skipped;
        }
        let deleted: Result<(), CollaboratorError> = match side {
            Side::Local => self.local.delete_container(container).await,
            Side::Remote => self.remote.delete_container(container).await,
        };
        match deleted {
            Ok(()) => {
                tracing::info!("deleted {side} container '{}'", container.name);
                ActionOutcome::Deleted
            }
            Err(err) if err.is_not_found() => ActionOutcome::AlreadyGone,
            Err(err) => {
                tracing::warn!("deleting {side} container '{}' failed: {err}", container.name);
                ActionOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn forget(&self, local_name: &str, remote_name: &str) -> Result<(), EngineError> {
        self.state
            .clear_snapshot(self.kind, local_name, Side::Local)
            .await?;
        self.state
            .clear_snapshot(self.kind, remote_name, Side::Remote)
            .await?;
        Ok(())
    }
}

/// The policy entry wins; otherwise the direction persisted for this
/// pairing; otherwise no sync.
fn resolve_direction(
    policy: &PairingPolicy,
    previous: &[PairingRecord],
    local_name: &str,
    remote_name: &str,
) -> Direction {
    policy
        .direction_for(local_name)
        .or_else(|| {
            previous
                .iter()
                .find(|record| {
                    record.local_name.as_deref() == Some(local_name)
                        || record.remote_name.as_deref() == Some(remote_name)
                })
                .map(|record| record.direction)
        })
        .unwrap_or_default()
}

fn container_record(
    kind: ActionKind,
    side: Side,
    name: &str,
    outcome: ActionOutcome,
) -> ActionRecord {
    ActionRecord {
        kind,
        side,
        container: name.to_string(),
        item: String::new(),
        outcome,
    }
}
