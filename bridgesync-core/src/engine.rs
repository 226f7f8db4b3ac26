//! The reconciliation driver.
//!
//! A run pairs containers, then walks every pairing through one pass:
//! enumerate both sides, mirror deletions inferred from the last snapshot,
//! match items, resolve each match and apply the result. The snapshot only
//! advances when the whole pass went through, so anything left undone is
//! picked up again on the next run.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemAdapter, adapter_for};
use crate::collaborator::{CollaboratorError, SideStore};
use crate::deletion::{DeletionTarget, Propagation, detect_removed};
use crate::gate::{ActionGate, AllowAll, PlannedAction};
use crate::matcher::pair_up;
use crate::model::{Container, ContainerRef, Direction, Item, ItemKind, Side, SnapshotEntry};
use crate::pairer::{ContainerPairer, PairingPolicy};
use crate::report::{
    ActionKind, ActionOutcome, ActionRecord, ContainerOutcome, PassStatus, RunReport,
};
use crate::resolver::{MatchedPair, Resolution, resolve};
use crate::state::{StateError, StateStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("{side} side error: {source}")]
    Collaborator {
        side: Side,
        source: CollaboratorError,
    },
    #[error("a pass over {0} is already in flight")]
    PassInFlight(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    Idle,
    Enumerating,
    DetectingDeletions,
    Matching,
    Resolving,
    Applying,
    Persisting,
    Failed,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Idle => "idle",
            PassState::Enumerating => "enumerating",
            PassState::DetectingDeletions => "detecting_deletions",
            PassState::Matching => "matching",
            PassState::Resolving => "resolving",
            PassState::Applying => "applying",
            PassState::Persisting => "persisting",
            PassState::Failed => "failed",
        }
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Container passes allowed to run at once.
    pub concurrency: usize,
    /// Delete prunable local items (completed reminders) on bidirectional
    /// pairings and mirror the deletion.
    pub prune: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            prune: false,
        }
    }
}

pub struct SyncDriver<L, R> {
    local: L,
    remote: R,
    state: StateStore,
    adapter: Box<dyn ItemAdapter>,
    policy: PairingPolicy,
    gate: Box<dyn ActionGate>,
    config: DriverConfig,
    in_flight: Mutex<HashSet<String>>,
}

/// Working copies of both enumerations, kept current as actions land.
struct Views {
    local: Vec<Item>,
    remote: Vec<Item>,
}

impl Views {
    fn get(&self, side: Side) -> &Vec<Item> {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    fn get_mut(&mut self, side: Side) -> &mut Vec<Item> {
        match side {
            Side::Local => &mut self.local,
            Side::Remote => &mut self.remote,
        }
    }

    fn entries(&self, side: Side) -> Vec<SnapshotEntry> {
        self.get(side).iter().map(Item::snapshot_entry).collect()
    }
}

struct Pass<'a> {
    label: String,
    direction: Direction,
    local: &'a ContainerRef,
    remote: &'a ContainerRef,
    state: PassState,
    actions: Vec<ActionRecord>,
    failures: Vec<String>,
    /// The gate refused a deletion or write; the snapshot must not move.
    held: bool,
}

impl<'a> Pass<'a> {
    fn enter(&mut self, state: PassState) {
        tracing::debug!("{}: {} -> {}", self.label, self.state, state);
        self.state = state;
    }

    fn container(&self, side: Side) -> &'a ContainerRef {
        match side {
            Side::Local => self.local,
            Side::Remote => self.remote,
        }
    }

    fn record(&mut self, kind: ActionKind, side: Side, item: &str, outcome: ActionOutcome) {
        self.actions.push(ActionRecord {
            kind,
            side,
            container: self.container(side).name.clone(),
            item: item.to_string(),
            outcome,
        });
    }

    fn fail(&mut self, kind: ActionKind, side: Side, item: &str, err: CollaboratorError) {
        tracing::warn!(
            "{} {side} item '{item}' in '{}' failed: {err}",
            kind.as_str(),
            self.container(side).name
        );
        self.failures
            .push(format!("{} {side} '{item}': {err}", kind.as_str()));
        self.record(
            kind,
            side,
            item,
            ActionOutcome::Failed {
                message: err.to_string(),
            },
        );
    }

    fn absorb(
        &mut self,
        side: Side,
        round: Result<Propagation, (Propagation, CollaboratorError)>,
    ) -> Result<(), EngineError> {
        match round {
            Ok(round) => {
                self.held |= round.refused;
                self.actions.extend(round.actions);
                Ok(())
            }
            Err((round, source)) => {
                self.actions.extend(round.actions);
                Err(EngineError::Collaborator { side, source })
            }
        }
    }
}

struct InFlight<'a> {
    registry: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.key);
    }
}

struct Step {
    local: Option<usize>,
    remote: Option<usize>,
    resolution: Resolution,
    /// Side that still has to adopt the other side's identity.
    relink: Option<(Side, String)>,
}

impl<L, R> SyncDriver<L, R>
where
    L: SideStore,
    R: SideStore,
{
    pub fn new(
        local: L,
        remote: R,
        state: StateStore,
        kind: ItemKind,
        policy: PairingPolicy,
    ) -> Self {
        Self {
            local,
            remote,
            state,
            adapter: adapter_for(kind),
            policy,
            gate: Box::new(AllowAll),
            config: DriverConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_gate(mut self, gate: impl ActionGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kind(&self) -> ItemKind {
        self.adapter.kind()
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// One full run: pairing, then a pass per container.
    ///
    /// Fails only when containers cannot be listed or the pairing table
    /// cannot be read or written; everything per container lands in the
    /// report instead.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, EngineError> {
        let mut report = RunReport::default();
        if cancel.is_cancelled() {
            tracing::info!("{} sync cancelled before pairing", self.kind());
            return Ok(report);
        }

        let pairing = ContainerPairer {
            local: &self.local,
            remote: &self.remote,
            state: &self.state,
            kind: self.kind(),
            policy: &self.policy,
            gate: self.gate.as_ref(),
        }
        .run()
        .await?;
        report.pairing = pairing.actions;

        report.containers = stream::iter(pairing.containers.iter())
            .map(|container| self.run_scheduled(container, cancel))
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        tracing::info!("{} sync finished: {report}", self.kind());
        Ok(report)
    }

    async fn run_scheduled(
        &self,
        container: &Container,
        cancel: &CancellationToken,
    ) -> ContainerOutcome {
        if cancel.is_cancelled() {
            tracing::info!("{container}: cancelled");
            return outcome(container, PassStatus::Cancelled, Vec::new());
        }
        match self.run_container(container).await {
            Ok(outcome) => outcome,
            Err(err) => outcome(
                container,
                PassStatus::Skipped {
                    reason: err.to_string(),
                },
                Vec::new(),
            ),
        }
    }

    /// Reconciles one paired container. Only refuses to start when another
    /// pass over the same pairing is still running.
    pub async fn run_container(
        &self,
        container: &Container,
    ) -> Result<ContainerOutcome, EngineError> {
        if container.direction.is_none() {
            return Ok(skipped(container, "sync disabled"));
        }
        let (Some(local), Some(remote)) = (container.local.as_ref(), container.remote.as_ref())
        else {
            let missing = if container.local.is_none() { "local" } else { "remote" };
            return Ok(skipped(container, &format!("no {missing} container")));
        };

        let label = container.to_string();
        let _guard = self
            .claim(container.pass_key())
            .ok_or_else(|| EngineError::PassInFlight(label.clone()))?;

        let mut pass = Pass {
            label,
            direction: container.direction,
            local,
            remote,
            state: PassState::Idle,
            actions: Vec::new(),
            failures: Vec::new(),
            held: false,
        };
        tracing::info!("sync pass started: {container} ({})", container.direction);

        let status = match self.reconcile(&mut pass).await {
            Ok(()) if pass.failures.is_empty() => {
                pass.enter(PassState::Idle);
                PassStatus::Completed
            }
            Ok(()) => {
                pass.enter(PassState::Failed);
                PassStatus::Failed {
                    state: PassState::Applying,
                    error: pass.failures.join("; "),
                }
            }
            Err(err) => {
                tracing::warn!("{}: pass failed while {}: {err}", pass.label, pass.state);
                let state = pass.state;
                pass.enter(PassState::Failed);
                PassStatus::Failed {
                    state,
                    error: err.to_string(),
                }
            }
        };
        tracing::info!(
            "sync pass done: {} ({} actions)",
            pass.label,
            pass.actions.len()
        );
        Ok(outcome(container, status, pass.actions))
    }

    fn claim(&self, key: String) -> Option<InFlight<'_>> {
        let mut registry = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !registry.insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            registry: &self.in_flight,
            key,
        })
    }

    async fn reconcile(&self, pass: &mut Pass<'_>) -> Result<(), EngineError> {
        let kind = self.kind();

        pass.enter(PassState::Enumerating);
        let local = self
            .local
            .list(pass.local)
            .await
            .map_err(|source| EngineError::Collaborator {
                side: Side::Local,
                source,
            })?;
        let remote = self
            .remote
            .list(pass.remote)
            .await
            .map_err(|source| EngineError::Collaborator {
                side: Side::Remote,
                source,
            })?;
        let mut views = Views { local, remote };
        let pruned = if self.config.prune && pass.direction == Direction::Bidirectional {
            self.prune(pass, &mut views.local).await?
        } else {
            Vec::new()
        };

        pass.enter(PassState::DetectingDeletions);
        let previous_local = self
            .state
            .load_snapshot(kind, &pass.local.name, Side::Local)
            .await?;
        let previous_remote = self
            .state
            .load_snapshot(kind, &pass.remote.name, Side::Remote)
            .await?;
        let mut removed_local = detect_removed(previous_local.as_deref(), &views.local);
        for entry in pruned {
            if !removed_local.contains(&entry) {
                removed_local.push(entry);
            }
        }
        let removed_remote = detect_removed(previous_remote.as_deref(), &views.remote);

        let observed_removals = [
            (Side::Local, &removed_local),
            (Side::Remote, &removed_remote),
        ];
        for (observed, removed) in observed_removals {
            if removed.is_empty() {
                continue;
            }
            if !pass.direction.propagates_deletions_from(observed) {
                tracing::debug!(
                    "{}: {} {observed} deletion(s) not mirrored ({})",
                    pass.label,
                    removed.len(),
                    pass.direction
                );
                continue;
            }
            let target = observed.other();
            let round = match target {
                Side::Local => {
                    DeletionTarget {
                        store: &self.local,
                        side: target,
                        container: pass.local,
                        adapter: self.adapter.as_ref(),
                        gate: self.gate.as_ref(),
                    }
                    .propagate(removed, &mut views.local)
                    .await
                }
                Side::Remote => {
                    DeletionTarget {
                        store: &self.remote,
                        side: target,
                        container: pass.remote,
                        adapter: self.adapter.as_ref(),
                        gate: self.gate.as_ref(),
                    }
                    .propagate(removed, &mut views.remote)
                    .await
                }
            };
            pass.absorb(target, round)?;
        }
        if (!removed_local.is_empty() || !removed_remote.is_empty()) && !pass.held {
            self.save_snapshots(pass, &views).await?;
        }

        pass.enter(PassState::Matching);
        let pairs = pair_up(&views.local, &views.remote);

        pass.enter(PassState::Resolving);
        let mut steps = Vec::with_capacity(pairs.len());
        for (local, remote) in pairs {
            let Some(pair) = MatchedPair::from_options(
                local.map(|index| &views.local[index]),
                remote.map(|index| &views.remote[index]),
            ) else {
                continue;
            };
            let relink = match (local, remote) {
                (Some(l), Some(r)) => {
                    relink_target(&views.local[l], &views.remote[r], pass.direction)
                }
                _ => None,
            };
            let resolution = resolve(pair, pass.direction, self.adapter.as_ref());
            if resolution != Resolution::NoOp || relink.is_some() {
                steps.push(Step {
                    local,
                    remote,
                    resolution,
                    relink,
                });
            }
        }

        pass.enter(PassState::Applying);
        for mut step in steps {
            let relink = step.relink.take();
            let (local, remote) = (step.local, step.remote);
            let failed = pass.failures.len();
            self.apply(pass, &mut views, step).await;
            let Some((origin, identity)) = relink else {
                continue;
            };
            let index = match origin {
                Side::Local => local,
                Side::Remote => remote,
            };
            if let Some(index) = index
                && pass.failures.len() == failed
            {
                self.feed_back(pass, &mut views, origin, index, &identity).await;
            }
        }

        pass.enter(PassState::Persisting);
        if !pass.failures.is_empty() {
            tracing::info!(
                "{}: snapshot kept, {} action(s) failed",
                pass.label,
                pass.failures.len()
            );
        } else if pass.held {
            tracing::info!("{}: snapshot kept, some actions were refused", pass.label);
        } else {
            self.save_snapshots(pass, &views).await?;
        }
        Ok(())
    }

    async fn prune(
        &self,
        pass: &mut Pass<'_>,
        items: &mut Vec<Item>,
    ) -> Result<Vec<SnapshotEntry>, EngineError> {
        let mut pruned = Vec::new();
        let mut index = 0;
        while index < items.len() {
            if !self.adapter.is_prunable(&items[index]) {
                index += 1;
                continue;
            }
            let name = items[index].display_name.clone();
            let planned =
                PlannedAction::item(ActionKind::Prune, Side::Local, &pass.local.name, &name);
            if !self.gate.allow(&planned) {
                pass.record(
                    ActionKind::Prune,
                    Side::Local,
                    &name,
                    ActionOutcome::Skipped,
                );
                index += 1;
                continue;
            }
            let outcome = match self.local.delete(pass.local, &items[index]).await {
                Ok(()) => ActionOutcome::Deleted,
                Err(err) if err.is_not_found() => ActionOutcome::AlreadyGone,
                Err(source) => {
                    return Err(EngineError::Collaborator {
                        side: Side::Local,
                        source,
                    });
                }
            };
            tracing::info!("pruned local item '{name}' from '{}'", pass.local.name);
            pass.record(ActionKind::Prune, Side::Local, &name, outcome);
            pruned.push(items.remove(index).snapshot_entry());
        }
        Ok(pruned)
    }

    async fn apply(&self, pass: &mut Pass<'_>, views: &mut Views, step: Step) {
        let Step {
            local,
            remote,
            resolution,
            ..
        } = step;
        let index_on = |side: Side| match side {
            Side::Local => local,
            Side::Remote => remote,
        };
        let name = match &resolution {
            Resolution::Create { seed, .. } | Resolution::Update { seed, .. } => {
                seed.display_name.clone()
            }
            Resolution::Suppressed { target } => {
                let present = target.other();
                index_on(present)
                    .map(|index| views.get(present)[index].display_name.clone())
                    .unwrap_or_default()
            }
            Resolution::NoOp => return,
        };

        match resolution {
            Resolution::NoOp => {}
            Resolution::Suppressed { target } => {
                let kind = if index_on(target).is_some() {
                    ActionKind::Update
                } else {
                    ActionKind::Create
                };
                tracing::debug!(
                    "{}: not writing '{name}' to {target} ({})",
                    pass.label,
                    pass.direction
                );
                pass.record(kind, target, &name, ActionOutcome::Skipped);
            }
            Resolution::Create { target, seed } => {
                let planned = PlannedAction::item(
                    ActionKind::Create,
                    target,
                    &pass.container(target).name,
                    &name,
                );
                if !self.gate.allow(&planned) {
                    pass.held = true;
                    pass.record(
                        ActionKind::Create,
                        target,
                        &name,
                        ActionOutcome::Skipped,
                    );
                    return;
                }
                match self.create_on(target, pass.container(target), &seed).await {
                    Ok(identity) => {
                        tracing::info!(
                            "created {target} item '{name}' in '{}' as {identity}",
                            pass.container(target).name
                        );
                        pass.record(
                            ActionKind::Create,
                            target,
                            &name,
                            ActionOutcome::Created {
                                identity: identity.clone(),
                            },
                        );
                        views
                            .get_mut(target)
                            .push(seed.with_identity(identity.clone()));
                        if let Some(index) = index_on(target.other()) {
                            self.feed_back(pass, views, target.other(), index, &identity)
                                .await;
                        }
                    }
                    Err(err) => pass.fail(ActionKind::Create, target, &name, err),
                }
            }
            Resolution::Update { target, seed } => {
                let Some(index) = index_on(target) else {
                    return;
                };
                let planned = PlannedAction::item(
                    ActionKind::Update,
                    target,
                    &pass.container(target).name,
                    &name,
                );
                if !self.gate.allow(&planned) {
                    pass.held = true;
                    pass.record(
                        ActionKind::Update,
                        target,
                        &name,
                        ActionOutcome::Skipped,
                    );
                    return;
                }
                let current = views.get(target)[index].clone();
                let container = pass.container(target);
                match self.update_on(target, container, &current, &seed).await {
                    Ok(()) => {
                        tracing::info!(
                            "updated {target} item '{name}' in '{}'",
                            pass.container(target).name
                        );
                        pass.record(
                            ActionKind::Update,
                            target,
                            &name,
                            ActionOutcome::Updated,
                        );
                        views.get_mut(target)[index] = seed;
                    }
                    Err(err) => pass.fail(ActionKind::Update, target, &name, err),
                }
            }
        }
    }

    /// Moves the origin item onto the identity the other side holds it under
    /// so later passes match on identity instead of display name. The item is
    /// addressed by its current identity, never by name.
    async fn feed_back(
        &self,
        pass: &mut Pass<'_>,
        views: &mut Views,
        origin: Side,
        index: usize,
        identity: &str,
    ) {
        let current = views.get(origin)[index].clone();
        if current.identity() == Some(identity) || !pass.direction.writes_to(origin) {
            return;
        }
        let updated = current.clone().with_identity(identity);
        let name = updated.display_name.clone();

        let planned = PlannedAction::item(
            ActionKind::IdentityFeedback,
            origin,
            &pass.container(origin).name,
            &name,
        );
        if !self.gate.allow(&planned) {
            pass.held = true;
            pass.record(
                ActionKind::IdentityFeedback,
                origin,
                &name,
                ActionOutcome::Skipped,
            );
            return;
        }
        let container = pass.container(origin);
        match self.update_on(origin, container, &current, &updated).await {
            Ok(()) => {
                tracing::debug!("{origin} item '{name}' now carries identity {identity}");
                pass.record(
                    ActionKind::IdentityFeedback,
                    origin,
                    &name,
                    ActionOutcome::Updated,
                );
                views.get_mut(origin)[index] = updated;
            }
            Err(err) => pass.fail(ActionKind::IdentityFeedback, origin, &name, err),
        }
    }

    async fn create_on(
        &self,
        side: Side,
        container: &ContainerRef,
        item: &Item,
    ) -> Result<String, CollaboratorError> {
        match side {
            Side::Local => self.local.create(container, item).await,
            Side::Remote => self.remote.create(container, item).await,
        }
    }

    async fn update_on(
        &self,
        side: Side,
        container: &ContainerRef,
        current: &Item,
        item: &Item,
    ) -> Result<(), CollaboratorError> {
        match side {
            Side::Local => self.local.update(container, current, item).await,
            Side::Remote => self.remote.update(container, current, item).await,
        }
    }

    /// Both sides go in one transaction; either both snapshots advance or
    /// neither does.
    async fn save_snapshots(&self, pass: &Pass<'_>, views: &Views) -> Result<(), EngineError> {
        let local = views.entries(Side::Local);
        let remote = views.entries(Side::Remote);
        self.state
            .save_snapshots(
                self.kind(),
                &[
                    (pass.local.name.as_str(), Side::Local, local.as_slice()),
                    (pass.remote.name.as_str(), Side::Remote, remote.as_slice()),
                ],
            )
            .await?;
        tracing::debug!("{}: snapshot saved", pass.label);
        Ok(())
    }
}

/// For a pair matched on display name whose identities disagree, the side
/// that should adopt the other side's identity. The local side adopts the
/// remote identity when it may be written to.
fn relink_target(local: &Item, remote: &Item, direction: Direction) -> Option<(Side, String)> {
    if local.identity() == remote.identity() {
        return None;
    }
    if let Some(identity) = remote.identity()
        && direction.writes_to(Side::Local)
    {
        return Some((Side::Local, identity.to_string()));
    }
    match local.identity() {
        Some(identity) if direction.writes_to(Side::Remote) => {
            Some((Side::Remote, identity.to_string()))
        }
        _ => None,
    }
}

fn outcome(
    container: &Container,
    status: PassStatus,
    actions: Vec<ActionRecord>,
) -> ContainerOutcome {
    ContainerOutcome {
        container: container.to_string(),
        direction: container.direction,
        status,
        actions,
    }
}

fn skipped(container: &Container, reason: &str) -> ContainerOutcome {
    tracing::debug!("{container}: skipped, {reason}");
    outcome(
        container,
        PassStatus::Skipped {
            reason: reason.to_string(),
        },
        Vec::new(),
    )
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
