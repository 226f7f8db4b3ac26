use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bridgesync_core::state::default_db_path;
use bridgesync_core::{
    Direction, DriverConfig, DryRun, ItemKind, PairingPolicy, RunReport, StateStore, SyncDriver,
};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::directory_store::DirectoryStore;

const DEFAULT_ROOT_DIR_NAME: &str = "BridgeSync";
const DEFAULT_POLL_SECS: u64 = 300;
const DEFAULT_CONCURRENCY: u64 = 1;
const RETRY_BASE: Duration = Duration::from_secs(5);
const DEFAULT_REMINDER_ALIASES: &str = "Reminders=Tasks";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub local_root: PathBuf,
    pub remote_root: PathBuf,
    pub db_path: PathBuf,
    pub kind: ItemKind,
    pub policy: PairingPolicy,
    pub poll_interval: Duration,
    pub concurrency: usize,
    pub dry_run: bool,
    pub prune: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let default_root = home.join(DEFAULT_ROOT_DIR_NAME);
        let local_root = std::env::var("BRIDGESYNC_LOCAL_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| default_root.join("local"));
        let remote_root = std::env::var("BRIDGESYNC_REMOTE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| default_root.join("remote"));
        let db_path = match std::env::var("BRIDGESYNC_DB") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => default_db_path().context("failed to resolve default state database")?,
        };
        let kind = match std::env::var("BRIDGESYNC_KIND") {
            Ok(value) => ItemKind::parse(value.trim())
                .with_context(|| format!("unsupported BRIDGESYNC_KIND: {value}"))?,
            Err(_) => ItemKind::Note,
        };
        let default_aliases = match kind {
            ItemKind::Reminder => DEFAULT_REMINDER_ALIASES,
            ItemKind::Note => "",
        };
        let aliases = std::env::var("BRIDGESYNC_ALIASES")
            .unwrap_or_else(|_| default_aliases.to_string());
        let policy = build_policy(
            &read_list_env("BRIDGESYNC_BIDIRECTIONAL"),
            &read_list_env("BRIDGESYNC_LOCAL_TO_REMOTE"),
            &read_list_env("BRIDGESYNC_REMOTE_TO_LOCAL"),
            &aliases,
        )?;
        let poll_interval =
            Duration::from_secs(read_u64_env("BRIDGESYNC_POLL_SECS", DEFAULT_POLL_SECS));
        let concurrency = read_u64_env("BRIDGESYNC_CONCURRENCY", DEFAULT_CONCURRENCY);
        let dry_run = read_bool_env("BRIDGESYNC_DRY_RUN", false);
        let prune = read_bool_env("BRIDGESYNC_PRUNE", false);

        Ok(Self {
            local_root,
            remote_root,
            db_path,
            kind,
            policy,
            poll_interval,
            concurrency: usize::try_from(concurrency).unwrap_or(usize::MAX),
            dry_run,
            prune,
        })
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            concurrency: self.concurrency.max(1),
            prune: self.prune,
        }
    }

    fn retry_backoff(&self) -> Backoff {
        Backoff::new(RETRY_BASE.min(self.poll_interval), self.poll_interval, true)
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    driver: SyncDriver<DirectoryStore, DirectoryStore>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.local_root)
            .await
            .with_context(|| format!("failed to create local root at {:?}", config.local_root))?;
        tokio::fs::create_dir_all(&config.remote_root)
            .await
            .with_context(|| format!("failed to create remote root at {:?}", config.remote_root))?;
        let state = StateStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open state database at {:?}", config.db_path))?;

        let driver = SyncDriver::new(
            DirectoryStore::new(&config.local_root),
            DirectoryStore::new(&config.remote_root),
            state,
            config.kind,
            config.policy.clone(),
        )
        .with_config(config.driver_config());
        let driver = if config.dry_run {
            driver.with_gate(DryRun)
        } else {
            driver
        };

        Ok(Self { config, driver })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// One full run over every container.
    pub async fn run_once(&self, cancel: &CancellationToken) -> anyhow::Result<RunReport> {
        self.driver
            .run(cancel)
            .await
            .with_context(|| format!("{} sync run failed", self.config.kind))
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            "started: kind={}, local_root={}, remote_root={}, poll={}s, dry_run={}",
            self.config.kind,
            self.config.local_root.display(),
            self.config.remote_root.display(),
            self.config.poll_interval.as_secs(),
            self.config.dry_run
        );
        if self.config.policy.is_empty() {
            tracing::warn!(
                "no container directions configured; only persisted pairings will sync"
            );
        }

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let signal_handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current container");
                shutdown.cancel();
            }
        });

        let backoff = self.config.retry_backoff();
        let mut failed_runs = 0u32;
        while !cancel.is_cancelled() {
            failed_runs = match self.run_once(&cancel).await {
                Ok(report) if report.is_success() => 0,
                Ok(report) => {
                    for outcome in report.failed_containers() {
                        tracing::warn!("{}: {:?}", outcome.container, outcome.status);
                    }
                    failed_runs.saturating_add(1)
                }
                Err(err) => {
                    tracing::error!("{err:#}");
                    failed_runs.saturating_add(1)
                }
            };
            let delay = next_delay(failed_runs, self.config.poll_interval, &backoff);
            if failed_runs > 0 {
                let secs = delay.as_secs();
                tracing::info!("retrying in {secs}s after {failed_runs} failed run(s)");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        signal_handle.abort();
        tracing::info!("stopped");
        Ok(())
    }
}

/// Interval before the next run: the poll interval after a clean run,
/// a backoff step otherwise.
fn next_delay(failed_runs: u32, poll_interval: Duration, backoff: &Backoff) -> Duration {
    if failed_runs == 0 {
        return poll_interval;
    }
    backoff.delay(failed_runs - 1).min(poll_interval)
}

/// Builds the pairing policy from the three direction lists and an alias
/// list of `Local=Remote` pairs.
fn build_policy(
    bidirectional: &[String],
    local_to_remote: &[String],
    remote_to_local: &[String],
    aliases: &str,
) -> anyhow::Result<PairingPolicy> {
    let mut policy = PairingPolicy::new();
    let lists = [
        (Direction::Bidirectional, bidirectional),
        (Direction::LocalToRemote, local_to_remote),
        (Direction::RemoteToLocal, remote_to_local),
    ];
    for (direction, names) in lists {
        for name in names {
            if let Some(existing) = policy.direction_for(name)
                && existing != direction
            {
                anyhow::bail!(
                    "container {name} is listed as both {} and {}",
                    existing.as_str(),
                    direction.as_str()
                );
            }
            policy.set_direction(name.as_str(), direction);
        }
    }
    for (local, remote) in parse_aliases(aliases)? {
        policy.set_alias(local, remote);
    }
    Ok(policy)
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
