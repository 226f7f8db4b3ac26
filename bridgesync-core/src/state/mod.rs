//! Durable engine memory: the pairing table and per-side snapshots.
//!
//! Both tables are rewritten wholesale (delete matching rows, insert current
//! rows) inside one transaction, so a failed write leaves the previous state
//! intact.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use sqlx::{SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

mod pairing;
mod snapshot;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid direction: {0}")]
    InvalidDirection(String),
}

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StateError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf, StateError> {
    let mut path = dirs::data_dir().ok_or(StateError::MissingDataDir)?;
    path.push("bridgesync");
    path.push("state.db");
    Ok(path)
}
