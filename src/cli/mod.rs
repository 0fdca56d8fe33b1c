// CLI command implementations

pub mod init;
pub mod query;
pub mod stats;
pub mod sync;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use projectstorage::config::Config;
use projectstorage::storage::{PooledDatabase, ProjectStorage};

/// Opens the store named by `--db`, or by the project configuration.
pub fn open_storage(
    config: &Config,
    db_override: Option<PathBuf>,
) -> Result<ProjectStorage<PooledDatabase>> {
    let db_path = db_override.unwrap_or_else(|| config.database.path.clone());
    debug!("Using database {}", db_path.display());

    let database = PooledDatabase::open(&db_path, &config.database)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    ProjectStorage::new(database).context("Failed to initialize project storage")
}
