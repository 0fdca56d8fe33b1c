use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use projectstorage::config::Config;

use super::open_storage;

pub fn init_storage(config: &Config, db: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(config, db)?;

    info!("Storage ready at {}", storage.database().path().display());
    println!("Initialized {}", storage.database().path().display());

    Ok(())
}
