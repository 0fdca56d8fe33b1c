use anyhow::Result;
use std::path::PathBuf;

use projectstorage::config::Config;

use super::open_storage;

pub fn show_stats(config: &Config, db: Option<PathBuf>, verbose: bool) -> Result<()> {
    let storage = open_storage(config, db)?;
    let stats = storage.fetch_stats()?;

    println!("Project Storage Statistics");
    println!("Database: {}", storage.database().path().display());

    println!("\n📊 Types:");
    println!("  Types: {}", stats.types);
    println!("  Exported names: {}", stats.exported_types);

    println!("\n📄 Declarations:");
    println!("  Properties: {}", stats.property_declarations);
    println!("  Functions: {}", stats.function_declarations);
    println!("  Signals: {}", stats.signal_declarations);
    println!("  Enumerations: {}", stats.enumeration_declarations);

    println!("\n📁 Sources:");
    println!("  Directories: {}", stats.source_contexts);
    println!("  Files: {}", stats.sources);

    let db_size = get_db_size(storage.database().path())?;
    println!("  Database size: {:.2} MB", db_size);

    if verbose {
        println!("\n📈 Directories:");
        for context in storage.fetch_all_source_contexts()? {
            println!("  {:>6}  {}", context.id, context.path);
        }
    }

    Ok(())
}

fn get_db_size(db_path: &std::path::Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    let size_bytes = metadata.len() as f64;
    let size_mb = size_bytes / (1024.0 * 1024.0);
    Ok(size_mb)
}
