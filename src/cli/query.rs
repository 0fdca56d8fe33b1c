use anyhow::{anyhow, Result};
use std::path::PathBuf;

use projectstorage::config::Config;
use projectstorage::storage::{Database, ProjectStorage, TypeId, Version};

use super::open_storage;

fn requested_version(major: Option<i64>, minor: Option<i64>) -> Version {
    match (major, minor) {
        (Some(major), Some(minor)) => Version::new(major, minor),
        (Some(major), None) => Version::major(major),
        _ => Version::default(),
    }
}

fn resolve_type_id<D: Database>(
    storage: &ProjectStorage<D>,
    qualified_name: &str,
    version: Version,
) -> Result<TypeId> {
    let type_id = storage.fetch_type_id_by_qualified_name_and_version(qualified_name, version)?;
    if type_id.is_valid() {
        Ok(type_id)
    } else {
        Err(anyhow!("No type exported as '{}'", qualified_name))
    }
}

fn type_name<D: Database>(storage: &ProjectStorage<D>, type_id: TypeId) -> Result<String> {
    Ok(storage
        .fetch_type_by_type_id(type_id)?
        .map(|ty| ty.type_name)
        .unwrap_or_else(|| format!("<unknown {}>", type_id)))
}

pub fn list_types(config: &Config, db: Option<PathBuf>, format: String) -> Result<()> {
    let storage = open_storage(config, db)?;
    let types = storage.fetch_types()?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&types)?),
        "text" => {
            for ty in &types {
                let exports: Vec<String> = ty
                    .exported_types
                    .iter()
                    .map(|exported| {
                        format!(
                            "{} {}.{}",
                            exported.qualified_type_name, exported.version.major.0, exported.version.minor.0
                        )
                    })
                    .collect();

                println!(
                    "{:>6}  {}{}  [{}]",
                    ty.type_id,
                    ty.type_name,
                    if ty.prototype.is_empty() {
                        String::new()
                    } else {
                        format!(" : {}", ty.prototype)
                    },
                    exports.join(", ")
                );
            }
        }
        _ => return Err(anyhow!("Unknown format: {}", format)),
    }

    Ok(())
}

pub fn resolve(
    config: &Config,
    db: Option<PathBuf>,
    qualified_name: String,
    major: Option<i64>,
    minor: Option<i64>,
) -> Result<()> {
    let storage = open_storage(config, db)?;
    let type_id = resolve_type_id(&storage, &qualified_name, requested_version(major, minor))?;

    println!("{} -> {} ({})", qualified_name, type_name(&storage, type_id)?, type_id);

    Ok(())
}

pub fn prototypes(
    config: &Config,
    db: Option<PathBuf>,
    qualified_name: String,
    major: Option<i64>,
    minor: Option<i64>,
) -> Result<()> {
    let storage = open_storage(config, db)?;
    let type_id = resolve_type_id(&storage, &qualified_name, requested_version(major, minor))?;

    for (depth, prototype_id) in storage.fetch_prototypes(type_id)?.enumerate() {
        println!("{}{}", "  ".repeat(depth), type_name(&storage, prototype_id)?);
    }

    Ok(())
}
