use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use projectstorage::config::Config;
use projectstorage::storage::{SourceIds, SourcePathCache, Types};

use super::open_storage;

/// Parsed declarations of a set of files
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub sources: Vec<SnapshotSource>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotSource {
    /// Absolute file path, `directory/file.qml`
    pub path: String,
    #[serde(default)]
    pub types: Types,
}

impl Snapshot {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }
}

pub fn sync_snapshot(config: &Config, db: Option<PathBuf>, snapshot_path: PathBuf) -> Result<()> {
    let snapshot = Snapshot::from_file(&snapshot_path)?;
    let storage = open_storage(config, db)?;
    let cache = SourcePathCache::new(&storage);

    if config.cache.populate_on_start {
        cache.populate()?;
    }

    let mut types = Types::new();
    let mut source_ids = SourceIds::new();

    for source in snapshot.sources {
        let source_id = cache
            .source_id(&source.path)
            .with_context(|| format!("Failed to register source {}", source.path))?;
        source_ids.push(source_id);

        for mut ty in source.types {
            ty.source_id = source_id;
            types.push(ty);
        }
    }

    let type_count = types.len();
    let source_count = source_ids.len();

    storage
        .synchronize_types(types, &source_ids)
        .context("Synchronization failed")?;

    info!("Synchronized {} types from {} sources", type_count, source_count);
    println!("Synchronized {} types from {} sources", type_count, source_count);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use projectstorage::storage::{AccessSemantics, DeclarationTraits};

    #[test]
    fn test_parse_snapshot() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{
                "sources": [{
                    "path": "/qml/QtQuick/Item.qml",
                    "types": [{
                        "type_name": "QQuickItem",
                        "prototype": "QObject",
                        "access_semantics": "reference",
                        "exported_types": [
                            {"qualified_type_name": "QtQuick.Item", "version": {"major": 2, "minor": 0}}
                        ],
                        "property_declarations": [
                            {"name": "children", "type_name": "QQuickItem", "traits": "LIST"}
                        ]
                    }]
                }, {
                    "path": "/qml/QtQuick/Empty.qml"
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(snapshot.sources.len(), 2);
        let ty = &snapshot.sources[0].types[0];
        assert_eq!(ty.type_name, "QQuickItem");
        assert_eq!(ty.access_semantics, AccessSemantics::Reference);
        assert_eq!(ty.exported_types[0].version.major.0, 2);
        assert_eq!(
            ty.property_declarations[0].traits,
            DeclarationTraits::LIST
        );
        assert!(snapshot.sources[1].types.is_empty());
    }
}
