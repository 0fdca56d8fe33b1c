//! SQLite-backed store for QML type metadata.

pub mod db;
pub mod ids;
pub mod merge;
pub mod project_storage;
pub mod schema;
pub mod source_path_cache;
pub mod types;

pub use db::{Database, MemoryDatabase, PooledDatabase, TransactionMode};
pub use ids::*;
pub use project_storage::{ProjectStorage, Prototypes, StorageStats};
pub use source_path_cache::{
    Source, SourceContext, SourceNameAndSourceContextId, SourcePathCache, SourcePathStorage,
};
pub use types::*;
