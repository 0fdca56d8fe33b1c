use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::Result;

use super::db::{Database, TransactionMode};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Creates the schema the first time a store is opened.
pub struct Initializer;

impl Initializer {
    /// Runs the migrations unless the database reports it is already
    /// initialized, then checkpoints the write-ahead log.
    pub fn run<D: Database>(database: &D) -> Result<()> {
        if database.is_initialized() {
            debug!("Database already initialized, skipping schema creation");
            return Ok(());
        }

        database.with_transaction(TransactionMode::Exclusive, init_schema)?;

        let conn = database.connection()?;
        checkpoint(&conn)?;

        Ok(())
    }
}

fn checkpoint(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))?;
    Ok(())
}

/// Initialize the database schema
pub fn init_schema(tx: &Transaction<'_>) -> Result<()> {
    info!("Initializing project storage schema v{}", SCHEMA_VERSION);

    // Create schema version table
    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Check current version
    let current_version: i32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(tx, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(tx: &Transaction<'_>, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration v{}", version);
        match version {
            1 => create_v1_schema(tx)?,
            _ => unreachable!("Unknown schema version: {}", version),
        }

        // Record migration
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

/// Create v1 schema (initial schema)
fn create_v1_schema(tx: &Transaction<'_>) -> Result<()> {
    info!("Creating v1 schema tables");

    tx.execute(
        "CREATE TABLE IF NOT EXISTS sourceContexts (
            sourceContextId INTEGER PRIMARY KEY,
            sourceContextPath TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_sourceContexts_sourceContextPath
         ON sourceContexts(sourceContextPath)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS sources (
            sourceId INTEGER PRIMARY KEY,
            sourceContextId INTEGER NOT NULL
                REFERENCES sourceContexts(sourceContextId) ON DELETE CASCADE,
            sourceName TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_sources_sourceContextId_sourceName
         ON sources(sourceContextId, sourceName)",
        [],
    )?;

    // Prototype references are checked at commit so a synchronization can
    // insert types in any order.
    tx.execute(
        "CREATE TABLE IF NOT EXISTS types (
            typeId INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            accessSemantics INTEGER,
            sourceId INTEGER,
            prototypeId INTEGER
                REFERENCES types(typeId) DEFERRABLE INITIALLY DEFERRED
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_types_name ON types(name)",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS index_types_sourceId ON types(sourceId)",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS index_types_prototypeId ON types(prototypeId)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS exportedTypes (
            qualifiedName TEXT NOT NULL,
            majorVersion INTEGER NOT NULL,
            minorVersion INTEGER NOT NULL,
            typeId INTEGER NOT NULL REFERENCES types(typeId) ON DELETE CASCADE,
            PRIMARY KEY (qualifiedName, majorVersion, minorVersion)
        ) WITHOUT ROWID",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS index_exportedTypes_typeId ON exportedTypes(typeId)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS propertyDeclarations (
            propertyDeclarationId INTEGER PRIMARY KEY,
            typeId INTEGER NOT NULL REFERENCES types(typeId) ON DELETE CASCADE,
            name TEXT NOT NULL,
            propertyTypeId INTEGER,
            propertyTraits INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_propertyDeclarations_typeId_name
         ON propertyDeclarations(typeId, name)",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS index_propertyDeclarations_propertyTypeId
         ON propertyDeclarations(propertyTypeId)",
        [],
    )?;

    // Parameter lists and enumerators are stored as canonical JSON text
    tx.execute(
        "CREATE TABLE IF NOT EXISTS functionDeclarations (
            functionDeclarationId INTEGER PRIMARY KEY,
            typeId INTEGER NOT NULL REFERENCES types(typeId) ON DELETE CASCADE,
            name TEXT NOT NULL,
            returnTypeName TEXT NOT NULL DEFAULT '',
            signature TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_functionDeclarations_typeId_name
         ON functionDeclarations(typeId, name)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS signalDeclarations (
            signalDeclarationId INTEGER PRIMARY KEY,
            typeId INTEGER NOT NULL REFERENCES types(typeId) ON DELETE CASCADE,
            name TEXT NOT NULL,
            signature TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_signalDeclarations_typeId_name
         ON signalDeclarations(typeId, name)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS enumerationDeclarations (
            enumerationDeclarationId INTEGER PRIMARY KEY,
            typeId INTEGER NOT NULL REFERENCES types(typeId) ON DELETE CASCADE,
            name TEXT NOT NULL,
            enumeratorDeclarations TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS index_enumerationDeclarations_typeId_name
         ON enumerationDeclarations(typeId, name)",
        [],
    )?;

    info!("v1 schema created successfully");

    Ok(())
}

/// Drop all tables (for rebuilding)
pub fn drop_schema(conn: &Connection) -> Result<()> {
    info!("Dropping all schema tables");

    // Children first, so no foreign key is left dangling mid-way
    conn.execute_batch(
        "DROP TABLE IF EXISTS enumerationDeclarations;
         DROP TABLE IF EXISTS signalDeclarations;
         DROP TABLE IF EXISTS functionDeclarations;
         DROP TABLE IF EXISTS propertyDeclarations;
         DROP TABLE IF EXISTS exportedTypes;
         DROP TABLE IF EXISTS types;
         DROP TABLE IF EXISTS sources;
         DROP TABLE IF EXISTS sourceContexts;
         DROP TABLE IF EXISTS schema_version;",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemoryDatabase;

    fn table_names(database: &MemoryDatabase) -> Vec<String> {
        let conn = database.connection().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap();
        names
    }

    #[test]
    fn test_init_schema() {
        let database = MemoryDatabase::open().unwrap();
        Initializer::run(&database).unwrap();

        let tables = table_names(&database);
        for table in [
            "enumerationDeclarations",
            "exportedTypes",
            "functionDeclarations",
            "propertyDeclarations",
            "schema_version",
            "signalDeclarations",
            "sourceContexts",
            "sources",
            "types",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_version() {
        let database = MemoryDatabase::open().unwrap();
        Initializer::run(&database).unwrap();

        let version: i32 = database
            .connection()
            .unwrap()
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_init() {
        let database = MemoryDatabase::open().unwrap();

        // Init twice should not error
        Initializer::run(&database).unwrap();
        Initializer::run(&database).unwrap();

        let count: i32 = database
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();

        // Should only have one version record
        assert_eq!(count, 1);
    }

    #[test]
    fn test_drop_schema() {
        let database = MemoryDatabase::open().unwrap();
        Initializer::run(&database).unwrap();
        drop_schema(&database.connection().unwrap()).unwrap();

        assert!(table_names(&database).is_empty());
    }

    #[test]
    fn test_exported_types_key_is_unique() {
        let database = MemoryDatabase::open().unwrap();
        Initializer::run(&database).unwrap();
        let conn = database.connection().unwrap();

        conn.execute("INSERT INTO types(name) VALUES ('Item')", []).unwrap();
        conn.execute(
            "INSERT INTO exportedTypes(qualifiedName, majorVersion, minorVersion, typeId)
             VALUES ('QtQuick.Item', 2, 0, 1)",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO exportedTypes(qualifiedName, majorVersion, minorVersion, typeId)
             VALUES ('QtQuick.Item', 2, 0, 1)",
            [],
        );
        assert!(duplicate.is_err());
    }
}
