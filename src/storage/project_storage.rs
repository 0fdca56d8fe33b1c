use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StorageError};

use super::db::{Database, TransactionMode};
use super::ids::{
    InternalId, PropertyDeclarationId, SourceContextId, SourceId, TypeId, TypeIds,
};
use super::merge::insert_update_delete;
use super::schema::Initializer;
use super::source_path_cache::{
    Source, SourceContext, SourceNameAndSourceContextId, SourcePathStorage,
};
use super::types::{
    encode_enumerators, encode_parameters, AccessSemantics, EnumerationDeclaration,
    EnumerationDeclarationView, EnumerationDeclarations, EnumeratorDeclaration, ExportedType,
    FunctionDeclaration, FunctionDeclarationView, FunctionDeclarations, ParameterDeclaration,
    PropertyDeclaration, PropertyDeclarationView, PropertyDeclarations, SignalDeclaration,
    SignalDeclarationView, SignalDeclarations, Type, Types, Version,
};

/// Ancestor chain of a type, the type itself first.
pub type Prototypes = std::vec::IntoIter<TypeId>;

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub types: usize,
    pub exported_types: usize,
    pub property_declarations: usize,
    pub function_declarations: usize,
    pub signal_declarations: usize,
    pub enumeration_declarations: usize,
    pub source_contexts: usize,
    pub sources: usize,
}

/// Type metadata store on top of a [`Database`].
pub struct ProjectStorage<D: Database> {
    database: D,
}

impl<D: Database> ProjectStorage<D> {
    /// Wraps `database`, creating the schema unless the database reports it
    /// was initialized before.
    pub fn new(database: D) -> Result<Self> {
        Initializer::run(&database)?;
        Ok(Self { database })
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    /// Makes the store match `types` for the sources in `source_ids`: types
    /// those sources no longer declare are removed, the rest are upserted and
    /// their declarations reconciled.
    pub fn synchronize_types(&self, mut types: Types, source_ids: &[SourceId]) -> Result<()> {
        info!(
            "Synchronizing {} types for {} sources",
            types.len(),
            source_ids.len()
        );

        self.database
            .with_transaction(TransactionMode::Immediate, |tx| {
                let mut updated_type_ids = TypeIds::with_capacity(types.len());

                for ty in &mut types {
                    updated_type_ids.push(sync_type(tx, ty)?);
                }

                delete_not_updated_types(tx, &updated_type_ids, source_ids)?;
                prune_unfilled_placeholders(tx, &updated_type_ids)?;

                Ok(())
            })
    }

    /// Inserts or updates a type by name. The type's source is left alone.
    pub fn upsert_type(
        &self,
        name: &str,
        prototype_id: TypeId,
        access_semantics: AccessSemantics,
        exported_types: &[ExportedType],
    ) -> Result<TypeId> {
        debug!("Upserting type: {}", name);

        self.database
            .with_transaction(TransactionMode::Immediate, |tx| {
                let type_id: TypeId = tx
                    .prepare_cached(
                        "INSERT INTO types(name, accessSemantics, prototypeId) VALUES(?1, ?2, ?3)
                         ON CONFLICT(name) DO UPDATE SET
                            accessSemantics=excluded.accessSemantics,
                            prototypeId=excluded.prototypeId
                         RETURNING typeId",
                    )?
                    .query_row(params![name, access_semantics, prototype_id], |row| row.get(0))?;

                for exported_type in exported_types {
                    upsert_exported_type(tx, exported_type, type_id)?;
                }

                Ok(type_id)
            })
    }

    pub fn upsert_property_declaration(
        &self,
        type_id: TypeId,
        name: &str,
        property_type_id: TypeId,
    ) -> Result<PropertyDeclarationId> {
        debug!("Upserting property declaration {} on type {}", name, type_id);

        self.database
            .with_transaction(TransactionMode::Immediate, |tx| {
                let id = tx
                    .prepare_cached(
                        "INSERT INTO propertyDeclarations(typeId, name, propertyTypeId, propertyTraits)
                         VALUES(?1, ?2, ?3, 0)
                         ON CONFLICT(typeId, name) DO UPDATE SET
                            propertyTypeId=excluded.propertyTypeId,
                            propertyTraits=excluded.propertyTraits
                         RETURNING propertyDeclarationId",
                    )?
                    .query_row(params![type_id, name, property_type_id], |row| row.get(0))?;

                Ok(id)
            })
    }

    /// Nearest declaration named `name` on `type_id` or one of its
    /// prototypes; invalid if none of them declares it.
    pub fn fetch_property_declaration_by_type_id_and_name(
        &self,
        type_id: TypeId,
        name: &str,
    ) -> Result<PropertyDeclarationId> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let max_depth = type_count(tx)?;

                let id = tx
                    .prepare_cached(
                        "WITH RECURSIVE
                           typeChain(typeId, level) AS (
                               VALUES(?1, 0)
                             UNION ALL
                               SELECT types.prototypeId, typeChain.level + 1
                               FROM types JOIN typeChain USING(typeId)
                               WHERE types.prototypeId IS NOT NULL AND typeChain.level < ?3)
                         SELECT propertyDeclarationId
                         FROM propertyDeclarations JOIN typeChain USING(typeId)
                         WHERE name=?2
                         ORDER BY typeChain.level
                         LIMIT 1",
                    )?
                    .query_row(params![type_id, name, max_depth], |row| row.get(0))
                    .optional()?;

                Ok(id.unwrap_or_default())
            })
    }

    /// Resolves an exported name. Picks the export with the requested major
    /// version and the greatest minor version not above the requested one;
    /// an unspecified minor version picks the newest. The default version
    /// finds unversioned exports.
    pub fn fetch_type_id_by_qualified_name_and_version(
        &self,
        name: &str,
        version: Version,
    ) -> Result<TypeId> {
        let minor = if version.major.is_valid() && !version.minor.is_valid() {
            i64::MAX
        } else {
            version.minor.0
        };

        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let id = tx
                    .prepare_cached(
                        "SELECT typeId FROM exportedTypes
                         WHERE qualifiedName=?1 AND majorVersion=?2 AND minorVersion<=?3
                         ORDER BY minorVersion DESC
                         LIMIT 1",
                    )?
                    .query_row(params![name, version.major.0, minor], |row| row.get(0))
                    .optional()?;

                Ok(id.unwrap_or_default())
            })
    }

    /// Looks a type up by its unqualified name without creating it.
    pub fn fetch_type_id_by_name(&self, name: &str) -> Result<TypeId> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                Ok(select_type_id_by_name(tx, name)?.unwrap_or_default())
            })
    }

    /// True if `prototype_id` is `type_id` or one of its ancestors.
    pub fn fetch_is_prototype(&self, type_id: TypeId, prototype_id: TypeId) -> Result<bool> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let found = tx
                    .prepare_cached(
                        "WITH RECURSIVE
                           typeChain(typeId) AS (
                               VALUES(?1)
                             UNION
                               SELECT prototypeId FROM types JOIN typeChain USING(typeId)
                               WHERE prototypeId IS NOT NULL)
                         SELECT 1 FROM typeChain WHERE typeId=?2 LIMIT 1",
                    )?
                    .query_row(params![type_id, prototype_id], |_| Ok(()))
                    .optional()?;

                Ok(found.is_some())
            })
    }

    pub fn fetch_prototypes(&self, type_id: TypeId) -> Result<Prototypes> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let max_depth = type_count(tx)?;

                let mut stmt = tx.prepare_cached(
                    "WITH RECURSIVE
                       typeChain(typeId, level) AS (
                           VALUES(?1, 0)
                         UNION ALL
                           SELECT types.prototypeId, typeChain.level + 1
                           FROM types JOIN typeChain USING(typeId)
                           WHERE types.prototypeId IS NOT NULL AND typeChain.level < ?2)
                     SELECT typeId FROM typeChain WHERE typeId IS NOT NULL ORDER BY level",
                )?;

                let prototypes = stmt
                    .query_map(params![type_id, max_depth], |row| row.get(0))?
                    .collect::<std::result::Result<TypeIds, _>>()?;

                Ok(prototypes.into_iter())
            })
    }

    /// Fetches a type with its exported names and all nested declarations.
    pub fn fetch_type_by_type_id(&self, type_id: TypeId) -> Result<Option<Type>> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let ty = tx
                    .prepare_cached(
                        "SELECT name, typeId,
                                (SELECT name FROM types WHERE typeId=outerTypes.prototypeId),
                                accessSemantics, sourceId
                         FROM types AS outerTypes WHERE typeId=?1",
                    )?
                    .query_row([type_id], row_to_type)
                    .optional()?;

                match ty {
                    Some(mut ty) => {
                        hydrate_type(tx, &mut ty)?;
                        Ok(Some(ty))
                    }
                    None => Ok(None),
                }
            })
    }

    /// Fetches every stored type, fully hydrated, in id order.
    pub fn fetch_types(&self) -> Result<Types> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let mut types = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT name, typeId,
                                (SELECT name FROM types WHERE typeId=outerTypes.prototypeId),
                                accessSemantics, sourceId
                         FROM types AS outerTypes ORDER BY typeId",
                    )?;
                    let types = stmt
                        .query_map([], row_to_type)?
                        .collect::<std::result::Result<Types, _>>()?;
                    types
                };

                for ty in &mut types {
                    hydrate_type(tx, ty)?;
                }

                Ok(types)
            })
    }

    /// Id of the directory `path`, inserted on first use.
    pub fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId> {
        retry_on_insert_conflict(path, || {
            self.database
                .with_transaction(TransactionMode::Deferred, |tx| {
                    match select_source_context_id(tx, path)? {
                        Some(id) => Ok(id),
                        None => insert_source_context(tx, path),
                    }
                })
        })
    }

    pub fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                tx.prepare_cached(
                    "SELECT sourceContextPath FROM sourceContexts WHERE sourceContextId=?1",
                )?
                .query_row([source_context_id], |row| row.get(0))
                .optional()?
                .ok_or(StorageError::SourceContextIdDoesNotExist(source_context_id))
            })
    }

    pub fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let mut stmt = tx.prepare_cached(
                    "SELECT sourceContextPath, sourceContextId FROM sourceContexts",
                )?;
                let contexts = stmt
                    .query_map([], |row| {
                        Ok(SourceContext {
                            path: row.get(0)?,
                            id: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(contexts)
            })
    }

    /// Id of file `source_name` in `source_context_id`, inserted on first use.
    pub fn fetch_source_id(
        &self,
        source_context_id: SourceContextId,
        source_name: &str,
    ) -> Result<SourceId> {
        retry_on_insert_conflict(source_name, || {
            self.database
                .with_transaction(TransactionMode::Deferred, |tx| {
                    match select_source_id(tx, source_context_id, source_name)? {
                        Some(id) => Ok(id),
                        None => insert_source(tx, source_context_id, source_name),
                    }
                })
        })
    }

    pub fn fetch_source_name_and_source_context_id(
        &self,
        source_id: SourceId,
    ) -> Result<SourceNameAndSourceContextId> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                tx.prepare_cached("SELECT sourceName, sourceContextId FROM sources WHERE sourceId=?1")?
                    .query_row([source_id], |row| {
                        Ok(SourceNameAndSourceContextId {
                            source_name: row.get(0)?,
                            source_context_id: row.get(1)?,
                        })
                    })
                    .optional()?
                    .ok_or(StorageError::SourceIdDoesNotExist(source_id))
            })
    }

    pub fn fetch_source_context_id_for_source(&self, source_id: SourceId) -> Result<SourceContextId> {
        Ok(self
            .fetch_source_name_and_source_context_id(source_id)?
            .source_context_id)
    }

    pub fn fetch_all_sources(&self) -> Result<Vec<Source>> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let mut stmt =
                    tx.prepare_cached("SELECT sourceName, sourceContextId, sourceId FROM sources")?;
                let sources = stmt
                    .query_map([], |row| {
                        Ok(Source {
                            name: row.get(0)?,
                            source_context_id: row.get(1)?,
                            id: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
    }

    /// Get storage statistics
    pub fn fetch_stats(&self) -> Result<StorageStats> {
        self.database
            .with_transaction(TransactionMode::Deferred, |tx| {
                let count = |table: &str| -> Result<usize> {
                    let count: i64 =
                        tx.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                            row.get(0)
                        })?;
                    Ok(count as usize)
                };

                Ok(StorageStats {
                    types: count("types")?,
                    exported_types: count("exportedTypes")?,
                    property_declarations: count("propertyDeclarations")?,
                    function_declarations: count("functionDeclarations")?,
                    signal_declarations: count("signalDeclarations")?,
                    enumeration_declarations: count("enumerationDeclarations")?,
                    source_contexts: count("sourceContexts")?,
                    sources: count("sources")?,
                })
            })
    }
}

impl<D: Database> SourcePathStorage for ProjectStorage<D> {
    fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId> {
        ProjectStorage::fetch_source_context_id(self, path)
    }

    fn fetch_source_id(&self, source_context_id: SourceContextId, name: &str) -> Result<SourceId> {
        ProjectStorage::fetch_source_id(self, source_context_id, name)
    }

    fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
        ProjectStorage::fetch_source_context_path(self, source_context_id)
    }

    fn fetch_source_name_and_source_context_id(
        &self,
        source_id: SourceId,
    ) -> Result<SourceNameAndSourceContextId> {
        ProjectStorage::fetch_source_name_and_source_context_id(self, source_id)
    }

    fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>> {
        ProjectStorage::fetch_all_source_contexts(self)
    }

    fn fetch_all_sources(&self) -> Result<Vec<Source>> {
        ProjectStorage::fetch_all_sources(self)
    }
}

/// Attempts for a read-then-insert that lost a race with another writer
const MAX_INSERT_ATTEMPTS: u32 = 8;

/// Reruns `f` while it fails because a concurrent writer got there first,
/// backing off a little more each time. Gives up with the last error after
/// [`MAX_INSERT_ATTEMPTS`].
fn retry_on_insert_conflict<T, F>(what: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match f() {
            Err(error) if error.is_insert_conflict() && attempt < MAX_INSERT_ATTEMPTS => {
                debug!(
                    "{} was inserted concurrently, retrying (attempt {})",
                    what, attempt
                );
                std::thread::sleep(Duration::from_millis(1 << attempt));
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn sync_type(conn: &Connection, ty: &mut Type) -> Result<TypeId> {
    let prototype_id = fetch_or_insert_type_id_by_name(conn, &ty.prototype)?;

    let type_id: TypeId = conn
        .prepare_cached(
            "INSERT INTO types(name, accessSemantics, prototypeId, sourceId) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                accessSemantics=excluded.accessSemantics,
                prototypeId=excluded.prototypeId,
                sourceId=excluded.sourceId
             RETURNING typeId",
        )?
        .query_row(
            params![ty.type_name, ty.access_semantics, prototype_id, ty.source_id],
            |row| row.get(0),
        )?;

    debug!("Synchronizing type {} ({})", ty.type_name, type_id);

    for exported_type in &ty.exported_types {
        upsert_exported_type(conn, exported_type, type_id)?;
    }

    synchronize_property_declarations(conn, type_id, &mut ty.property_declarations)?;
    synchronize_function_declarations(conn, type_id, &mut ty.function_declarations)?;
    synchronize_signal_declarations(conn, type_id, &mut ty.signal_declarations)?;
    synchronize_enumeration_declarations(conn, type_id, &mut ty.enumeration_declarations)?;

    Ok(type_id)
}

/// An exported name is never rebound once claimed.
fn upsert_exported_type(conn: &Connection, exported_type: &ExportedType, type_id: TypeId) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO exportedTypes(qualifiedName, majorVersion, minorVersion, typeId)
         VALUES(?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
    )?
    .execute(params![
        exported_type.qualified_type_name,
        exported_type.version.major.0,
        exported_type.version.minor.0,
        type_id
    ])?;

    Ok(())
}

/// JSON array of the valid ids, for `json_each` lists.
fn id_list<T>(ids: &[InternalId<T>]) -> Result<String> {
    let values: Vec<i64> = ids
        .iter()
        .filter(|id| id.is_valid())
        .map(|id| id.id())
        .collect();
    Ok(serde_json::to_string(&values)?)
}

/// Deletes the types of `source_ids` that were not declared in this pass.
/// Properties elsewhere that used one of them as their type are re-pointed
/// to a placeholder of the same name, so a later declaration resolves them
/// again.
fn delete_not_updated_types(
    conn: &Connection,
    updated_type_ids: &[TypeId],
    source_ids: &[SourceId],
) -> Result<()> {
    let source_id_list = id_list(source_ids)?;
    let updated_type_id_list = id_list(updated_type_ids)?;

    let dangling_properties = {
        let mut stmt = conn.prepare_cached(
            "SELECT propertyDeclarations.propertyDeclarationId, types.name
             FROM propertyDeclarations JOIN types
                ON types.typeId=propertyDeclarations.propertyTypeId
             WHERE types.sourceId IN (SELECT value FROM json_each(?1))
               AND types.typeId NOT IN (SELECT value FROM json_each(?2))",
        )?;
        let rows = stmt
            .query_map(params![source_id_list, updated_type_id_list], |row| {
                Ok((row.get::<_, PropertyDeclarationId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let deleted = conn
        .prepare_cached(
            "DELETE FROM types
             WHERE sourceId IN (SELECT value FROM json_each(?1))
               AND typeId NOT IN (SELECT value FROM json_each(?2))",
        )?
        .execute(params![source_id_list, updated_type_id_list])?;

    if deleted > 0 {
        debug!("Deleted {} types no longer declared by their sources", deleted);
    }

    // Declarations owned by deleted types are already gone; updating them is a no-op.
    for (property_declaration_id, type_name) in dangling_properties {
        let placeholder_id = fetch_or_insert_type_id_by_name(conn, &type_name)?;
        conn.prepare_cached(
            "UPDATE propertyDeclarations SET propertyTypeId=?2 WHERE propertyDeclarationId=?1",
        )?
        .execute(params![property_declaration_id, placeholder_id])?;
    }

    Ok(())
}

/// Removes rows created only because something named them, once nothing
/// refers to them any more. Types declared in this pass are kept even when
/// they look like placeholders.
fn prune_unfilled_placeholders(conn: &Connection, updated_type_ids: &[TypeId]) -> Result<()> {
    let pruned = conn
        .prepare_cached(
            "DELETE FROM types
             WHERE sourceId IS NULL
               AND accessSemantics IS NULL
               AND typeId NOT IN (SELECT value FROM json_each(?1))
               AND typeId NOT IN (SELECT prototypeId FROM types WHERE prototypeId IS NOT NULL)
               AND typeId NOT IN (SELECT propertyTypeId FROM propertyDeclarations
                                  WHERE propertyTypeId IS NOT NULL)
               AND typeId NOT IN (SELECT typeId FROM exportedTypes)
               AND typeId NOT IN (SELECT typeId FROM propertyDeclarations)
               AND typeId NOT IN (SELECT typeId FROM functionDeclarations)
               AND typeId NOT IN (SELECT typeId FROM signalDeclarations)
               AND typeId NOT IN (SELECT typeId FROM enumerationDeclarations)",
        )?
        .execute([id_list(updated_type_ids)?])?;

    if pruned > 0 {
        debug!("Pruned {} unreferenced placeholder types", pruned);
    }

    Ok(())
}

fn type_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM types", [], |row| row.get(0))?)
}

fn select_type_id_by_name(conn: &Connection, name: &str) -> Result<Option<TypeId>> {
    Ok(conn
        .prepare_cached("SELECT typeId FROM types WHERE name=?1")?
        .query_row([name], |row| row.get(0))
        .optional()?)
}

/// Resolves a referenced type name, inserting a placeholder row for names
/// not declared yet. An empty name means "no type".
fn fetch_or_insert_type_id_by_name(conn: &Connection, name: &str) -> Result<TypeId> {
    if name.is_empty() {
        return Ok(TypeId::invalid());
    }

    if let Some(type_id) = select_type_id_by_name(conn, name)? {
        return Ok(type_id);
    }

    debug!("Inserting placeholder for type {}", name);

    Ok(conn
        .prepare_cached("INSERT INTO types(name) VALUES(?1) RETURNING typeId")?
        .query_row([name], |row| row.get(0))?)
}

fn synchronize_property_declarations(
    conn: &Connection,
    type_id: TypeId,
    declarations: &mut PropertyDeclarations,
) -> Result<()> {
    declarations.sort_by(|first, second| first.name.cmp(&second.name));

    let persisted = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, propertyTraits, propertyTypeId, propertyDeclarationId
             FROM propertyDeclarations WHERE typeId=?1 ORDER BY name",
        )?;
        let views = stmt
            .query_map([type_id], |row| {
                Ok(PropertyDeclarationView {
                    name: row.get(0)?,
                    traits: row.get(1)?,
                    type_id: row.get(2)?,
                    id: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        views
    };

    insert_update_delete(
        persisted.as_slice(),
        declarations.as_slice(),
        |view, value| view.name.as_str().cmp(value.name.as_str()),
        |value| {
            let property_type_id = fetch_or_insert_type_id_by_name(conn, &value.type_name)?;

            conn.prepare_cached(
                "INSERT INTO propertyDeclarations(typeId, name, propertyTypeId, propertyTraits)
                 VALUES(?1, ?2, ?3, ?4)",
            )?
            .execute(params![type_id, value.name, property_type_id, value.traits])?;

            Ok(())
        },
        |view, value| {
            let property_type_id = fetch_or_insert_type_id_by_name(conn, &value.type_name)?;

            if view.traits == value.traits && view.type_id.id() == property_type_id.id() {
                return Ok(());
            }

            debug!("Updating property declaration {} ({})", view.name, view.id);

            conn.prepare_cached(
                "UPDATE propertyDeclarations SET propertyTypeId=?2, propertyTraits=?3
                 WHERE propertyDeclarationId=?1",
            )?
            .execute(params![view.id, property_type_id, value.traits])?;

            Ok(())
        },
        |view| {
            conn.prepare_cached("DELETE FROM propertyDeclarations WHERE propertyDeclarationId=?1")?
                .execute([view.id])?;
            Ok(())
        },
    )
}

fn synchronize_function_declarations(
    conn: &Connection,
    type_id: TypeId,
    declarations: &mut FunctionDeclarations,
) -> Result<()> {
    declarations.sort_by(|first, second| first.name.cmp(&second.name));

    let persisted = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, returnTypeName, signature, functionDeclarationId
             FROM functionDeclarations WHERE typeId=?1 ORDER BY name",
        )?;
        let views = stmt
            .query_map([type_id], |row| {
                Ok(FunctionDeclarationView {
                    name: row.get(0)?,
                    return_type_name: row.get(1)?,
                    signature: row.get(2)?,
                    id: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        views
    };

    insert_update_delete(
        persisted.as_slice(),
        declarations.as_slice(),
        |view, value| view.name.as_str().cmp(value.name.as_str()),
        |value| {
            let signature = encode_parameters(&value.parameters)?;

            conn.prepare_cached(
                "INSERT INTO functionDeclarations(typeId, name, returnTypeName, signature)
                 VALUES(?1, ?2, ?3, ?4)",
            )?
            .execute(params![type_id, value.name, value.return_type_name, signature])?;

            Ok(())
        },
        |view, value| {
            let signature = encode_parameters(&value.parameters)?;

            if view.return_type_name == value.return_type_name && view.signature == signature {
                return Ok(());
            }

            debug!("Updating function declaration {} ({})", view.name, view.id);

            conn.prepare_cached(
                "UPDATE functionDeclarations SET returnTypeName=?2, signature=?3
                 WHERE functionDeclarationId=?1",
            )?
            .execute(params![view.id, value.return_type_name, signature])?;

            Ok(())
        },
        |view| {
            conn.prepare_cached("DELETE FROM functionDeclarations WHERE functionDeclarationId=?1")?
                .execute([view.id])?;
            Ok(())
        },
    )
}

fn synchronize_signal_declarations(
    conn: &Connection,
    type_id: TypeId,
    declarations: &mut SignalDeclarations,
) -> Result<()> {
    declarations.sort_by(|first, second| first.name.cmp(&second.name));

    let persisted = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, signature, signalDeclarationId
             FROM signalDeclarations WHERE typeId=?1 ORDER BY name",
        )?;
        let views = stmt
            .query_map([type_id], |row| {
                Ok(SignalDeclarationView {
                    name: row.get(0)?,
                    signature: row.get(1)?,
                    id: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        views
    };

    insert_update_delete(
        persisted.as_slice(),
        declarations.as_slice(),
        |view, value| view.name.as_str().cmp(value.name.as_str()),
        |value| {
            let signature = encode_parameters(&value.parameters)?;

            conn.prepare_cached(
                "INSERT INTO signalDeclarations(typeId, name, signature) VALUES(?1, ?2, ?3)",
            )?
            .execute(params![type_id, value.name, signature])?;

            Ok(())
        },
        |view, value| {
            let signature = encode_parameters(&value.parameters)?;

            if view.signature == signature {
                return Ok(());
            }

            debug!("Updating signal declaration {} ({})", view.name, view.id);

            conn.prepare_cached(
                "UPDATE signalDeclarations SET signature=?2 WHERE signalDeclarationId=?1",
            )?
            .execute(params![view.id, signature])?;

            Ok(())
        },
        |view| {
            conn.prepare_cached("DELETE FROM signalDeclarations WHERE signalDeclarationId=?1")?
                .execute([view.id])?;
            Ok(())
        },
    )
}

fn synchronize_enumeration_declarations(
    conn: &Connection,
    type_id: TypeId,
    declarations: &mut EnumerationDeclarations,
) -> Result<()> {
    declarations.sort_by(|first, second| first.name.cmp(&second.name));

    let persisted = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, enumeratorDeclarations, enumerationDeclarationId
             FROM enumerationDeclarations WHERE typeId=?1 ORDER BY name",
        )?;
        let views = stmt
            .query_map([type_id], |row| {
                Ok(EnumerationDeclarationView {
                    name: row.get(0)?,
                    enumerator_declarations: row.get(1)?,
                    id: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        views
    };

    insert_update_delete(
        persisted.as_slice(),
        declarations.as_slice(),
        |view, value| view.name.as_str().cmp(value.name.as_str()),
        |value| {
            let enumerators = encode_enumerators(&value.enumerator_declarations)?;

            conn.prepare_cached(
                "INSERT INTO enumerationDeclarations(typeId, name, enumeratorDeclarations)
                 VALUES(?1, ?2, ?3)",
            )?
            .execute(params![type_id, value.name, enumerators])?;

            Ok(())
        },
        |view, value| {
            let enumerators = encode_enumerators(&value.enumerator_declarations)?;

            if view.enumerator_declarations == enumerators {
                return Ok(());
            }

            debug!("Updating enumeration declaration {} ({})", view.name, view.id);

            conn.prepare_cached(
                "UPDATE enumerationDeclarations SET enumeratorDeclarations=?2
                 WHERE enumerationDeclarationId=?1",
            )?
            .execute(params![view.id, enumerators])?;

            Ok(())
        },
        |view| {
            conn.prepare_cached(
                "DELETE FROM enumerationDeclarations WHERE enumerationDeclarationId=?1",
            )?
            .execute([view.id])?;
            Ok(())
        },
    )
}

/// Convert a `name, typeId, prototype name, accessSemantics, sourceId` row
fn row_to_type(row: &Row) -> rusqlite::Result<Type> {
    Ok(Type {
        type_name: row.get(0)?,
        type_id: row.get(1)?,
        prototype: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        access_semantics: row.get(3)?,
        source_id: row.get(4)?,
        ..Type::default()
    })
}

fn hydrate_type(conn: &Connection, ty: &mut Type) -> Result<()> {
    ty.exported_types = fetch_exported_types(conn, ty.type_id)?;
    ty.property_declarations = fetch_property_declarations(conn, ty.type_id)?;
    ty.function_declarations = fetch_function_declarations(conn, ty.type_id)?;
    ty.signal_declarations = fetch_signal_declarations(conn, ty.type_id)?;
    ty.enumeration_declarations = fetch_enumeration_declarations(conn, ty.type_id)?;
    Ok(())
}

fn fetch_exported_types(conn: &Connection, type_id: TypeId) -> Result<Vec<ExportedType>> {
    let mut stmt = conn.prepare_cached(
        "SELECT qualifiedName, majorVersion, minorVersion FROM exportedTypes
         WHERE typeId=?1 ORDER BY qualifiedName, majorVersion, minorVersion",
    )?;
    let exported_types = stmt
        .query_map([type_id], |row| {
            Ok(ExportedType::new(
                row.get::<_, String>(0)?,
                Version::new(row.get(1)?, row.get(2)?),
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(exported_types)
}

fn fetch_property_declarations(conn: &Connection, type_id: TypeId) -> Result<PropertyDeclarations> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, (SELECT name FROM types WHERE typeId=propertyDeclarations.propertyTypeId),
                propertyTraits
         FROM propertyDeclarations WHERE typeId=?1 ORDER BY name",
    )?;
    let declarations = stmt
        .query_map([type_id], |row| {
            Ok(PropertyDeclaration {
                name: row.get(0)?,
                type_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                traits: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(declarations)
}

fn fetch_parameters(conn: &Connection, sql: &str, declaration_id: i64) -> Result<Vec<ParameterDeclaration>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let parameters = stmt
        .query_map([declaration_id], |row| {
            Ok(ParameterDeclaration {
                name: row.get(0)?,
                type_name: row.get(1)?,
                traits: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(parameters)
}

fn fetch_function_declarations(conn: &Connection, type_id: TypeId) -> Result<FunctionDeclarations> {
    let rows = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, returnTypeName, functionDeclarationId FROM functionDeclarations
             WHERE typeId=?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([type_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    rows.into_iter()
        .map(|(name, return_type_name, id)| -> Result<FunctionDeclaration> {
            let parameters = fetch_parameters(
                conn,
                "SELECT json_extract(json_each.value, '$.n'),
                        json_extract(json_each.value, '$.tn'),
                        json_extract(json_each.value, '$.tr')
                 FROM functionDeclarations, json_each(functionDeclarations.signature)
                 WHERE functionDeclarationId=?1
                 ORDER BY json_each.id",
                id,
            )?;
            Ok(FunctionDeclaration::new(name, return_type_name, parameters))
        })
        .collect()
}

fn fetch_signal_declarations(conn: &Connection, type_id: TypeId) -> Result<SignalDeclarations> {
    let rows = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, signalDeclarationId FROM signalDeclarations
             WHERE typeId=?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([type_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    rows.into_iter()
        .map(|(name, id)| -> Result<SignalDeclaration> {
            let parameters = fetch_parameters(
                conn,
                "SELECT json_extract(json_each.value, '$.n'),
                        json_extract(json_each.value, '$.tn'),
                        json_extract(json_each.value, '$.tr')
                 FROM signalDeclarations, json_each(signalDeclarations.signature)
                 WHERE signalDeclarationId=?1
                 ORDER BY json_each.id",
                id,
            )?;
            Ok(SignalDeclaration::new(name, parameters))
        })
        .collect()
}

fn fetch_enumeration_declarations(
    conn: &Connection,
    type_id: TypeId,
) -> Result<EnumerationDeclarations> {
    let rows = {
        let mut stmt = conn.prepare_cached(
            "SELECT name, enumerationDeclarationId FROM enumerationDeclarations
             WHERE typeId=?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([type_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut stmt = conn.prepare_cached(
        "SELECT json_each.key, json_each.value
         FROM enumerationDeclarations,
              json_each(enumerationDeclarations.enumeratorDeclarations)
         WHERE enumerationDeclarationId=?1
         ORDER BY json_each.id",
    )?;

    rows.into_iter()
        .map(|(name, id)| -> Result<EnumerationDeclaration> {
            let enumerators = stmt
                .query_map([id], |row| {
                    Ok(EnumeratorDeclaration {
                        name: row.get(0)?,
                        value: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(EnumerationDeclaration::new(name, enumerators))
        })
        .collect()
}

fn select_source_context_id(conn: &Connection, path: &str) -> Result<Option<SourceContextId>> {
    Ok(conn
        .prepare_cached("SELECT sourceContextId FROM sourceContexts WHERE sourceContextPath=?1")?
        .query_row([path], |row| row.get(0))
        .optional()?)
}

fn insert_source_context(conn: &Connection, path: &str) -> Result<SourceContextId> {
    debug!("Inserting source context {}", path);

    conn.prepare_cached("INSERT INTO sourceContexts(sourceContextPath) VALUES(?1)")?
        .execute([path])?;

    Ok(SourceContextId::new(conn.last_insert_rowid()))
}

fn select_source_id(
    conn: &Connection,
    source_context_id: SourceContextId,
    source_name: &str,
) -> Result<Option<SourceId>> {
    Ok(conn
        .prepare_cached("SELECT sourceId FROM sources WHERE sourceContextId=?1 AND sourceName=?2")?
        .query_row(params![source_context_id, source_name], |row| row.get(0))
        .optional()?)
}

fn insert_source(
    conn: &Connection,
    source_context_id: SourceContextId,
    source_name: &str,
) -> Result<SourceId> {
    debug!("Inserting source {} in context {}", source_name, source_context_id);

    conn.prepare_cached("INSERT INTO sources(sourceContextId, sourceName) VALUES(?1, ?2)")?
        .execute(params![source_context_id, source_name])?;

    Ok(SourceId::new(conn.last_insert_rowid()))
}
