//! Memoized mapping between file paths and source ids.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StorageError};

use super::ids::{SourceContextId, SourceId};

/// A directory known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    pub path: String,
    pub id: SourceContextId,
}

/// A file known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub source_context_id: SourceContextId,
    pub id: SourceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNameAndSourceContextId {
    pub source_name: String,
    pub source_context_id: SourceContextId,
}

/// Storage side of the source path cache.
pub trait SourcePathStorage {
    fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId>;

    fn fetch_source_id(&self, source_context_id: SourceContextId, name: &str) -> Result<SourceId>;

    fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String>;

    fn fetch_source_name_and_source_context_id(
        &self,
        source_id: SourceId,
    ) -> Result<SourceNameAndSourceContextId>;

    fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>>;

    fn fetch_all_sources(&self) -> Result<Vec<Source>>;
}

impl<T: SourcePathStorage + ?Sized> SourcePathStorage for &T {
    fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId> {
        (**self).fetch_source_context_id(path)
    }

    fn fetch_source_id(&self, source_context_id: SourceContextId, name: &str) -> Result<SourceId> {
        (**self).fetch_source_id(source_context_id, name)
    }

    fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
        (**self).fetch_source_context_path(source_context_id)
    }

    fn fetch_source_name_and_source_context_id(
        &self,
        source_id: SourceId,
    ) -> Result<SourceNameAndSourceContextId> {
        (**self).fetch_source_name_and_source_context_id(source_id)
    }

    fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>> {
        (**self).fetch_all_source_contexts()
    }

    fn fetch_all_sources(&self) -> Result<Vec<Source>> {
        (**self).fetch_all_sources()
    }
}

impl<T: SourcePathStorage + ?Sized> SourcePathStorage for Arc<T> {
    fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId> {
        (**self).fetch_source_context_id(path)
    }

    fn fetch_source_id(&self, source_context_id: SourceContextId, name: &str) -> Result<SourceId> {
        (**self).fetch_source_id(source_context_id, name)
    }

    fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
        (**self).fetch_source_context_path(source_context_id)
    }

    fn fetch_source_name_and_source_context_id(
        &self,
        source_id: SourceId,
    ) -> Result<SourceNameAndSourceContextId> {
        (**self).fetch_source_name_and_source_context_id(source_id)
    }

    fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>> {
        (**self).fetch_all_source_contexts()
    }

    fn fetch_all_sources(&self) -> Result<Vec<Source>> {
        (**self).fetch_all_sources()
    }
}

/// Caches both directions of the path to id mapping in front of a
/// [`SourcePathStorage`]. Entries are never evicted; ids are stable for the
/// lifetime of a store.
pub struct SourcePathCache<S: SourcePathStorage> {
    storage: S,
    context_ids: DashMap<String, SourceContextId>,
    context_paths: DashMap<i64, String>,
    source_ids: DashMap<(i64, String), SourceId>,
    source_names: DashMap<i64, SourceNameAndSourceContextId>,
}

impl<S: SourcePathStorage> SourcePathCache<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            context_ids: DashMap::new(),
            context_paths: DashMap::new(),
            source_ids: DashMap::new(),
            source_names: DashMap::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Loads every known directory and file into the cache.
    pub fn populate(&self) -> Result<()> {
        let contexts = self.storage.fetch_all_source_contexts()?;
        let sources = self.storage.fetch_all_sources()?;

        debug!(
            "Populating source path cache with {} contexts and {} sources",
            contexts.len(),
            sources.len()
        );

        for context in contexts {
            self.remember_context(context.path, context.id);
        }

        for source in sources {
            self.remember_source(source.source_context_id, source.name, source.id);
        }

        Ok(())
    }

    pub fn source_context_id(&self, directory_path: &str) -> Result<SourceContextId> {
        if let Some(id) = self.context_ids.get(directory_path) {
            return Ok(*id);
        }

        let id = self.storage.fetch_source_context_id(directory_path)?;
        self.remember_context(directory_path.to_string(), id);
        Ok(id)
    }

    /// Id for a file path, split into directory and file name at the last `/`.
    pub fn source_id(&self, file_path: &str) -> Result<SourceId> {
        let (directory_path, file_name) = split_path(file_path)?;
        let source_context_id = self.source_context_id(directory_path)?;
        self.source_id_in_context(source_context_id, file_name)
    }

    pub fn source_id_in_context(
        &self,
        source_context_id: SourceContextId,
        name: &str,
    ) -> Result<SourceId> {
        let key = (source_context_id.id(), name.to_string());
        if let Some(id) = self.source_ids.get(&key) {
            return Ok(*id);
        }

        let id = self.storage.fetch_source_id(source_context_id, name)?;
        self.remember_source(source_context_id, key.1, id);
        Ok(id)
    }

    pub fn source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
        if let Some(path) = self.context_paths.get(&source_context_id.id()) {
            return Ok(path.clone());
        }

        let path = self.storage.fetch_source_context_path(source_context_id)?;
        self.remember_context(path.clone(), source_context_id);
        Ok(path)
    }

    /// Full `directory/name` path of a source.
    pub fn source_path(&self, source_id: SourceId) -> Result<String> {
        let cached = self
            .source_names
            .get(&source_id.id())
            .map(|entry| entry.value().clone());
        let entry = match cached {
            Some(entry) => entry,
            None => {
                let entry = self.storage.fetch_source_name_and_source_context_id(source_id)?;
                self.remember_source(entry.source_context_id, entry.source_name.clone(), source_id);
                entry
            }
        };

        let directory_path = self.source_context_path(entry.source_context_id)?;
        Ok(format!("{}/{}", directory_path, entry.source_name))
    }

    fn remember_context(&self, path: String, id: SourceContextId) {
        self.context_paths.insert(id.id(), path.clone());
        self.context_ids.insert(path, id);
    }

    fn remember_source(&self, source_context_id: SourceContextId, name: String, id: SourceId) {
        self.source_names.insert(
            id.id(),
            SourceNameAndSourceContextId {
                source_name: name.clone(),
                source_context_id,
            },
        );
        self.source_ids.insert((source_context_id.id(), name), id);
    }
}

fn split_path(file_path: &str) -> Result<(&str, &str)> {
    match file_path.rfind('/') {
        Some(index) => Ok((&file_path[..index], &file_path[index + 1..])),
        None => Err(StorageError::InvalidSourcePath(file_path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemoryDatabase;
    use crate::storage::ProjectStorage;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory stand-in that counts round trips.
    #[derive(Default)]
    struct CountingStorage {
        contexts: Mutex<Vec<String>>,
        sources: Mutex<Vec<(SourceContextId, String)>>,
        calls: AtomicUsize,
    }

    impl CountingStorage {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn count(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SourcePathStorage for CountingStorage {
        fn fetch_source_context_id(&self, path: &str) -> Result<SourceContextId> {
            self.count();
            let mut contexts = self.contexts.lock();
            let index = match contexts.iter().position(|known| known == path) {
                Some(index) => index,
                None => {
                    contexts.push(path.to_string());
                    contexts.len() - 1
                }
            };
            Ok(SourceContextId::new(index as i64 + 1))
        }

        fn fetch_source_id(&self, source_context_id: SourceContextId, name: &str) -> Result<SourceId> {
            self.count();
            let mut sources = self.sources.lock();
            let index = match sources
                .iter()
                .position(|(context, known)| *context == source_context_id && known == name)
            {
                Some(index) => index,
                None => {
                    sources.push((source_context_id, name.to_string()));
                    sources.len() - 1
                }
            };
            Ok(SourceId::new(index as i64 + 1))
        }

        fn fetch_source_context_path(&self, source_context_id: SourceContextId) -> Result<String> {
            self.count();
            self.contexts
                .lock()
                .get(source_context_id.id() as usize - 1)
                .cloned()
                .ok_or(StorageError::SourceContextIdDoesNotExist(source_context_id))
        }

        fn fetch_source_name_and_source_context_id(
            &self,
            source_id: SourceId,
        ) -> Result<SourceNameAndSourceContextId> {
            self.count();
            self.sources
                .lock()
                .get(source_id.id() as usize - 1)
                .map(|(source_context_id, name)| SourceNameAndSourceContextId {
                    source_name: name.clone(),
                    source_context_id: *source_context_id,
                })
                .ok_or(StorageError::SourceIdDoesNotExist(source_id))
        }

        fn fetch_all_source_contexts(&self) -> Result<Vec<SourceContext>> {
            self.count();
            Ok(self
                .contexts
                .lock()
                .iter()
                .enumerate()
                .map(|(index, path)| SourceContext {
                    path: path.clone(),
                    id: SourceContextId::new(index as i64 + 1),
                })
                .collect())
        }

        fn fetch_all_sources(&self) -> Result<Vec<Source>> {
            self.count();
            Ok(self
                .sources
                .lock()
                .iter()
                .enumerate()
                .map(|(index, (source_context_id, name))| Source {
                    name: name.clone(),
                    source_context_id: *source_context_id,
                    id: SourceId::new(index as i64 + 1),
                })
                .collect())
        }
    }

    #[test]
    fn test_source_id_is_memoized() {
        let storage = CountingStorage::default();
        let cache = SourcePathCache::new(&storage);

        let id = cache.source_id("/path/to/Item.qml").unwrap();
        let calls = storage.calls();
        assert_eq!(cache.source_id("/path/to/Item.qml").unwrap(), id);

        assert_eq!(storage.calls(), calls);
    }

    #[test]
    fn test_source_id_splits_at_last_slash() {
        let storage = CountingStorage::default();
        let cache = SourcePathCache::new(&storage);

        let item = cache.source_id("/path/to/Item.qml").unwrap();
        let context = cache.source_context_id("/path/to").unwrap();

        assert_eq!(cache.source_id_in_context(context, "Item.qml").unwrap(), item);
        assert_eq!(cache.source_path(item).unwrap(), "/path/to/Item.qml");
    }

    #[test]
    fn test_path_without_directory_is_rejected() {
        let cache = SourcePathCache::new(CountingStorage::default());

        assert!(matches!(
            cache.source_id("Item.qml"),
            Err(StorageError::InvalidSourcePath(_))
        ));
    }

    #[test]
    fn test_populate_avoids_lookups() {
        let storage = CountingStorage::default();
        let context = storage.fetch_source_context_id("/path").unwrap();
        let source = storage.fetch_source_id(context, "Item.qml").unwrap();

        let cache = SourcePathCache::new(&storage);
        cache.populate().unwrap();
        let calls = storage.calls();

        assert_eq!(cache.source_context_path(context).unwrap(), "/path");
        assert_eq!(cache.source_path(source).unwrap(), "/path/Item.qml");
        assert_eq!(cache.source_id("/path/Item.qml").unwrap(), source);
        assert_eq!(storage.calls(), calls);
    }

    #[test]
    fn test_unknown_ids_are_errors() {
        let cache = SourcePathCache::new(CountingStorage::default());

        assert!(matches!(
            cache.source_context_path(SourceContextId::new(3)),
            Err(StorageError::SourceContextIdDoesNotExist(_))
        ));
        assert!(matches!(
            cache.source_path(SourceId::new(3)),
            Err(StorageError::SourceIdDoesNotExist(_))
        ));
    }

    #[test]
    fn test_cache_over_project_storage() {
        let storage = ProjectStorage::new(MemoryDatabase::open().unwrap()).unwrap();
        let cache = SourcePathCache::new(&storage);

        let id = cache.source_id("/qml/QtQuick/Item.qml").unwrap();

        let fresh = SourcePathCache::new(&storage);
        assert_eq!(fresh.source_path(id).unwrap(), "/qml/QtQuick/Item.qml");
        assert_eq!(fresh.source_id("/qml/QtQuick/Item.qml").unwrap(), id);
    }
}
