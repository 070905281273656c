//! In-memory time-series store.
//!
//! Same semantics as the Parquet store, minus the disk. Clones share state,
//! which lets a test keep a handle while the engine owns another.

use super::provider::DataError;
use super::store::{encode_parquet, CollectionMeta, Library, TimeSeriesStore};
use super::table::append_rows;
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredCollection {
    table: DataFrame,
    meta: CollectionMeta,
}

type Libraries = BTreeMap<String, BTreeMap<String, StoredCollection>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    libraries: Arc<Mutex<Libraries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock(libraries: &Mutex<Libraries>) -> Result<MutexGuard<'_, Libraries>, DataError> {
    libraries
        .lock()
        .map_err(|_| DataError::Store("memory store lock poisoned".into()))
}

impl TimeSeriesStore for MemoryStore {
    fn library_exists(&self, name: &str) -> Result<bool, DataError> {
        Ok(lock(&self.libraries)?.contains_key(name))
    }

    fn create_library(&self, name: &str) -> Result<(), DataError> {
        lock(&self.libraries)?.entry(name.to_string()).or_default();
        Ok(())
    }

    fn open_library(&self, name: &str) -> Result<Box<dyn Library>, DataError> {
        if !self.library_exists(name)? {
            return Err(DataError::LibraryNotFound {
                name: name.to_string(),
            });
        }
        Ok(Box::new(MemoryLibrary {
            name: name.to_string(),
            libraries: Arc::clone(&self.libraries),
        }))
    }

    fn list_libraries(&self) -> Result<Vec<String>, DataError> {
        Ok(lock(&self.libraries)?.keys().cloned().collect())
    }
}

#[derive(Debug)]
pub struct MemoryLibrary {
    name: String,
    libraries: Arc<Mutex<Libraries>>,
}

impl MemoryLibrary {
    fn with_collections<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, StoredCollection>) -> Result<T, DataError>,
    ) -> Result<T, DataError> {
        let mut libraries = lock(&self.libraries)?;
        let collections = libraries
            .get_mut(&self.name)
            .ok_or_else(|| DataError::LibraryNotFound {
                name: self.name.clone(),
            })?;
        f(collections)
    }

    fn stored(key: &str, table: DataFrame) -> Result<StoredCollection, DataError> {
        if table.height() == 0 {
            return Err(DataError::Store(format!(
                "refusing to write empty collection '{key}'"
            )));
        }
        let meta = CollectionMeta::describe(key, &table, &encode_parquet(&table)?)?;
        Ok(StoredCollection { table, meta })
    }
}

impl Library for MemoryLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_collection(&self, key: &str) -> Result<bool, DataError> {
        self.with_collections(|c| Ok(c.contains_key(key)))
    }

    fn write_full(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        let stored = Self::stored(key, table.clone())?;
        self.with_collections(|c| {
            c.insert(key.to_string(), stored);
            Ok(())
        })
    }

    fn append(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        self.with_collections(|c| {
            let existing = c.get(key).ok_or_else(|| DataError::CollectionNotFound {
                key: key.to_string(),
            })?;
            let combined = append_rows(&existing.table, table, key)?;
            c.insert(key.to_string(), Self::stored(key, combined)?);
            Ok(())
        })
    }

    fn read_full(&self, key: &str) -> Result<DataFrame, DataError> {
        self.with_collections(|c| {
            c.get(key)
                .map(|s| s.table.clone())
                .ok_or_else(|| DataError::CollectionNotFound {
                    key: key.to_string(),
                })
        })
    }

    fn list_collection_keys(&self) -> Result<BTreeSet<String>, DataError> {
        self.with_collections(|c| Ok(c.keys().cloned().collect()))
    }

    fn collection_meta(&self, key: &str) -> Result<Option<CollectionMeta>, DataError> {
        self.with_collections(|c| Ok(c.get(key).map(|s| s.meta.clone())))
    }
}
