//! Parquet-backed time-series store with Hive-style collection directories.
//!
//! Layout:
//! - `{root}/{library}/library.json`: library marker
//! - `{root}/{library}/symbol={KEY}/data.parquet`: the collection
//! - `{root}/{library}/symbol={KEY}/meta.json`: metadata sidecar
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Appends re-validate the whole collection before it is rewritten
//! - Quarantine for corrupt files (`data.parquet.quarantined`)

use super::provider::DataError;
use super::store::{decode_parquet, encode_parquet, CollectionMeta, Library, TimeSeriesStore};
use super::table::append_rows;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const LIBRARY_MARKER: &str = "library.json";
const DATA_FILE: &str = "data.parquet";
const META_FILE: &str = "meta.json";
const COLLECTION_PREFIX: &str = "symbol=";

/// Contents of `library.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryMarker {
    name: String,
    created_at: chrono::NaiveDateTime,
}

/// Filesystem store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn library_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl TimeSeriesStore for ParquetStore {
    fn library_exists(&self, name: &str) -> Result<bool, DataError> {
        Ok(self.library_dir(name).join(LIBRARY_MARKER).is_file())
    }

    fn create_library(&self, name: &str) -> Result<(), DataError> {
        if self.library_exists(name)? {
            return Ok(());
        }

        let dir = self.library_dir(name);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Store(format!("failed to create {}: {e}", dir.display())))?;

        let marker = LibraryMarker {
            name: name.to_string(),
            created_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_vec_pretty(&marker)
            .map_err(|e| DataError::Store(format!("marker serialization: {e}")))?;
        write_atomic(&dir.join(LIBRARY_MARKER), &json)?;

        tracing::info!(library = name, root = %self.root.display(), "created library");
        Ok(())
    }

    fn open_library(&self, name: &str) -> Result<Box<dyn Library>, DataError> {
        if !self.library_exists(name)? {
            return Err(DataError::LibraryNotFound {
                name: name.to_string(),
            });
        }
        Ok(Box::new(ParquetLibrary {
            name: name.to_string(),
            dir: self.library_dir(name),
        }))
    }

    fn list_libraries(&self) -> Result<Vec<String>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in read_dir(&self.root)? {
            if entry.join(LIBRARY_MARKER).is_file() {
                if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Handle to one library directory.
#[derive(Debug)]
pub struct ParquetLibrary {
    name: String,
    dir: PathBuf,
}

impl ParquetLibrary {
    /// Directory for a collection: `{library}/symbol={KEY}/`
    fn collection_dir(&self, key: &str) -> Result<PathBuf, DataError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{COLLECTION_PREFIX}{key}")))
    }

    fn data_path(&self, key: &str) -> Result<PathBuf, DataError> {
        Ok(self.collection_dir(key)?.join(DATA_FILE))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, DataError> {
        Ok(self.collection_dir(key)?.join(META_FILE))
    }

    /// Persist `table` as the whole collection, data first, then the sidecar.
    fn persist(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        if table.height() == 0 {
            return Err(DataError::Store(format!(
                "refusing to write empty collection '{key}'"
            )));
        }

        let dir = self.collection_dir(key)?;
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Store(format!("failed to create {}: {e}", dir.display())))?;

        let encoded = encode_parquet(table)?;
        let meta = CollectionMeta::describe(key, table, &encoded)?;
        write_atomic(&dir.join(DATA_FILE), &encoded)?;

        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| DataError::Store(format!("meta serialization: {e}")))?;
        write_atomic(&dir.join(META_FILE), &meta_json)?;
        Ok(())
    }

    /// Move a collection file that no longer decodes out of the way.
    fn quarantine(&self, key: &str, dir: &Path, err: &DataError) {
        let path = dir.join(DATA_FILE);
        let target = path.with_extension("parquet.quarantined");
        tracing::warn!(
            key,
            path = %path.display(),
            error = %err,
            "quarantining corrupt collection file"
        );
        if let Err(e) = fs::rename(&path, &target) {
            tracing::error!(key, error = %e, "quarantine rename failed");
        }
        match fs::remove_file(dir.join(META_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(key, error = %e, "failed to remove stale meta sidecar"),
        }
    }
}

impl Library for ParquetLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_collection(&self, key: &str) -> Result<bool, DataError> {
        Ok(self.data_path(key)?.is_file())
    }

    fn write_full(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        self.persist(key, table)?;
        tracing::debug!(library = %self.name, key, rows = table.height(), "wrote collection");
        Ok(())
    }

    fn append(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        let existing = self.read_full(key)?;
        let combined = append_rows(&existing, table, key)?;
        self.persist(key, &combined)?;
        tracing::debug!(
            library = %self.name,
            key,
            appended = table.height(),
            rows = combined.height(),
            "appended to collection"
        );
        Ok(())
    }

    fn read_full(&self, key: &str) -> Result<DataFrame, DataError> {
        let dir = self.collection_dir(key)?;
        let path = dir.join(DATA_FILE);
        if !path.is_file() {
            return Err(DataError::CollectionNotFound {
                key: key.to_string(),
            });
        }

        let bytes = fs::read(&path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
        let loaded = decode_parquet(bytes).and_then(|df| {
            if df.height() == 0 {
                Err(DataError::Parquet("empty parquet file".into()))
            } else {
                Ok(df)
            }
        });

        match loaded {
            Ok(df) => Ok(df),
            Err(e) => {
                self.quarantine(key, &dir, &e);
                Err(e)
            }
        }
    }

    fn list_collection_keys(&self) -> Result<BTreeSet<String>, DataError> {
        let mut keys = BTreeSet::new();
        for entry in read_dir(&self.dir)? {
            let Some(dir_name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(key) = dir_name.strip_prefix(COLLECTION_PREFIX) {
                if entry.join(DATA_FILE).is_file() {
                    keys.insert(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn collection_meta(&self, key: &str) -> Result<Option<CollectionMeta>, DataError> {
        let path = self.meta_path(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| DataError::Store(format!("meta read: {e}")))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| DataError::Store(format!("meta parse for '{key}': {e}")))
    }
}

/// Refuse keys that would leave the `symbol=` directory of the library.
fn validate_key(key: &str) -> Result<(), DataError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(DataError::Store(format!("invalid collection key '{key}'")));
    }
    Ok(())
}

/// Write to `{path}.tmp`, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes)
        .map_err(|e| DataError::Store(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Store(format!("atomic rename failed: {e}"))
    })
}

/// Paths of the entries in `dir`.
fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DataError::Store(format!("read dir {}: {e}", dir.display())))?;
    entries
        .map(|entry| {
            entry
                .map(|e| e.path())
                .map_err(|e| DataError::Store(format!("dir entry: {e}")))
        })
        .collect()
}
