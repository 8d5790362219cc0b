//! On-disk cache of the runtime symbol table
//!
//! Layout under the configured cache directory:
//!
//! ```text
//! <cache_dir>/SymbolTable/symbols.json   ordered entry sequence (JSON)
//! <cache_dir>/SymbolTable/version        app version the table was built for
//! ```
//!
//! The version file is written after the table, so a crash between the two
//! leaves a table without a matching key, which reads as stale.

use log::debug;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use super::table::{RuntimeSymbolTable, SymbolEntry};
use crate::domain::CacheError;

const CACHE_SUBDIR: &str = "SymbolTable";
const TABLE_FILE: &str = "symbols.json";
const VERSION_FILE: &str = "version";

/// Persisted symbol table keyed by app version
#[derive(Debug, Clone)]
pub struct SymbolCache {
    dir: PathBuf,
}

impl SymbolCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self { dir: cache_dir.as_ref().join(CACHE_SUBDIR) }
    }

    #[must_use]
    pub fn table_path(&self) -> PathBuf {
        self.dir.join(TABLE_FILE)
    }

    #[must_use]
    pub fn version_path(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }

    /// Version the cached table was stored under, if any
    #[must_use]
    pub fn stored_version(&self) -> Option<String> {
        fs::read_to_string(self.version_path()).ok()
    }

    /// Restore the table stored for `version`
    ///
    /// # Errors
    /// - [`CacheError::Stale`] if the stored version differs
    /// - [`CacheError::Missing`] if the version key or the table file is absent
    /// - [`CacheError::Corrupt`] / [`CacheError::Unsorted`] if the file is unusable
    pub fn restore(&self, version: &str) -> Result<RuntimeSymbolTable, CacheError> {
        let Some(stored) = self.stored_version() else {
            return Err(CacheError::Missing(self.version_path()));
        };
        if stored != version {
            return Err(CacheError::Stale { stored, current: version.to_string() });
        }

        let path = self.table_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CacheError::Missing(path)),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<SymbolEntry> = serde_json::from_slice(&data)
            .map_err(|source| CacheError::Corrupt { path: path.clone(), source })?;

        RuntimeSymbolTable::from_sorted(entries).ok_or(CacheError::Unsorted(path))
    }

    /// Persist `table` under `version`
    ///
    /// Empty tables are not written. An existing table file is removed
    /// before the new one is created.
    ///
    /// # Errors
    /// Returns an error if the directory or either file cannot be written
    pub fn store(&self, version: &str, table: &RuntimeSymbolTable) -> Result<(), CacheError> {
        if table.is_empty() {
            debug!("Not caching an empty symbol table");
            return Ok(());
        }

        fs::create_dir_all(&self.dir)
            .map_err(|source| CacheError::WriteFailed { path: self.dir.clone(), source })?;

        let table_path = self.table_path();
        remove_if_present(&table_path)?;
        let data = serde_json::to_vec(table.entries())?;
        fs::write(&table_path, data)
            .map_err(|source| CacheError::WriteFailed { path: table_path.clone(), source })?;

        let version_path = self.version_path();
        fs::write(&version_path, version)
            .map_err(|source| CacheError::WriteFailed { path: version_path, source })?;

        debug!("Cached {} symbols at {}", table.len(), table_path.display());
        Ok(())
    }

    /// Delete the cached table and its version key
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be removed
    pub fn invalidate(&self) -> Result<(), CacheError> {
        remove_if_present(&self.table_path())?;
        remove_if_present(&self.version_path())?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
