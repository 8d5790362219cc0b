//! Runtime symbol table construction
//!
//! A table is either restored from the cache (when the stored version key
//! matches the running app version) or collected from the metadata source:
//! every method's implementation address minus the executable's load bias,
//! sorted ascending. A fresh table replaces whatever the cache held.

use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::Arc;

use super::cache::SymbolCache;
use super::image::ExecutableImage;
use super::metadata::MetadataSource;
use super::table::{RuntimeSymbolTable, SymbolEntry};
use crate::domain::CacheError;

/// Where a published table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOrigin {
    /// Restored from the on-disk cache
    Cache,
    /// Collected from runtime metadata during this launch
    Runtime,
}

impl fmt::Display for TableOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableOrigin::Cache => f.write_str("cache"),
            TableOrigin::Runtime => f.write_str("runtime metadata"),
        }
    }
}

/// Builds the runtime symbol table for one executable image
#[derive(Clone)]
pub struct SymbolTableBuilder {
    source: Arc<dyn MetadataSource>,
    cache: SymbolCache,
    app_version: String,
}

impl SymbolTableBuilder {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        cache: SymbolCache,
        app_version: impl Into<String>,
    ) -> Self {
        Self { source, cache, app_version: app_version.into() }
    }

    /// Restore from cache or collect afresh
    ///
    /// Never fails: cache problems are logged and trigger a rebuild, and a
    /// table that cannot be persisted is still returned.
    pub fn build(&self, image: &ExecutableImage) -> (RuntimeSymbolTable, TableOrigin) {
        match self.cache.restore(&self.app_version) {
            Ok(table) => {
                info!(
                    "Restored {} symbols from cache (version \"{}\")",
                    table.len(),
                    self.app_version
                );
                return (table, TableOrigin::Cache);
            }
            Err(CacheError::Missing(path)) => {
                debug!("Nothing cached at {}", path.display());
            }
            Err(e @ CacheError::Stale { .. }) => {
                info!("{e}, rebuilding");
                if let Err(e) = self.cache.invalidate() {
                    warn!("Failed to remove stale symbol cache: {e}");
                }
            }
            Err(e) => {
                warn!("Unusable symbol cache, rebuilding: {e}");
                if let Err(e) = self.cache.invalidate() {
                    warn!("Failed to remove corrupt symbol cache: {e}");
                }
            }
        }

        let table = collect(self.source.as_ref(), image);
        info!("Collected {} symbols from runtime metadata", table.len());

        if let Err(e) = self.cache.store(&self.app_version, &table) {
            warn!("Failed to persist symbol table, keeping it in memory only: {e}");
        }
        (table, TableOrigin::Runtime)
    }
}

/// Enumerate every registered method into a sorted table
///
/// Methods implemented outside the executable, or whose address would go
/// negative once the bias is removed, are skipped.
#[must_use]
pub fn collect(source: &dyn MetadataSource, image: &ExecutableImage) -> RuntimeSymbolTable {
    let mut entries = Vec::new();

    for ty in source.types() {
        for method in &ty.methods {
            if !image.contains(method.implementation) {
                debug!(
                    "Skipping {}::{} at {}: outside {}",
                    ty.name,
                    method.name,
                    method.implementation,
                    image.name()
                );
                continue;
            }
            let Some(address) = method.implementation.unbias(image.bias) else {
                debug!(
                    "Skipping {}::{}: {} is below the load bias",
                    ty.name, method.name, method.implementation
                );
                continue;
            };
            let entry = SymbolEntry::new(ty.name.clone(), method.name.clone(), address);
            trace!("{entry}");
            entries.push(entry);
        }
    }

    RuntimeSymbolTable::from_entries(entries)
}
