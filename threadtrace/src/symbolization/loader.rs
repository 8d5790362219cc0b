//! Dynamic loader introspection
//!
//! Used when no runtime symbol table is available. `dladdr` names the image
//! containing an address and the nearest exported symbol. When the loader
//! knows the image but not the symbol (stripped dynamic symbols, static
//! functions), the image file's own ELF symbol tables are scanned for the
//! nearest symbol at or below the address.

#![allow(unsafe_code)] // dladdr is FFI

use log::debug;
use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::memory_maps::read_memory_maps;
use crate::domain::{Address, Pid};

/// A named symbol and where it starts in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSymbol {
    pub name: String,
    pub address: Address,
}

/// What the loader knows about an address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderInfo {
    /// Path of the image containing the address
    pub image_path: Option<String>,
    /// Address the image is loaded at
    pub image_base: Option<Address>,
    /// Nearest symbol at or below the address
    pub symbol: Option<LoaderSymbol>,
}

/// Answers "which image and symbol cover this address"
pub trait DynamicLoader: Send + Sync {
    fn lookup(&self, addr: Address) -> LoaderInfo;
}

impl<T: DynamicLoader + ?Sized> DynamicLoader for Box<T> {
    fn lookup(&self, addr: Address) -> LoaderInfo {
        (**self).lookup(addr)
    }
}

/// `dladdr` with an ELF symbol table fallback
///
/// Includes a cache of parsed symbol tables per image, so each image file is
/// read at most once.
#[derive(Debug, Default)]
pub struct DladdrLoader {
    symtabs: Mutex<HashMap<PathBuf, Option<Arc<ElfSymbols>>>>,
}

impl DladdrLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn symbols_for(&self, path: &Path) -> Option<Arc<ElfSymbols>> {
        let cached = self.symtabs.lock().unwrap_or_else(PoisonError::into_inner).get(path).cloned();
        if let Some(cached) = cached {
            return cached;
        }

        // Parse outside the lock; a racing thread may parse the same file
        let parsed = match ElfSymbols::load(path) {
            Ok(symbols) => Some(Arc::new(symbols)),
            Err(e) => {
                debug!("No symbol table for {}: {e:#}", path.display());
                None
            }
        };

        self.symtabs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_insert(parsed)
            .clone()
    }
}

impl DynamicLoader for DladdrLoader {
    fn lookup(&self, addr: Address) -> LoaderInfo {
        let mut info = dladdr(addr);

        if info.symbol.is_none() {
            if let (Some(path), Some(base)) = (info.image_path.as_deref(), info.image_base) {
                let path = image_file(addr, path);
                if let Some(symbols) = self.symbols_for(&path) {
                    info.symbol = symbols.nearest(addr, base);
                }
            }
        }
        info
    }
}

/// On-disk file of the image mapped at `addr`
///
/// The loader reports the main program under its `argv[0]`, which may be
/// relative; the kernel's mapping table always has the absolute path.
fn image_file(addr: Address, reported: &str) -> PathBuf {
    if reported.starts_with('/') {
        return PathBuf::from(reported);
    }
    read_memory_maps(Pid::current())
        .ok()
        .and_then(|maps| maps.into_iter().find(|m| m.range.contains(addr)))
        .and_then(|m| m.path)
        .map_or_else(|| PathBuf::from(reported), PathBuf::from)
}

#[allow(clippy::cast_possible_truncation)]
fn dladdr(addr: Address) -> LoaderInfo {
    let mut raw: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(addr.0 as usize as *const c_void, &mut raw) } == 0 {
        return LoaderInfo::default();
    }

    let image_path = c_string(raw.dli_fname).filter(|p| !p.is_empty());
    let image_base = (!raw.dli_fbase.is_null()).then(|| Address::from(raw.dli_fbase as usize));
    let symbol = c_string(raw.dli_sname).filter(|s| !s.is_empty()).and_then(|name| {
        (!raw.dli_saddr.is_null())
            .then(|| LoaderSymbol { name, address: Address::from(raw.dli_saddr as usize) })
    });

    LoaderInfo { image_path, image_base, symbol }
}

fn c_string(ptr: *const libc::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Function symbols of one ELF file, sorted by file address
#[derive(Debug)]
pub struct ElfSymbols {
    /// Page-aligned address of the first loadable segment
    first_segment: u64,
    symbols: Vec<(u64, String)>,
}

impl ElfSymbols {
    /// Read the static and dynamic symbol tables of an ELF file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read(path)?;
        let obj = object::File::parse(&*data).map_err(|e| anyhow::anyhow!("{e}"))?;

        let first_segment = obj.segments().map(|s| s.address()).min().unwrap_or(0) & !0xfff;

        let mut symbols: Vec<(u64, String)> = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter(|s| s.kind() == SymbolKind::Text && s.address() != 0)
            .filter_map(|s| {
                let name = s.name().ok()?;
                (!name.is_empty()).then(|| (s.address(), name.to_string()))
            })
            .collect();
        symbols.sort_unstable();
        symbols.dedup();

        Ok(Self { first_segment, symbols })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Nearest symbol at or below a runtime address
    ///
    /// `image_base` is where the first segment was mapped.
    #[must_use]
    pub fn nearest(&self, addr: Address, image_base: Address) -> Option<LoaderSymbol> {
        let file_addr = addr.offset_from(image_base)?.checked_add(self.first_segment)?;
        let end = self.symbols.partition_point(|(a, _)| *a <= file_addr);
        let (sym_addr, name) = self.symbols.get(end.checked_sub(1)?)?;

        let runtime = sym_addr.checked_sub(self.first_segment)?.checked_add(image_base.0)?;
        Some(LoaderSymbol { name: name.clone(), address: Address(runtime) })
    }
}
