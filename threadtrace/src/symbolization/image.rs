//! Identity of the main executable image
//!
//! The dynamic loader reports the main program first when iterating loaded
//! objects; its base is the load bias applied to every address recorded in
//! the executable.

#![allow(unsafe_code)] // dl_iterate_phdr is FFI

use log::{debug, info};
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use super::memory_maps::{parse_memory_maps, MemoryRange};
use crate::domain::{Address, LoadBias, Pid, TraceError};

/// The process' own executable, as loaded for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    pub path: PathBuf,
    pub bias: LoadBias,
    /// Mapped address range, when /proc could tell
    pub range: Option<MemoryRange>,
}

impl ExecutableImage {
    pub fn new(path: impl Into<PathBuf>, bias: LoadBias, range: Option<MemoryRange>) -> Self {
        Self { path: path.into(), bias, range }
    }

    /// Locate the running executable and its load bias
    ///
    /// # Errors
    /// Returns an error if the loader reports no objects or the executable
    /// path cannot be determined
    pub fn current() -> Result<Self, TraceError> {
        let bias = main_program_bias().ok_or(TraceError::ExecutableNotFound)?;
        let path = std::env::current_exe()?;

        let range = path
            .to_str()
            .and_then(|p| parse_memory_maps(Pid::current(), p).map_err(|e| debug!("{e:#}")).ok());

        info!("Executable {} loaded with bias {bias}", path.display());
        Ok(Self { path, bias, range })
    }

    /// File name shown in formatted frames
    #[must_use]
    pub fn name(&self) -> String {
        display_name(&self.path)
    }

    /// Whether a runtime address lies inside the executable
    ///
    /// Without a known range every address is accepted.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        self.range.map_or(true, |r| r.contains(addr))
    }
}

/// Last path component, or `-` when there is none
#[must_use]
pub fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(|| "-".to_string(), |n| n.to_string_lossy().into_owned())
}

unsafe extern "C" fn first_object(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> libc::c_int {
    let slot = &mut *data.cast::<Option<u64>>();
    #[allow(clippy::useless_conversion)]
    {
        *slot = Some(u64::from((*info).dlpi_addr));
    }
    // Non-zero stops the iteration after the main program
    1
}

#[allow(clippy::cast_possible_wrap)]
fn main_program_bias() -> Option<LoadBias> {
    let mut base: Option<u64> = None;
    unsafe {
        libc::dl_iterate_phdr(Some(first_object), std::ptr::addr_of_mut!(base).cast::<c_void>());
    }
    base.map(|b| LoadBias(b as i64))
}
