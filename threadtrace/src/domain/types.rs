//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep kernel thread ids, raw addresses and load
//! biases from being mixed up, and make the address arithmetic explicit:
//! every subtraction on an [`Address`] is checked, so "below the table" turns
//! into `None` instead of a wrapped huge offset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The id of the calling process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Kernel thread ID
///
/// The schedulable thread as the kernel sees it (`/proc/self/task/<tid>`).
/// This is distinct from [`std::thread::ThreadId`], which is a
/// language-level identity with no kernel meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl Tid {
    /// The kernel id of the calling thread
    #[must_use]
    #[allow(unsafe_code, clippy::cast_sign_loss)]
    pub fn current() -> Self {
        // gettid() cannot fail
        Tid(unsafe { libc::gettid() } as u32)
    }

    /// The kernel id of the process' main thread
    ///
    /// On Linux the main thread's TID is the process id.
    #[must_use]
    pub fn main() -> Self {
        Tid(Pid::current().0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Load bias (ASLR slide) of an image
///
/// The signed distance between where the loader put the image and the
/// addresses recorded in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadBias(pub i64);

impl fmt::Display for LoadBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-0x{:x}", self.0.unsigned_abs())
        } else {
            write!(f, "0x{:x}", self.0)
        }
    }
}

/// A raw code address
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub u64);

impl Address {
    /// Remove a load bias, recovering the address as recorded in the image
    ///
    /// Returns `None` if the result would leave the address space.
    #[must_use]
    pub fn unbias(self, bias: LoadBias) -> Option<Address> {
        if bias.0 >= 0 {
            self.0.checked_sub(bias.0.unsigned_abs()).map(Address)
        } else {
            self.0.checked_add(bias.0.unsigned_abs()).map(Address)
        }
    }

    /// Distance from `base` up to this address
    ///
    /// Returns `None` when `base` lies above this address.
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Address(addr as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
