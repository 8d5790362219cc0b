//! Kernel thread enumeration
//!
//! Lists the threads of the current process with the names the kernel holds
//! for them, by reading the /proc filesystem.

use anyhow::{Context, Result};
use std::fs;

use crate::domain::{Pid, Tid};

/// Longest name the kernel stores for a thread (`TASK_COMM_LEN - 1`)
pub const KERNEL_NAME_LIMIT: usize = 15;

/// A kernel thread together with its kernel-visible name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelThread {
    pub tid: Tid,
    pub name: String,
}

/// Capability to enumerate the kernel threads of this process
///
/// Abstracted so the name-matching resolver can run against a fake listing
/// in tests instead of the live process.
pub trait ThreadRegistry: Send + Sync {
    /// All kernel threads of the process with their current names
    ///
    /// # Errors
    /// Returns an error if the threads cannot be enumerated
    fn list(&self) -> Result<Vec<KernelThread>>;
}

impl<T: ThreadRegistry + ?Sized> ThreadRegistry for Box<T> {
    fn list(&self) -> Result<Vec<KernelThread>> {
        (**self).list()
    }
}

/// Registry backed by `/proc/<pid>/task/*/comm`
#[derive(Debug, Clone, Copy)]
pub struct ProcThreadRegistry {
    pid: Pid,
}

impl ProcThreadRegistry {
    /// Registry for the calling process
    #[must_use]
    pub fn current() -> Self {
        Self { pid: Pid::current() }
    }
}

impl Default for ProcThreadRegistry {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadRegistry for ProcThreadRegistry {
    fn list(&self) -> Result<Vec<KernelThread>> {
        list_process_threads(self.pid)
    }
}

/// Read every thread of `pid` from /proc/pid/task/*/comm
///
/// Threads that exit while the directory is being walked are skipped.
///
/// # Errors
/// Returns an error if /proc filesystem cannot be accessed or read
pub fn list_process_threads(pid: Pid) -> Result<Vec<KernelThread>> {
    let task_dir = format!("/proc/{}/task", pid.0);

    let entries = fs::read_dir(&task_dir).context(format!("Failed to read {task_dir}"))?;

    let mut threads: Vec<KernelThread> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let tid = entry.file_name().to_string_lossy().parse::<u32>().ok()?;

            let comm_path = format!("/proc/{}/task/{}/comm", pid.0, tid);
            let comm = fs::read_to_string(comm_path).ok()?;

            Some(KernelThread { tid: Tid(tid), name: comm.trim_end_matches('\n').to_string() })
        })
        .collect();

    threads.sort_by_key(|t| t.tid);
    log::debug!("Listed {} threads of {}", threads.len(), pid);
    Ok(threads)
}

/// Cut `name` down to what the kernel would keep
///
/// Truncates on a character boundary so the result stays valid UTF-8.
#[must_use]
pub fn kernel_visible_name(name: &str) -> &str {
    if name.len() <= KERNEL_NAME_LIMIT {
        return name;
    }
    let mut end = KERNEL_NAME_LIMIT;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
