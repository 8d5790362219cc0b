//! Thread resolution
//!
//! Turns a logical thread reference (main, current, or a spawned thread)
//! into the kernel thread id the capturer can signal.

pub mod registry;
pub mod resolver;

pub use registry::{list_process_threads, KernelThread, ProcThreadRegistry, ThreadRegistry};
pub use resolver::{NamedThread, SpawnedThread, ThreadRef, ThreadResolver};
