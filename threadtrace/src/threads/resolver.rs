//! Logical thread → kernel thread resolution
//!
//! The main and calling threads have direct kernel handles. Any other thread
//! is found by name: its logical name is published to the kernel as a
//! matching key, the kernel thread list is scanned for an exact match, and
//! the previously published name is put back whatever the outcome.
//!
//! ## Known limitation
//!
//! The name match is a heuristic. Two threads sharing a name, or a thread
//! renamed by someone else while the scan runs, can resolve to the wrong
//! kernel thread. Nothing here serialises against concurrent renames.

#![allow(unsafe_code)] // pthread name accessors are FFI

use log::{debug, warn};
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::unix::thread::JoinHandleExt;
use std::thread::JoinHandle;

use super::registry::{kernel_visible_name, ProcThreadRegistry, ThreadRegistry, KERNEL_NAME_LIMIT};
use crate::domain::{Tid, TraceError};

/// A thread whose kernel-visible name can be read and set
pub trait NamedThread {
    /// Name the application gave the thread, if any
    fn logical_name(&self) -> Option<String>;

    /// Name the kernel currently holds for the thread
    ///
    /// # Errors
    /// Returns an error if the name cannot be read
    fn published_name(&self) -> Result<String, TraceError>;

    /// Replace the kernel-visible name
    ///
    /// # Errors
    /// Returns an error if the name cannot be set
    fn publish_name(&self, name: &str) -> Result<(), TraceError>;
}

/// Which thread to capture
#[derive(Clone, Copy)]
pub enum ThreadRef<'a> {
    Main,
    Current,
    Other(&'a dyn NamedThread),
}

impl std::fmt::Debug for ThreadRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadRef::Main => f.write_str("Main"),
            ThreadRef::Current => f.write_str("Current"),
            ThreadRef::Other(t) => write!(f, "Other({:?})", t.logical_name()),
        }
    }
}

/// A thread spawned through `std::thread`, borrowed from its join handle
///
/// Borrowing the handle keeps the thread joinable, so its pthread id stays
/// valid for as long as this value lives.
pub struct SpawnedThread<'a> {
    pthread: libc::pthread_t,
    logical_name: Option<String>,
    _handle: PhantomData<&'a ()>,
}

impl<'a> SpawnedThread<'a> {
    #[must_use]
    #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
    pub fn new<T>(handle: &'a JoinHandle<T>) -> Self {
        Self {
            pthread: handle.as_pthread_t() as libc::pthread_t,
            logical_name: handle.thread().name().map(str::to_string),
            _handle: PhantomData,
        }
    }
}

impl NamedThread for SpawnedThread<'_> {
    fn logical_name(&self) -> Option<String> {
        self.logical_name.clone()
    }

    fn published_name(&self) -> Result<String, TraceError> {
        let mut buf = [0 as libc::c_char; KERNEL_NAME_LIMIT + 1];
        let rc = unsafe { libc::pthread_getname_np(self.pthread, buf.as_mut_ptr(), buf.len()) };
        if rc != 0 {
            return Err(TraceError::RenameFailed(format!("pthread_getname_np errno {rc}")));
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }

    fn publish_name(&self, name: &str) -> Result<(), TraceError> {
        let name = CString::new(kernel_visible_name(name))
            .map_err(|e| TraceError::RenameFailed(e.to_string()))?;
        let rc = unsafe { libc::pthread_setname_np(self.pthread, name.as_ptr()) };
        if rc != 0 {
            return Err(TraceError::RenameFailed(format!("pthread_setname_np errno {rc}")));
        }
        Ok(())
    }
}

/// Puts the original kernel name back when dropped
struct RestoreName<'a> {
    thread: &'a dyn NamedThread,
    original: String,
}

impl Drop for RestoreName<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.thread.publish_name(&self.original) {
            warn!("Could not restore thread name \"{}\": {e}", self.original);
        }
    }
}

/// Maps [`ThreadRef`]s to kernel thread ids
pub struct ThreadResolver<R = ProcThreadRegistry> {
    registry: R,
}

impl Default for ThreadResolver<ProcThreadRegistry> {
    fn default() -> Self {
        Self::new(ProcThreadRegistry::current())
    }
}

impl<R: ThreadRegistry> ThreadResolver<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Resolve `thread` to a kernel thread
    ///
    /// Never fails: a thread that cannot be found resolves to the calling
    /// thread.
    pub fn resolve(&self, thread: ThreadRef<'_>) -> Tid {
        match thread {
            ThreadRef::Main => Tid::main(),
            ThreadRef::Current => Tid::current(),
            ThreadRef::Other(named) => self.match_by_name(named).unwrap_or_else(|| {
                let fallback = Tid::current();
                warn!(
                    "No kernel thread matches {:?}, falling back to calling thread {fallback}",
                    named.logical_name()
                );
                fallback
            }),
        }
    }

    fn match_by_name(&self, thread: &dyn NamedThread) -> Option<Tid> {
        let key = thread.logical_name()?;
        let key = kernel_visible_name(&key);
        if key.is_empty() {
            return None;
        }

        // Held until the end of this function, so the name comes back on
        // every return path
        let _restore = match thread.published_name() {
            Ok(original) => Some(RestoreName { thread, original }),
            Err(e) => {
                debug!("Cannot read current thread name, scanning without restore: {e}");
                None
            }
        };
        if let Err(e) = thread.publish_name(key) {
            debug!("Cannot publish matching key \"{key}\": {e}");
        }

        let threads = match self.registry.list() {
            Ok(threads) => threads,
            Err(e) => {
                warn!("{}", TraceError::ThreadListFailed(format!("{e:#}")));
                return None;
            }
        };

        let found = threads.iter().find(|t| t.name == key).map(|t| t.tid);
        if let Some(tid) = found {
            debug!("Thread \"{key}\" resolved to {tid}");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::registry::KernelThread;
    use std::cell::RefCell;

    struct FakeRegistry {
        threads: Vec<KernelThread>,
        fail: bool,
    }

    impl ThreadRegistry for FakeRegistry {
        fn list(&self) -> anyhow::Result<Vec<KernelThread>> {
            if self.fail {
                anyhow::bail!("registry unavailable");
            }
            Ok(self.threads.clone())
        }
    }

    /// Records every rename so restores can be checked
    struct FakeThread {
        logical: Option<String>,
        published: RefCell<String>,
        history: RefCell<Vec<String>>,
    }

    impl FakeThread {
        fn new(logical: Option<&str>, published: &str) -> Self {
            Self {
                logical: logical.map(str::to_string),
                published: RefCell::new(published.to_string()),
                history: RefCell::new(Vec::new()),
            }
        }
    }

    impl NamedThread for FakeThread {
        fn logical_name(&self) -> Option<String> {
            self.logical.clone()
        }

        fn published_name(&self) -> Result<String, TraceError> {
            Ok(self.published.borrow().clone())
        }

        fn publish_name(&self, name: &str) -> Result<(), TraceError> {
            *self.published.borrow_mut() = name.to_string();
            self.history.borrow_mut().push(name.to_string());
            Ok(())
        }
    }

    fn registry(names: &[(u32, &str)]) -> FakeRegistry {
        FakeRegistry {
            threads: names
                .iter()
                .map(|(tid, name)| KernelThread { tid: Tid(*tid), name: (*name).to_string() })
                .collect(),
            fail: false,
        }
    }

    #[test]
    fn test_main_and_current_are_direct() {
        let resolver = ThreadResolver::new(registry(&[]));
        assert_eq!(resolver.resolve(ThreadRef::Main), Tid::main());
        assert_eq!(resolver.resolve(ThreadRef::Current), Tid::current());
    }

    #[test]
    fn test_match_by_name_restores_original() {
        let resolver = ThreadResolver::new(registry(&[(10, "main"), (11, "io-worker")]));
        let thread = FakeThread::new(Some("io-worker"), "old-name");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid(11));
        assert_eq!(*thread.published.borrow(), "old-name");
        assert_eq!(*thread.history.borrow(), vec!["io-worker", "old-name"]);
    }

    #[test]
    fn test_no_match_falls_back_to_current_and_restores() {
        let resolver = ThreadResolver::new(registry(&[(10, "main")]));
        let thread = FakeThread::new(Some("ghost"), "ghost-orig");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid::current());
        assert_eq!(*thread.published.borrow(), "ghost-orig");
    }

    #[test]
    fn test_registry_failure_falls_back_and_restores() {
        let mut reg = registry(&[(11, "io-worker")]);
        reg.fail = true;
        let resolver = ThreadResolver::new(reg);
        let thread = FakeThread::new(Some("io-worker"), "before");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid::current());
        assert_eq!(*thread.published.borrow(), "before");
    }

    #[test]
    fn test_unnamed_thread_falls_back_without_renaming() {
        let resolver = ThreadResolver::new(registry(&[(11, "io-worker")]));
        let thread = FakeThread::new(None, "before");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid::current());
        assert!(thread.history.borrow().is_empty());
    }

    #[test]
    fn test_long_names_match_kernel_truncation() {
        let resolver = ThreadResolver::new(registry(&[(12, "tokio-runtime-w")]));
        let thread = FakeThread::new(Some("tokio-runtime-worker"), "x");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid(12));
    }

    #[test]
    fn test_first_duplicate_wins() {
        // Documented limitation: duplicates are ambiguous, lowest listed wins
        let resolver = ThreadResolver::new(registry(&[(20, "dup"), (21, "dup")]));
        let thread = FakeThread::new(Some("dup"), "dup");

        assert_eq!(resolver.resolve(ThreadRef::Other(&thread)), Tid(20));
    }

    #[test]
    fn test_spawned_thread_resolves_to_its_tid() {
        let (tid_tx, tid_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("tt-resolve".to_string())
            .spawn(move || {
                tid_tx.send(Tid::current()).unwrap();
                let _ = stop_rx.recv();
            })
            .unwrap();
        let expected = tid_rx.recv().unwrap();

        let thread = SpawnedThread::new(&handle);
        let resolver = ThreadResolver::new(ProcThreadRegistry::current());
        let resolved = resolver.resolve(ThreadRef::Other(&thread));
        assert_eq!(resolved, expected);
        assert_eq!(thread.published_name().unwrap(), "tt-resolve");

        drop(stop_tx);
        handle.join().unwrap();
    }
}
