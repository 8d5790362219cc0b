//! Shared symbolization state
//!
//! A [`SymbolContext`] owns the published runtime table together with the
//! executable image (and load bias) it was built against. The table is
//! published exactly once, through a [`OnceLock`]: readers see either no
//! table or the complete one, never a partially built table, and never take
//! a lock to look.
//!
//! Until the background build publishes, every resolution uses the loader
//! strategy. Output for the same address can therefore change once the
//! build completes; that window is expected.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use super::builder::TableOrigin;
use super::image::ExecutableImage;
use super::table::RuntimeSymbolTable;
use crate::domain::LoadBias;

/// A complete table and the image it describes
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub table: RuntimeSymbolTable,
    pub image: ExecutableImage,
    pub image_name: String,
    pub origin: TableOrigin,
}

impl TableSnapshot {
    #[must_use]
    pub fn new(table: RuntimeSymbolTable, image: ExecutableImage, origin: TableOrigin) -> Self {
        let image_name = image.name();
        Self { table, image, image_name, origin }
    }
}

/// How one resolve call maps addresses to symbols
#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    /// Predecessor lookup in the runtime table after removing `bias`
    TableBacked { table: &'a RuntimeSymbolTable, bias: LoadBias, image_name: &'a str },
    /// Ask the dynamic loader
    LoaderBacked,
}

/// Owner of the published table and of the one-shot build
pub struct SymbolContext {
    snapshot: OnceLock<TableSnapshot>,
    /// Taken by whichever caller starts the build
    build_trigger: Mutex<Option<Sender<()>>>,
    /// Disconnects when the build finishes
    build_done: Receiver<()>,
}

impl Default for SymbolContext {
    fn default() -> Self {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Self {
            snapshot: OnceLock::new(),
            build_trigger: Mutex::new(Some(trigger)),
            build_done: done,
        }
    }
}

impl SymbolContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a table; only the first publication wins
    pub fn publish(&self, snapshot: TableSnapshot) -> bool {
        let count = snapshot.table.len();
        let origin = snapshot.origin;
        let published = self.snapshot.set(snapshot).is_ok();
        if published {
            info!("Symbol table ready: {count} symbols from {origin}");
        } else {
            warn!("Symbol table already published, dropping a second one");
        }
        published
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&TableSnapshot> {
        self.snapshot.get()
    }

    /// Whether a started build has finished
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.build_done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Strategy for a batch, using the table's own load bias
    #[must_use]
    pub fn strategy(&self) -> Strategy<'_> {
        self.strategy_with_bias(None)
    }

    /// Strategy for a batch whose addresses were captured under `bias`
    ///
    /// `None` uses the bias recorded when the table was built.
    #[must_use]
    pub fn strategy_with_bias(&self, bias: Option<LoadBias>) -> Strategy<'_> {
        match self.snapshot.get() {
            Some(snapshot) if !snapshot.table.is_empty() => Strategy::TableBacked {
                table: &snapshot.table,
                bias: bias.unwrap_or(snapshot.image.bias),
                image_name: &snapshot.image_name,
            },
            _ => Strategy::LoaderBacked,
        }
    }

    /// Run `build` once on a background thread and publish its result
    ///
    /// Later calls do not start another build; they get a handle on the
    /// first one.
    pub fn start_build<F>(self: &Arc<Self>, build: F) -> BuildHandle
    where
        F: FnOnce() -> Option<TableSnapshot> + Send + 'static,
    {
        let trigger = self.build_trigger.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handle = BuildHandle { context: Arc::clone(self) };

        let Some(trigger) = trigger else {
            debug!("Symbol table build already started");
            return handle;
        };

        let context = Arc::clone(self);
        let spawned = thread::Builder::new().name("threadtrace-symbols".to_string()).spawn(
            move || {
                if let Some(snapshot) = build() {
                    context.publish(snapshot);
                }
                // Dropping the sender marks the build as finished
                drop(trigger);
            },
        );
        if let Err(e) = spawned {
            // The closure, and the trigger with it, is gone: ready and empty
            warn!("Could not start symbol table build: {e}");
        }
        handle
    }
}

/// Handle on the background table build
#[derive(Clone)]
pub struct BuildHandle {
    context: Arc<SymbolContext>,
}

impl BuildHandle {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.context.is_ready()
    }

    /// Block until the build has finished
    pub fn wait(&self) {
        let _ = self.context.build_done.recv();
    }

    /// Block for at most `timeout`; returns whether the build finished
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.context.build_done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SymbolContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Address;
    use crate::symbolization::table::SymbolEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(bias: i64) -> TableSnapshot {
        TableSnapshot::new(
            RuntimeSymbolTable::from_entries(vec![SymbolEntry::new("T", "m", Address(100))]),
            ExecutableImage::new("/bin/app", LoadBias(bias), None),
            TableOrigin::Runtime,
        )
    }

    #[test]
    fn test_loader_strategy_before_publish() {
        let context = SymbolContext::new();
        assert!(matches!(context.strategy(), Strategy::LoaderBacked));
        assert!(!context.is_ready());
    }

    #[test]
    fn test_empty_table_keeps_loader_strategy() {
        let context = SymbolContext::new();
        context.publish(TableSnapshot::new(
            RuntimeSymbolTable::default(),
            ExecutableImage::new("/bin/app", LoadBias(0), None),
            TableOrigin::Runtime,
        ));
        assert!(matches!(context.strategy(), Strategy::LoaderBacked));
    }

    #[test]
    fn test_table_strategy_after_publish() {
        let context = SymbolContext::new();
        assert!(context.publish(snapshot(0x1000)));
        assert!(!context.publish(snapshot(0x2000)));

        match context.strategy() {
            Strategy::TableBacked { bias, image_name, .. } => {
                assert_eq!(bias, LoadBias(0x1000));
                assert_eq!(image_name, "app");
            }
            Strategy::LoaderBacked => panic!("table was published"),
        }
        match context.strategy_with_bias(Some(LoadBias(7))) {
            Strategy::TableBacked { bias, .. } => assert_eq!(bias, LoadBias(7)),
            Strategy::LoaderBacked => panic!("table was published"),
        }
    }

    #[test]
    fn test_build_runs_once() {
        let context = SymbolContext::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let first = {
            let runs = Arc::clone(&runs);
            context.start_build(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.recv();
                Some(snapshot(0))
            })
        };
        // Still blocked on release: not ready, loader strategy in use
        assert!(!first.is_ready());
        assert!(matches!(context.strategy(), Strategy::LoaderBacked));

        let second = {
            let runs = Arc::clone(&runs);
            context.start_build(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                None
            })
        };

        drop(release_tx);
        second.wait();
        assert!(first.is_ready());
        assert!(first.wait_timeout(Duration::from_millis(1)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(context.strategy(), Strategy::TableBacked { .. }));
    }

    #[test]
    fn test_failed_build_is_ready_and_empty() {
        let context = SymbolContext::new();
        let handle = context.start_build(|| None);
        handle.wait();
        assert!(handle.is_ready());
        assert!(context.snapshot().is_none());
        assert!(matches!(context.strategy(), Strategy::LoaderBacked));
    }
}
