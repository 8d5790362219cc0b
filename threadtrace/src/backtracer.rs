//! Capture, resolve and format in one place
//!
//! A [`Backtracer`] owns the symbol context and one instance of each
//! pipeline stage. Every stage sits behind its trait, so tests swap in fakes
//! for the thread listing, the frame walker, the dynamic loader, the
//! metadata source and the demangler.

use log::{debug, info, warn};
use std::sync::{Arc, OnceLock};

use crate::capture::{FrameWalker, SignalFrameWalker, StackCapturer};
use crate::config::TraceConfig;
use crate::domain::{Address, LoadBias};
use crate::symbolization::{
    format_symbol, global_registry, BuildHandle, Demangler, DladdrLoader, DynamicLoader,
    ExecutableImage, MetadataSource, ResolvedSymbol, RustDemangler, SymbolCache, SymbolContext,
    SymbolResolver, SymbolTableBuilder, TableSnapshot,
};
use crate::threads::{ProcThreadRegistry, ThreadRef, ThreadRegistry, ThreadResolver};

static GLOBAL: OnceLock<Backtracer> = OnceLock::new();

/// Thread stack capture and symbolization pipeline
pub struct Backtracer {
    config: TraceConfig,
    context: Arc<SymbolContext>,
    threads: ThreadResolver<Box<dyn ThreadRegistry>>,
    capturer: StackCapturer<Box<dyn FrameWalker>>,
    resolver: SymbolResolver<Box<dyn DynamicLoader>>,
    metadata: Arc<dyn MetadataSource>,
    demangler: Box<dyn Demangler>,
    /// Image the table is built for; discovered at build time when unset
    image: Option<ExecutableImage>,
}

impl Default for Backtracer {
    fn default() -> Self {
        Self::new(TraceConfig::default())
    }
}

impl Backtracer {
    /// Live-process pipeline reading metadata from the global registry
    #[must_use]
    pub fn new(config: TraceConfig) -> Self {
        let walker = SignalFrameWalker::new(config.reply_timeout);
        Self {
            context: SymbolContext::new(),
            threads: ThreadResolver::new(Box::new(ProcThreadRegistry::current())),
            capturer: StackCapturer::new(Box::new(walker)),
            resolver: SymbolResolver::new(Box::new(DladdrLoader::new())),
            metadata: Arc::new(global_registry()),
            demangler: Box::new(RustDemangler),
            image: None,
            config,
        }
    }

    #[must_use]
    pub fn with_thread_registry(mut self, registry: impl ThreadRegistry + 'static) -> Self {
        self.threads = ThreadResolver::new(Box::new(registry));
        self
    }

    #[must_use]
    pub fn with_frame_walker(mut self, walker: impl FrameWalker + 'static) -> Self {
        self.capturer = StackCapturer::new(Box::new(walker));
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: impl DynamicLoader + 'static) -> Self {
        self.resolver = SymbolResolver::new(Box::new(loader));
        self
    }

    #[must_use]
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata = source;
        self
    }

    #[must_use]
    pub fn with_demangler(mut self, demangler: impl Demangler + 'static) -> Self {
        self.demangler = Box::new(demangler);
        self
    }

    /// Build the table for `image` instead of the running executable
    #[must_use]
    pub fn with_image(mut self, image: ExecutableImage) -> Self {
        self.image = Some(image);
        self
    }

    #[must_use]
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SymbolContext> {
        &self.context
    }

    /// Start the background table build
    ///
    /// Returns immediately. Repeated calls return a handle on the same
    /// build instead of starting another one.
    pub fn initialize_symbol_table(&self) -> BuildHandle {
        let builder = SymbolTableBuilder::new(
            Arc::clone(&self.metadata),
            SymbolCache::new(&self.config.cache_dir),
            self.config.app_version.clone(),
        );
        let image = self.image.clone();

        self.context.start_build(move || {
            let image = match image {
                Some(image) => image,
                None => match ExecutableImage::current() {
                    Ok(image) => image,
                    Err(e) => {
                        warn!("No symbol table for this run: {e}");
                        return None;
                    }
                },
            };
            info!("Building symbol table for {}", image.path.display());
            let (table, origin) = builder.build(&image);
            Some(TableSnapshot::new(table, image, origin))
        })
    }

    /// Capture and resolve the stack of `thread`
    ///
    /// An exited or unreachable thread gives an empty result.
    pub fn capture_thread(&self, thread: ThreadRef<'_>) -> Vec<ResolvedSymbol> {
        let tid = self.threads.resolve(thread);
        let addresses = self.capturer.capture(tid, self.config.max_depth);
        self.resolver.resolve(&self.context.strategy(), &addresses)
    }

    /// Formatted stack of the main thread
    pub fn capture_main_thread_symbols(&self) -> Vec<String> {
        self.format_all(&self.capture_thread(ThreadRef::Main))
    }

    /// Formatted stack of the calling thread
    pub fn capture_current_thread_symbols(&self) -> Vec<String> {
        self.format_all(&self.capture_thread(ThreadRef::Current))
    }

    /// Resolve addresses captured elsewhere, e.g. read from a report
    ///
    /// `bias` is the load bias of the run that captured them; it applies to
    /// the table strategy only. The loader strategy can only describe images
    /// mapped in this process.
    pub fn resolve_addresses(&self, addresses: &[Address], bias: LoadBias) -> Vec<String> {
        let strategy = self.context.strategy_with_bias(Some(bias));
        debug!("Resolving {} external addresses (bias {bias})", addresses.len());
        self.format_all(&self.resolver.resolve(&strategy, addresses))
    }

    #[must_use]
    pub fn format(&self, symbol: &ResolvedSymbol) -> String {
        format_symbol(symbol, self.demangler.as_ref())
    }

    fn format_all(&self, symbols: &[ResolvedSymbol]) -> Vec<String> {
        symbols.iter().map(|s| self.format(s)).collect()
    }
}

/// The process-wide backtracer
///
/// Created with [`TraceConfig::default`] on first use unless
/// [`install_global`] ran earlier.
#[must_use]
pub fn global() -> &'static Backtracer {
    GLOBAL.get_or_init(Backtracer::default)
}

/// Replace the default configuration of the process-wide backtracer
///
/// # Errors
/// Returns the backtracer back if the global one already exists
pub fn install_global(backtracer: Backtracer) -> Result<(), Backtracer> {
    GLOBAL.set(backtracer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Tid, TraceError};
    use crate::symbolization::{LoaderInfo, TypeMetadata};
    use crate::threads::KernelThread;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoThreads;

    impl ThreadRegistry for NoThreads {
        fn list(&self) -> anyhow::Result<Vec<KernelThread>> {
            Ok(Vec::new())
        }
    }

    /// Returns the same addresses for any thread, recording who was asked
    struct CannedWalker {
        addresses: Vec<Address>,
        asked: Arc<Mutex<Vec<Tid>>>,
    }

    impl FrameWalker for CannedWalker {
        fn walk(&self, tid: Tid, max_depth: usize) -> Result<Vec<Address>, TraceError> {
            self.asked.lock().unwrap().push(tid);
            Ok(self.addresses.iter().copied().take(max_depth).collect())
        }
    }

    struct BlindLoader;

    impl DynamicLoader for BlindLoader {
        fn lookup(&self, _addr: Address) -> LoaderInfo {
            LoaderInfo::default()
        }
    }

    struct FixedSource(Vec<TypeMetadata>);

    impl MetadataSource for FixedSource {
        fn types(&self) -> Vec<TypeMetadata> {
            self.0.clone()
        }
    }

    fn backtracer(dir: &TempDir, addresses: &[u64]) -> (Backtracer, Arc<Mutex<Vec<Tid>>>) {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let walker = CannedWalker {
            addresses: addresses.iter().copied().map(Address).collect(),
            asked: Arc::clone(&asked),
        };
        let source = FixedSource(vec![TypeMetadata::new("Parser")
            .method("parse", 0x1100)
            .method("reset", 0x1200)
            .method("flush", 0x1300)]);
        let tracer = Backtracer::new(TraceConfig::default().with_cache_dir(dir.path()))
            .with_thread_registry(NoThreads)
            .with_frame_walker(walker)
            .with_loader(BlindLoader)
            .with_metadata_source(Arc::new(source))
            .with_image(ExecutableImage::new("/bin/app", LoadBias(0x1000), None));
        (tracer, asked)
    }

    #[test]
    fn test_loader_fallback_before_build() {
        let dir = TempDir::new().unwrap();
        let (tracer, _) = backtracer(&dir, &[0x1150]);

        let lines = tracer.capture_current_thread_symbols();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("0   -"));
        assert!(lines[0].ends_with(" 0x1150 + 0"));
    }

    #[test]
    fn test_table_used_after_build() {
        let dir = TempDir::new().unwrap();
        let (tracer, _) = backtracer(&dir, &[0x1150, 0x1210, 0x9000]);

        tracer.initialize_symbol_table().wait();
        let lines = tracer.capture_current_thread_symbols();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0   app "));
        assert!(lines[0].ends_with(" [Parser parse] + 80"));
        // Between reset and flush, so still inside the table's span
        assert!(lines[1].ends_with(" [Parser reset] + 16"));
        assert!(lines[2].starts_with("2   <shared library> "));
        assert!(lines[2].ends_with(" not symbol + 0"));
    }

    #[test]
    fn test_main_thread_resolves_to_pid() {
        let dir = TempDir::new().unwrap();
        let (tracer, asked) = backtracer(&dir, &[0x1150]);

        tracer.capture_main_thread_symbols();
        assert_eq!(asked.lock().unwrap().as_slice(), &[Tid::main()]);
    }

    #[test]
    fn test_max_depth_limits_capture() {
        let dir = TempDir::new().unwrap();
        let (mut tracer, _) = backtracer(&dir, &[0x1150, 0x1160, 0x1170]);
        tracer.config.max_depth = 2;

        assert_eq!(tracer.capture_thread(ThreadRef::Current).len(), 2);
    }

    #[test]
    fn test_resolve_addresses_with_foreign_bias() {
        let dir = TempDir::new().unwrap();
        let (tracer, _) = backtracer(&dir, &[]);
        assert!(tracer.initialize_symbol_table().wait_timeout(Duration::from_secs(10)));

        // Captured in a run where the executable sat at 0x5000
        let lines = tracer.resolve_addresses(&[Address(0x5108), Address(0x10)], LoadBias(0x5000));
        assert!(lines[0].ends_with(" [Parser parse] + 8"));
        assert!(lines[1].ends_with(" not symbol + 0"));
    }

    #[test]
    fn test_initialize_twice_shares_build() {
        let dir = TempDir::new().unwrap();
        let (tracer, _) = backtracer(&dir, &[]);

        let first = tracer.initialize_symbol_table();
        let second = tracer.initialize_symbol_table();
        second.wait();
        assert!(first.is_ready());
        assert_eq!(tracer.context().snapshot().map(|s| s.table.len()), Some(3));
    }
}
