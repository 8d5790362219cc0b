//! # threadtrace - In-process Thread Backtraces Without Debug Info
//!
//! threadtrace captures the call stack of a chosen thread in the running
//! process and turns every return address into a readable symbol: owning
//! type, method name, image and byte offset. It does not need DWARF or a
//! symbol table in the shipped binary; the application registers its own
//! types and methods, and those are turned into a sorted address table.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    Thread    │──▶│    Stack     │──▶│    Symbol    │──▶│  Formatter   │
//! │   Resolver   │   │   Capturer   │   │   Resolver   │   │ (demangler)  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘   └──────────────┘
//!   ThreadRef → TID    TID → addresses         │ strategy per batch
//!                                              ▼
//!                                   ┌─────────────────────┐
//!                                   │    SymbolContext    │◀── background
//!                                   │ (published once)    │    table build
//!                                   └─────────────────────┘    (+ cache)
//! ```
//!
//! ## Module Structure
//!
//! - [`threads`]: logical thread → kernel TID, including the name-matching
//!   heuristic for arbitrary threads
//! - [`capture`]: raw return addresses of a TID, via an in-place walk for the
//!   calling thread and a real-time signal for any other
//! - [`symbolization`]: runtime symbol table, cache, loader fallback,
//!   resolution and formatting
//! - [`backtracer`]: the pipeline wired together, plus the process-wide
//!   instance behind the free functions below
//! - [`config`]: cache location, app version, depth and timeouts
//! - [`domain`]: `Tid`, `Address`, `LoadBias` and error types
//!
//! ## Typical Usage
//!
//! ```rust,ignore
//! struct Parser;
//! impl Parser {
//!     fn parse(&self) {}
//! }
//!
//! fn main() {
//!     threadtrace::register_type(threadtrace::type_metadata!(Parser { parse }));
//!     threadtrace::initialize_symbol_table();
//!
//!     for line in threadtrace::capture_current_thread_symbols() {
//!         println!("{line}");
//!     }
//! }
//! ```
//!
//! ## Failure Behaviour
//!
//! Nothing here panics or returns an error to the caller. A thread that
//! cannot be found resolves to the calling thread, a thread that cannot be
//! sampled gives an empty capture, an address no strategy can explain is
//! rendered as a sentinel, and cache trouble triggers a rebuild. Each of
//! these is logged through the `log` facade.
//!
//! ## Key Concepts
//!
//! - **TID**: kernel thread id; the main thread's TID equals the PID
//! - **Load bias**: ASLR slide of the executable for this run
//! - **Runtime symbol table**: registered methods, unbiased and sorted
//! - **Loader fallback**: `dladdr` plus the image's ELF symbol table

pub mod backtracer;
pub mod capture;
pub mod config;
pub mod domain;
pub mod symbolization;
pub mod threads;

pub use backtracer::{global, install_global, Backtracer};
pub use config::TraceConfig;
pub use domain::{Address, LoadBias, Tid};
pub use symbolization::{BuildHandle, ResolvedSymbol, TypeMetadata};
pub use threads::{SpawnedThread, ThreadRef};

/// Formatted stack of the main thread
pub fn capture_main_thread_symbols() -> Vec<String> {
    global().capture_main_thread_symbols()
}

/// Formatted stack of the calling thread
pub fn capture_current_thread_symbols() -> Vec<String> {
    global().capture_current_thread_symbols()
}

/// Resolved stack of any thread
pub fn capture_thread(thread: ThreadRef<'_>) -> Vec<ResolvedSymbol> {
    global().capture_thread(thread)
}

/// Resolve and format addresses captured in a run with load bias `bias`
pub fn resolve_addresses(addresses: &[u64], bias: i64) -> Vec<String> {
    let addresses: Vec<Address> = addresses.iter().copied().map(Address).collect();
    global().resolve_addresses(&addresses, LoadBias(bias))
}

/// Start building the runtime symbol table in the background
///
/// Safe to call any number of times; only the first call starts a build.
pub fn initialize_symbol_table() -> BuildHandle {
    global().initialize_symbol_table()
}

/// Make a type's methods known to the symbol table
///
/// Types registered after the table was built are not included until the
/// next launch (or the next version change).
pub fn register_type(ty: TypeMetadata) {
    symbolization::global_registry().register(ty);
}
