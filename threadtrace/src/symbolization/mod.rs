//! # Symbol Resolution and Address Translation
//!
//! This module converts raw return addresses captured from a thread's stack
//! into human-readable symbols: owning type, method name, image and byte
//! offset. It works without a conventional debug symbol table: the process
//! describes its own types and methods at runtime through a metadata
//! registry, and that description is turned into a sorted address table.
//!
//! ## Two Strategies
//!
//! Every resolve call picks exactly one strategy for the whole batch:
//!
//! - **Table-backed**: the runtime symbol table is published and non-empty.
//!   Each address has the load bias removed and is looked up by nearest
//!   predecessor. Addresses outside the table's span are unresolved
//!   (`not symbol`), never matched to a far-away neighbour.
//! - **Loader-backed**: no table yet. The dynamic loader (`dladdr`) names the
//!   image and nearest symbol; when it knows the image but not the symbol,
//!   the image file's ELF symbol table is scanned instead.
//!
//! ## PIE and the Load Bias
//!
//! Executables are position independent, so each run maps them at a
//! different base. The table stores addresses as recorded in the file:
//!
//! ```text
//! Static Address = Runtime Address - Load Bias
//! ```
//!
//! The bias is read once, when the table is built, from the first object the
//! loader reports (the main program). Lookups against that table must use
//! the same bias; [`Address::unbias`](crate::domain::Address::unbias) is
//! checked, so an address below the bias is unresolved rather than wrapped.
//!
//! ## Table Lifecycle
//!
//! ```text
//! initialize ──▶ background thread ──▶ cache hit? ──yes──▶ restore
//!                                          │
//!                                          no
//!                                          ▼
//!                            enumerate metadata, unbias, sort
//!                                          │
//!                                          ▼
//!                              persist (best effort) ──▶ publish once
//! ```
//!
//! Until publication every batch uses the loader strategy.
//!
//! ## Module Structure
//!
//! - **`table`**: `SymbolEntry` and the sorted `RuntimeSymbolTable`
//! - **`metadata`**: registry of types and method addresses
//! - **`image`**: main executable path, load bias and mapped range
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing
//! - **`cache`**: JSON table on disk, keyed by app version
//! - **`builder`**: restore-or-collect table construction
//! - **`context`**: one-shot publication and the background build
//! - **`loader`**: `dladdr` plus ELF symbol table fallback
//! - **`resolver`**: strategy dispatch, one result per address
//! - **`format`**: demangling and the fixed-width frame line
//!
//! ## Example
//!
//! ```rust,ignore
//! let context = SymbolContext::new();
//! let image = ExecutableImage::current()?;
//! let (table, origin) = builder.build(&image);
//! context.publish(TableSnapshot::new(table, image, origin));
//!
//! let resolver = SymbolResolver::new(DladdrLoader::new());
//! for symbol in resolver.resolve(&context.strategy(), &addresses) {
//!     println!("{}", format_symbol(&symbol, &RustDemangler));
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod context;
pub mod format;
pub mod image;
pub mod loader;
pub mod memory_maps;
pub mod metadata;
pub mod resolver;
pub mod table;

pub use builder::{collect, SymbolTableBuilder, TableOrigin};
pub use cache::SymbolCache;
pub use context::{BuildHandle, Strategy, SymbolContext, TableSnapshot};
pub use format::{format_symbol, Demangler, RustDemangler};
pub use image::ExecutableImage;
pub use loader::{DladdrLoader, DynamicLoader, LoaderInfo, LoaderSymbol};
pub use memory_maps::{parse_memory_maps, MemoryRange};
pub use metadata::{global_registry, MetadataRegistry, MetadataSource, MethodMetadata, TypeMetadata};
pub use resolver::{ResolvedSymbol, SymbolResolver};
pub use table::{RuntimeSymbolTable, SymbolEntry};
