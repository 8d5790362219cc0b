//! Address to symbol resolution
//!
//! Each batch is resolved with one [`Strategy`], chosen by the caller from
//! the current [`SymbolContext`](super::SymbolContext) state. Output is
//! order-preserving with exactly one [`ResolvedSymbol`] per input address.

use log::debug;
use std::path::Path;

use super::context::Strategy;
use super::image::display_name;
use super::loader::{DladdrLoader, DynamicLoader};
use super::table::RuntimeSymbolTable;
use crate::capture::RawFrame;
use crate::domain::{Address, LoadBias};

/// Symbol name of a table frame outside the table's span
pub const UNRESOLVED_SYMBOL: &str = "not symbol";
/// Image name of a table frame outside the table's span
///
/// The table only covers the executable, so anything else is labelled as a
/// shared object such as libc rather than with a generic dynamic-library tag.
pub const UNRESOLVED_IMAGE: &str = "<shared library>";
/// Image name when the loader knows nothing about an address
pub const UNKNOWN_IMAGE: &str = "-";

/// One captured address and what it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub frame_index: usize,
    pub address: Address,
    pub symbol_name: String,
    pub symbol_address: Address,
    pub image_name: String,
    /// `address - bias - symbol_address`
    pub offset: u64,
}

/// Stack trace resolver
///
/// Owns the loader backend; the table (when there is one) arrives with the
/// strategy for each batch.
#[derive(Debug, Default)]
pub struct SymbolResolver<L = DladdrLoader> {
    loader: L,
}

impl<L: DynamicLoader> SymbolResolver<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }

    /// Resolve a batch of raw addresses, innermost frame first
    pub fn resolve(&self, strategy: &Strategy<'_>, addresses: &[Address]) -> Vec<ResolvedSymbol> {
        RawFrame::enumerate(addresses)
            .map(|frame| match *strategy {
                Strategy::TableBacked { table, bias, image_name } => {
                    resolve_in_table(table, bias, image_name, frame)
                }
                Strategy::LoaderBacked => self.resolve_with_loader(frame),
            })
            .collect()
    }

    fn resolve_with_loader(&self, frame: RawFrame) -> ResolvedSymbol {
        let RawFrame { index: frame_index, address } = frame;
        let info = self.loader.lookup(address);
        let image_name = info
            .image_path
            .as_deref()
            .map_or_else(|| UNKNOWN_IMAGE.to_string(), |p| display_name(Path::new(p)));

        match (info.symbol, info.image_base) {
            (Some(symbol), _) => ResolvedSymbol {
                frame_index,
                address,
                offset: address.offset_from(symbol.address).unwrap_or(0),
                symbol_name: symbol.name,
                symbol_address: symbol.address,
                image_name,
            },
            (None, Some(base)) if info.image_path.is_some() => ResolvedSymbol {
                frame_index,
                address,
                symbol_name: image_name.clone(),
                symbol_address: base,
                image_name,
                offset: address.offset_from(base).unwrap_or(0),
            },
            _ => {
                debug!("Loader knows nothing about {address}");
                ResolvedSymbol {
                    frame_index,
                    address,
                    symbol_name: address.to_string(),
                    symbol_address: Address(0),
                    image_name,
                    offset: 0,
                }
            }
        }
    }
}

/// Predecessor lookup of `address - bias`
fn resolve_in_table(
    table: &RuntimeSymbolTable,
    bias: LoadBias,
    image_name: &str,
    frame: RawFrame,
) -> ResolvedSymbol {
    let RawFrame { index: frame_index, address } = frame;
    let hit = address.unbias(bias).and_then(|base| {
        let entry = table.lookup(base)?;
        Some((entry, base.offset_from(entry.address)?))
    });

    match hit {
        Some((entry, offset)) => ResolvedSymbol {
            frame_index,
            address,
            symbol_name: entry.symbol_name(),
            symbol_address: entry.address,
            image_name: image_name.to_string(),
            offset,
        },
        None => ResolvedSymbol {
            frame_index,
            address,
            symbol_name: UNRESOLVED_SYMBOL.to_string(),
            symbol_address: Address(0),
            image_name: UNRESOLVED_IMAGE.to_string(),
            offset: 0,
        },
    }
}
