//! Fixed-width frame lines

use rustc_demangle::try_demangle;

use super::resolver::ResolvedSymbol;

/// Mangled name in, readable name out
///
/// Must return the input unchanged when it cannot demangle it.
pub trait Demangler: Send + Sync {
    fn demangle(&self, symbol: &str) -> String;
}

/// Rust symbol demangling, hash suffix dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct RustDemangler;

impl Demangler for RustDemangler {
    fn demangle(&self, symbol: &str) -> String {
        match try_demangle(symbol) {
            Ok(demangled) => format!("{demangled:#}"),
            Err(_) => symbol.to_string(),
        }
    }
}

/// Render one frame: index, image, raw address, symbol and offset
#[must_use]
pub fn format_symbol(symbol: &ResolvedSymbol, demangler: &dyn Demangler) -> String {
    format!(
        "{:<4}{:<35} 0x{:016x} {} + {}",
        symbol.frame_index,
        symbol.image_name,
        symbol.address.0,
        demangler.demangle(&symbol.symbol_name),
        symbol.offset
    )
}
