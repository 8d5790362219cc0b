//! Address-sorted runtime symbol table
//!
//! Entries hold static addresses (runtime address minus the executable's
//! load bias), so a table stays valid across launches of the same binary
//! and can be cached on disk.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Address;

/// One statically addressed method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolEntry {
    #[serde(rename = "class")]
    pub owning_type: String,
    pub name: String,
    pub address: Address,
}

impl SymbolEntry {
    pub fn new(owning_type: impl Into<String>, name: impl Into<String>, address: Address) -> Self {
        Self { owning_type: owning_type.into(), name: name.into(), address }
    }

    /// Display name used for table-backed frames
    #[must_use]
    pub fn symbol_name(&self) -> String {
        format!("[{} {}]", self.owning_type, self.name)
    }
}

impl fmt::Display for SymbolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class: {}    name:{}   address:{:x}", self.owning_type, self.name, self.address)
    }
}

/// Immutable, address-sorted sequence of [`SymbolEntry`]
///
/// An empty table is valid and means "no runtime table, use the loader".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSymbolTable {
    entries: Vec<SymbolEntry>,
}

impl RuntimeSymbolTable {
    /// Build a table from entries in any order
    ///
    /// The sort is stable, so entries sharing an address keep their
    /// enumeration order.
    #[must_use]
    pub fn from_entries(mut entries: Vec<SymbolEntry>) -> Self {
        entries.sort_by_key(|e| e.address);
        Self { entries }
    }

    /// Accept entries only if they are already sorted by address
    #[must_use]
    pub fn from_sorted(entries: Vec<SymbolEntry>) -> Option<Self> {
        entries.windows(2).all(|w| w[0].address <= w[1].address).then_some(Self { entries })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    /// Lowest and highest entry address
    #[must_use]
    pub fn span(&self) -> Option<(Address, Address)> {
        Some((self.entries.first()?.address, self.entries.last()?.address))
    }

    /// Entry covering a static address
    ///
    /// Returns the last entry whose address is `<= addr`, or `None` when
    /// `addr` lies outside `[first.address, last.address]`.
    #[must_use]
    pub fn lookup(&self, addr: Address) -> Option<&SymbolEntry> {
        let (low, high) = self.span()?;
        if addr < low || addr > high {
            return None;
        }
        let end = self.entries.partition_point(|e| e.address <= addr);
        // end >= 1 because addr >= low
        self.entries.get(end - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: u64) -> SymbolEntry {
        SymbolEntry::new("T", format!("m{addr}"), Address(addr))
    }

    #[test]
    fn test_from_entries_sorts() {
        let table = RuntimeSymbolTable::from_entries(vec![entry(300), entry(100), entry(200)]);
        let addrs: Vec<u64> = table.entries().iter().map(|e| e.address.0).collect();
        assert_eq!(addrs, vec![100, 200, 300]);
    }

    #[test]
    fn test_from_sorted_rejects_unsorted() {
        assert!(RuntimeSymbolTable::from_sorted(vec![entry(200), entry(100)]).is_none());
        let ties = vec![entry(100), entry(100), entry(200)];
        assert!(RuntimeSymbolTable::from_sorted(ties).is_some());
    }

    #[test]
    fn test_lookup_predecessor() {
        let table = RuntimeSymbolTable::from_entries(vec![entry(100), entry(200), entry(300)]);

        assert_eq!(table.lookup(Address(250)).map(|e| e.address), Some(Address(200)));
        assert_eq!(table.lookup(Address(300)).map(|e| e.address), Some(Address(300)));
        assert_eq!(table.lookup(Address(100)).map(|e| e.address), Some(Address(100)));
        assert!(table.lookup(Address(50)).is_none());
        assert!(table.lookup(Address(350)).is_none());
    }

    #[test]
    fn test_lookup_exact_tie() {
        let table = RuntimeSymbolTable::from_entries(vec![
            SymbolEntry::new("A", "first", Address(200)),
            SymbolEntry::new("B", "second", Address(200)),
            entry(100),
        ]);
        let hit = table.lookup(Address(200)).unwrap();
        assert_eq!(hit.address, Address(200));
        assert_eq!(hit.owning_type, "B");
    }

    #[test]
    fn test_empty_table_never_matches() {
        let table = RuntimeSymbolTable::default();
        assert!(table.is_empty());
        assert!(table.span().is_none());
        assert!(table.lookup(Address(0)).is_none());
    }

    #[test]
    fn test_entry_display_and_symbol_name() {
        let e = SymbolEntry::new("Parser", "parse", Address(0x1f40));
        assert_eq!(e.symbol_name(), "[Parser parse]");
        assert_eq!(e.to_string(), "class: Parser    name:parse   address:1f40");
    }

    #[test]
    fn test_entry_serializes_with_class_key() {
        let json = serde_json::to_string(&SymbolEntry::new("P", "m", Address(5))).unwrap();
        assert_eq!(json, r#"{"class":"P","name":"m","address":5}"#);
    }
}
