//! Memory mapping utilities for process address space analysis
//!
//! Parses /proc/pid/maps to find where a binary's code is mapped. That range
//! bounds which method implementations belong in the runtime symbol table.

use anyhow::{Context, Result};
use log::info;
use std::fs;

use crate::domain::{Address, Pid};

/// Memory range of a loaded binary in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        addr.0 >= self.start && addr.0 < self.end
    }
}

/// One line of /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub range: MemoryRange,
    pub executable: bool,
    pub path: Option<String>,
}

/// Parse a single maps line: "start-end perms offset dev inode pathname"
fn parse_map_line(line: &str) -> Result<MapEntry> {
    let mut parts = line.split_whitespace();
    let range = parts.next().context("Missing address range")?;
    let perms = parts.next().context("Missing permissions")?;
    // offset, dev, inode
    let path = parts.nth(3).map(str::to_string);

    let (start, end) = range.split_once('-').context("Malformed address range")?;
    let start = u64::from_str_radix(start, 16).context("Failed to parse range start")?;
    let end = u64::from_str_radix(end, 16).context("Failed to parse range end")?;

    Ok(MapEntry {
        range: MemoryRange { start, end },
        executable: perms.contains('x'),
        path,
    })
}

/// Read every mapping of `pid`, skipping lines that do not parse
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read
pub fn read_memory_maps(pid: Pid) -> Result<Vec<MapEntry>> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;
    Ok(maps.lines().filter_map(|line| parse_map_line(line).ok()).collect())
}

/// Span of the executable mappings of `binary_path`
///
/// Data and read-only segments are skipped; method implementations only
/// live in code.
fn code_range(maps: &[MapEntry], binary_path: &str) -> Option<MemoryRange> {
    maps.iter()
        .filter(|m| m.executable && m.path.as_deref() == Some(binary_path))
        .map(|m| m.range)
        .reduce(|a, b| MemoryRange { start: a.start.min(b.start), end: a.end.max(b.end) })
}

/// Find the code range of a specific binary
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or if the binary has no
/// executable mapping
pub fn parse_memory_maps(pid: Pid, binary_path: &str) -> Result<MemoryRange> {
    let range = code_range(&read_memory_maps(pid)?, binary_path)
        .with_context(|| format!("Could not find memory range for {binary_path}"))?;

    info!(
        "Executable memory range: 0x{:x} - 0x{:x} (size: {} KB)",
        range.start,
        range.end,
        (range.end - range.start) / 1024
    );
    Ok(range)
}
