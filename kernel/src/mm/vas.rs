//! Per-process virtual address space bookkeeping
//!
//! A [`MemoryMap`] is the ordered list of regions a process owns. It enforces
//! non-overlap and picks free ranges; it does not touch frames or page
//! tables. Frame ownership is described by each region's [`MappingKind`].

use alloc::{collections::BTreeMap, vec::Vec};

use super::{MapPermissions, PhysicalAddress, VirtualAddress};
use crate::error::MemError;

/// What backs a mapping, and what removing it releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Frames allocated by `alloc_memory`, freed on removal
    Anonymous,
    /// Thread stack, freed on removal
    Stack,
    /// Caller-supplied physical range, never freed here
    Device,
    /// Part of a shared region; removal drops one reference
    Shared(u64),
}

/// One contiguous virtual region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapping {
    /// Start address
    pub start: VirtualAddress,
    /// Physical base backing `start`
    pub phys: PhysicalAddress,
    /// Size in bytes
    pub size: usize,
    pub perms: MapPermissions,
    pub kind: MappingKind,
}

impl MemoryMapping {
    /// Get end address (exclusive)
    ///
    /// A mapping accepted by [`MemoryMap::insert`] never wraps, so the
    /// saturation only matters for hand-built values.
    pub fn end(&self) -> u64 {
        self.start.as_u64().saturating_add(self.size as u64)
    }

    /// Check if address is within this mapping
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end()
    }

    /// Whether the mapping owns physical memory counted as resident
    pub fn is_resident(&self) -> bool {
        !matches!(self.kind, MappingKind::Device)
    }
}

/// Exclusive end of `[start, start + size)`, `None` if it wraps
fn range_end(start: u64, size: usize) -> Option<u64> {
    start.checked_add(u64::try_from(size).ok()?)
}

/// Ordered, non-overlapping region list of one process
#[derive(Debug, Default)]
pub struct MemoryMap {
    /// Mappings keyed by start address
    mappings: BTreeMap<u64, MemoryMapping>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mappings in address order
    pub fn iter(&self) -> impl Iterator<Item = &MemoryMapping> {
        self.mappings.values()
    }

    /// Whether `[start, start + size)` intersects an existing mapping.
    ///
    /// A range running past the top of the address space always overlaps.
    pub fn overlaps(&self, start: u64, size: usize) -> bool {
        let Some(end) = range_end(start, size) else {
            return true;
        };
        self.mappings
            .range(..end)
            .next_back()
            .is_some_and(|(_, m)| m.end() > start)
    }

    /// Insert a mapping, rejecting any intersection
    pub fn insert(&mut self, mapping: MemoryMapping) -> Result<(), MemError> {
        if self.overlaps(mapping.start.as_u64(), mapping.size) {
            return Err(MemError::Overlap {
                addr: mapping.start.as_u64(),
                size: mapping.size,
            });
        }
        self.mappings.insert(mapping.start.as_u64(), mapping);
        Ok(())
    }

    /// Remove the mapping covering exactly `[start, start + size)`
    pub fn remove_exact(
        &mut self,
        start: VirtualAddress,
        size: usize,
    ) -> Result<MemoryMapping, MemError> {
        let key = start.as_u64();
        if self.mappings.get(&key).map(|m| m.size) != Some(size) {
            return Err(MemError::RegionMismatch { addr: key, size });
        }
        self.mappings
            .remove(&key)
            .ok_or(MemError::RegionMismatch { addr: key, size })
    }

    /// Find the mapping containing `addr`
    pub fn find(&self, addr: VirtualAddress) -> Option<&MemoryMapping> {
        self.mappings
            .range(..=addr.as_u64())
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(addr))
    }

    /// First-fit search for `size` free bytes inside `[base, end)`
    pub fn find_free_range(&self, size: usize, base: u64, end: u64) -> Option<u64> {
        let mut cursor = base;
        for m in self.mappings.values() {
            if m.end() <= cursor {
                continue;
            }
            if m.start.as_u64() >= range_end(cursor, size)? {
                break;
            }
            cursor = m.end();
        }
        (range_end(cursor, size)? <= end).then_some(cursor)
    }

    /// Remove and return every mapping
    pub fn drain(&mut self) -> Vec<MemoryMapping> {
        core::mem::take(&mut self.mappings).into_values().collect()
    }

    /// Sum of all mapping sizes
    pub fn virtual_size(&self) -> u64 {
        self.mappings.values().map(|m| m.size as u64).sum()
    }

    /// Sum of mappings backed by frames
    pub fn resident_size(&self) -> u64 {
        self.mappings
            .values()
            .filter(|m| m.is_resident())
            .map(|m| m.size as u64)
            .sum()
    }

    /// Sum of shared-region mappings
    pub fn shared_size(&self) -> u64 {
        self.mappings
            .values()
            .filter(|m| matches!(m.kind, MappingKind::Shared(_)))
            .map(|m| m.size as u64)
            .sum()
    }
}
