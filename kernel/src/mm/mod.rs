//! Memory management module
//!
//! Virtual memory bookkeeping only: per-process region lists and the
//! operations that populate them. Physical frames come from an external
//! [`FrameAllocator`]; page tables are never walked here.

pub mod frame_allocator;
pub mod vas;
pub mod vmm;

pub use frame_allocator::{FrameAllocator, RangeFrameAllocator};
pub use vas::{MappingKind, MemoryMap, MemoryMapping};

use crate::error::{KernelError, KernelResult, MemError};

/// Size of a page and of a physical frame (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    pub fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }
}

impl core::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

bitflags::bitflags! {
    /// Access permissions of a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapPermissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

/// Round `size` up to a whole number of pages.
///
/// Sizes within a page of `usize::MAX` have no page-aligned size and fail
/// with `OutOfSpace`.
pub fn page_align_up(size: usize) -> KernelResult<usize> {
    size.checked_next_multiple_of(PAGE_SIZE)
        .ok_or(KernelError::MemoryError(MemError::OutOfSpace { size }))
}

/// Number of pages covering `size` bytes
pub fn pages_for(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}
