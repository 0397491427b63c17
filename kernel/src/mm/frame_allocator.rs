//! Physical frame allocator interface
//!
//! The scheduling core never touches physical memory directly. Backing frames
//! for anonymous regions, thread stacks, shared regions and page table roots
//! are obtained through [`FrameAllocator`]. [`RangeFrameAllocator`] is a
//! first-fit allocator over one contiguous physical window, used on hosted
//! builds and by the tests.

use alloc::collections::BTreeMap;

use super::{PhysicalAddress, PAGE_SIZE};
use crate::error::{KernelError, KernelResult, MemError};

/// Size of a physical frame (4KB)
pub const FRAME_SIZE: usize = PAGE_SIZE;

/// Page-granularity physical memory provider
pub trait FrameAllocator {
    /// Allocate `count` physically contiguous frames and return the base
    fn alloc_frames(&mut self, count: usize) -> KernelResult<PhysicalAddress>;

    /// Return frames previously handed out by [`FrameAllocator::alloc_frames`]
    fn free_frames(&mut self, base: PhysicalAddress, count: usize);

    /// Number of frames currently available
    fn free_count(&self) -> usize;

    /// Number of frames managed in total
    fn total_count(&self) -> usize;
}

/// First-fit allocator over a fixed physical window.
///
/// Free space is kept as a map from first frame number to run length, with
/// adjacent runs merged on free.
#[derive(Debug)]
pub struct RangeFrameAllocator {
    base_frame: u64,
    total: usize,
    /// Free runs: first frame -> frame count
    free_runs: BTreeMap<u64, usize>,
    free: usize,
}

impl RangeFrameAllocator {
    /// Default window start (16MB)
    pub const DEFAULT_BASE: u64 = 0x0100_0000;

    /// Default window length in frames (64MB)
    pub const DEFAULT_FRAMES: usize = 16 * 1024;

    /// Manage `frame_count` frames starting at `base` (rounded up to a frame)
    pub fn new(base: PhysicalAddress, frame_count: usize) -> Self {
        let base_frame = base.as_u64().div_ceil(FRAME_SIZE as u64);
        let mut free_runs = BTreeMap::new();
        if frame_count > 0 {
            free_runs.insert(base_frame, frame_count);
        }
        Self {
            base_frame,
            total: frame_count,
            free_runs,
            free: frame_count,
        }
    }

    /// Frames currently handed out
    pub fn used_count(&self) -> usize {
        self.total - self.free
    }

    /// Whether `[frame, frame + count)` lies inside the managed window
    fn in_window(&self, frame: u64, count: usize) -> bool {
        frame >= self.base_frame && frame + count as u64 <= self.base_frame + self.total as u64
    }

    /// Whether any frame of `[frame, frame + count)` is already free
    fn overlaps_free(&self, frame: u64, count: usize) -> bool {
        let end = frame + count as u64;
        self.free_runs
            .range(..end)
            .next_back()
            .is_some_and(|(&start, &len)| start + len as u64 > frame)
    }
}

impl Default for RangeFrameAllocator {
    fn default() -> Self {
        Self::new(
            PhysicalAddress::new(Self::DEFAULT_BASE),
            Self::DEFAULT_FRAMES,
        )
    }
}

impl FrameAllocator for RangeFrameAllocator {
    fn alloc_frames(&mut self, count: usize) -> KernelResult<PhysicalAddress> {
        if count == 0 {
            return Err(KernelError::InvalidArgument {
                name: "count",
                value: "must allocate at least one frame",
            });
        }

        let (start, len) = self
            .free_runs
            .iter()
            .find(|(_, &len)| len >= count)
            .map(|(&start, &len)| (start, len))
            .ok_or(MemError::OutOfMemory { frames: count })?;

        self.free_runs.remove(&start);
        if len > count {
            self.free_runs.insert(start + count as u64, len - count);
        }
        self.free -= count;

        log::trace!("[MM] Allocated {} frames at frame {}", count, start);
        Ok(PhysicalAddress::new(start * FRAME_SIZE as u64))
    }

    fn free_frames(&mut self, base: PhysicalAddress, count: usize) {
        if count == 0 {
            return;
        }
        let frame = base.as_u64() / FRAME_SIZE as u64;
        if !self.in_window(frame, count) || self.overlaps_free(frame, count) {
            log::warn!(
                "[MM] Ignoring bad free of {} frames at 0x{:x}",
                count,
                base.as_u64()
            );
            return;
        }

        let mut start = frame;
        let mut len = count;

        // Merge with the run ending right before us
        if let Some((&prev, &prev_len)) = self.free_runs.range(..frame).next_back() {
            if prev + prev_len as u64 == frame {
                self.free_runs.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        // Merge with the run starting right after us
        let next = frame + count as u64;
        if let Some(next_len) = self.free_runs.remove(&next) {
            len += next_len;
        }

        self.free_runs.insert(start, len);
        self.free += count;
        log::trace!("[MM] Freed {} frames at frame {}", count, frame);
    }

    fn free_count(&self) -> usize {
        self.free
    }

    fn total_count(&self) -> usize {
        self.total
    }
}
