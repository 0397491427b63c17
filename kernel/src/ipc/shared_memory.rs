//! Shared memory IPC implementation
//!
//! A shared region is one run of physical frames mapped into any number of
//! address spaces. The registry counts the mappings that reference each
//! region; the frames go back to the allocator when the last one is removed.

use alloc::collections::BTreeMap;

use crate::{
    arch::ContextHal,
    error::{IpcError, KernelError, KernelResult},
    mm::{page_align_up, pages_for, FrameAllocator, MapPermissions, MappingKind, PhysicalAddress,
        VirtualAddress},
    process::ProcessId,
    sched::Scheduler,
};

/// Shared memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRegion {
    /// Unique region ID
    pub id: u64,
    /// Physical base
    pub phys: PhysicalAddress,
    /// Size in bytes, page aligned
    pub size: usize,
    /// Process that created it
    pub owner: ProcessId,
    /// Mappings referencing the region
    refcount: usize,
}

impl SharedRegion {
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Whether `[pa, pa + size)` lies inside the region
    pub fn covers(&self, pa: PhysicalAddress, size: usize) -> bool {
        let start = self.phys.as_u64();
        let Some(end) = start.checked_add(self.size as u64) else {
            return false;
        };
        pa.as_u64() >= start
            && pa
                .as_u64()
                .checked_add(size as u64)
                .is_some_and(|req_end| req_end <= end)
    }
}

/// Registered shared regions keyed by id
#[derive(Debug, Default)]
pub struct SharedMemoryRegistry {
    regions: BTreeMap<u64, SharedRegion>,
    next_id: u64,
}

impl SharedMemoryRegistry {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Record a region with no mappings yet
    pub fn register(&mut self, phys: PhysicalAddress, size: usize, owner: ProcessId) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.regions.insert(
            id,
            SharedRegion {
                id,
                phys,
                size,
                owner,
                refcount: 0,
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<&SharedRegion> {
        self.regions.get(&id)
    }

    /// Region containing the physical range, if any
    pub fn find_containing(&self, pa: PhysicalAddress, size: usize) -> Option<u64> {
        self.regions
            .values()
            .find(|region| region.covers(pa, size))
            .map(|region| region.id)
    }

    /// Count one more mapping. Returns false for an unknown id.
    pub fn acquire(&mut self, id: u64) -> bool {
        match self.regions.get_mut(&id) {
            Some(region) => {
                region.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one mapping. Returns the region once its last mapping is gone.
    pub fn release(&mut self, id: u64) -> Option<SharedRegion> {
        let region = self.regions.get_mut(&id)?;
        region.refcount = region.refcount.saturating_sub(1);
        if region.refcount == 0 {
            self.regions.remove(&id)
        } else {
            None
        }
    }

    /// Total bytes held by registered regions
    pub fn total_bytes(&self) -> u64 {
        self.regions.values().map(|r| r.size as u64).sum()
    }
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Create a shared region and map it into `pid`.
    ///
    /// Returns the region id, used by other processes to attach, and the
    /// address it was mapped at.
    pub fn shm_create(
        &mut self,
        pid: ProcessId,
        size: usize,
        perms: MapPermissions,
    ) -> KernelResult<(u64, VirtualAddress)> {
        self.live_process(pid)?;
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "must be non-zero",
            });
        }

        let size = page_align_up(size)?;
        let phys = self.frames.alloc_frames(pages_for(size))?;
        let id = self.shm.register(phys, size, pid);
        let va = match self.place_mapping(pid, phys, size, perms, MappingKind::Shared(id)) {
            Ok(va) => va,
            Err(err) => {
                self.shm.release(id);
                self.frames.free_frames(phys, pages_for(size));
                return Err(err);
            }
        };
        self.shm.acquire(id);

        log::info!(
            "[IPC] Process {} created shared region {} (0x{:x} bytes) at {}",
            pid,
            id,
            size,
            va
        );
        self.check_invariants();
        Ok((id, va))
    }

    /// Map an existing shared region into `pid`
    pub fn shm_attach(
        &mut self,
        pid: ProcessId,
        id: u64,
        perms: MapPermissions,
    ) -> KernelResult<VirtualAddress> {
        self.live_process(pid)?;
        let region = *self
            .shm
            .get(id)
            .ok_or(IpcError::RegionNotFound { id })?;

        let va = self.place_mapping(pid, region.phys, region.size, perms, MappingKind::Shared(id))?;
        self.shm.acquire(id);

        log::debug!("[IPC] Process {} attached shared region {} at {}", pid, id, va);
        self.check_invariants();
        Ok(va)
    }

    /// Mappings currently referencing region `id`
    pub fn shm_refcount(&self, id: u64) -> Option<usize> {
        self.shm.get(id).map(SharedRegion::refcount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_release_returns_region() {
        let mut registry = SharedMemoryRegistry::new();
        let id = registry.register(PhysicalAddress::new(0x10_0000), 0x2000, ProcessId(1));
        assert!(registry.acquire(id));
        assert!(registry.acquire(id));

        assert_eq!(registry.release(id), None);
        let region = registry.release(id).unwrap();
        assert_eq!(region.phys, PhysicalAddress::new(0x10_0000));
        assert!(registry.is_empty());
        assert!(!registry.acquire(id));
    }

    #[test]
    fn test_find_containing() {
        let mut registry = SharedMemoryRegistry::new();
        let id = registry.register(PhysicalAddress::new(0x10_0000), 0x2000, ProcessId(1));

        assert_eq!(
            registry.find_containing(PhysicalAddress::new(0x10_1000), 0x1000),
            Some(id)
        );
        assert_eq!(
            registry.find_containing(PhysicalAddress::new(0x10_1000), 0x2000),
            None
        );
        // A request that wraps the physical space matches nothing
        assert_eq!(
            registry.find_containing(PhysicalAddress::new(0x10_1000), usize::MAX),
            None
        );
    }
}
