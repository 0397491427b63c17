//! Virtual Memory Manager
//!
//! Populates and tears down the per-process region lists. Frames come from
//! the scheduler's [`FrameAllocator`]; what a removed mapping gives back is
//! decided by its [`MappingKind`].

use super::{
    pages_for, page_align_up, FrameAllocator, MapPermissions, MappingKind, MemoryMapping,
    PhysicalAddress, VirtualAddress, PAGE_SIZE,
};
use crate::{
    arch::ContextHal,
    config::{USER_SPACE_BASE, USER_SPACE_END},
    error::{KernelError, KernelResult, MemError},
    process::ProcessId,
    sched::Scheduler,
};

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Allocate `size` bytes of anonymous memory in `pid`'s address space
    pub fn alloc_memory(
        &mut self,
        pid: ProcessId,
        size: usize,
        perms: MapPermissions,
    ) -> KernelResult<VirtualAddress> {
        self.live_process(pid)?;
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "must be non-zero",
            });
        }

        let size = page_align_up(size)?;
        let va = self.map_anonymous(pid, size, perms, MappingKind::Anonymous)?;
        log::debug!("[MM] Process {} allocated 0x{:x} bytes at {}", pid, size, va);
        self.check_invariants();
        Ok(va)
    }

    /// Remove the mapping at exactly `[addr, addr + size)`
    pub fn free_memory(
        &mut self,
        pid: ProcessId,
        addr: VirtualAddress,
        size: usize,
    ) -> KernelResult<()> {
        self.unmap(pid, addr, size)?;
        log::debug!("[MM] Process {} freed 0x{:x} bytes at {}", pid, size, addr);
        self.check_invariants();
        Ok(())
    }

    /// Install a caller-chosen mapping of `pa` at `va`
    pub fn map_memory(
        &mut self,
        pid: ProcessId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: usize,
        perms: MapPermissions,
    ) -> KernelResult<()> {
        self.live_process(pid)?;
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "must be non-zero",
            });
        }
        if !va.is_page_aligned() {
            return Err(MemError::Unaligned { addr: va.as_u64() }.into());
        }
        if pa.as_u64() % PAGE_SIZE as u64 != 0 {
            return Err(MemError::Unaligned { addr: pa.as_u64() }.into());
        }

        let size = page_align_up(size)?;
        if va.as_u64().checked_add(size as u64).is_none() {
            return Err(KernelError::InvalidArgument {
                name: "va",
                value: "range wraps the address space",
            });
        }
        let kind = match self.shm.find_containing(pa, size) {
            Some(id) => MappingKind::Shared(id),
            None => MappingKind::Device,
        };

        let process = self.process_mut(pid)?;
        process.memory.insert(MemoryMapping {
            start: va,
            phys: pa,
            size,
            perms,
            kind,
        })?;
        process.refresh_memory_stats();
        if let MappingKind::Shared(id) = kind {
            self.shm.acquire(id);
        }

        log::debug!(
            "[MM] Process {} mapped {:?} 0x{:x}+0x{:x} at {}",
            pid,
            kind,
            pa.as_u64(),
            size,
            va
        );
        self.check_invariants();
        Ok(())
    }

    /// Mapping of `pid` containing `va`
    pub fn mapping_at(&self, pid: ProcessId, va: VirtualAddress) -> Option<MemoryMapping> {
        self.processes.get(pid.0)?.memory.find(va).copied()
    }

    /// Back a fresh range with newly allocated frames
    pub(crate) fn map_anonymous(
        &mut self,
        pid: ProcessId,
        size: usize,
        perms: MapPermissions,
        kind: MappingKind,
    ) -> KernelResult<VirtualAddress> {
        let size = page_align_up(size)?;
        let phys = self.frames.alloc_frames(pages_for(size))?;
        match self.place_mapping(pid, phys, size, perms, kind) {
            Ok(va) => Ok(va),
            Err(err) => {
                self.frames.free_frames(phys, pages_for(size));
                Err(err)
            }
        }
    }

    /// Map `phys` at the first free range of `pid` that fits `size`
    pub(crate) fn place_mapping(
        &mut self,
        pid: ProcessId,
        phys: PhysicalAddress,
        size: usize,
        perms: MapPermissions,
        kind: MappingKind,
    ) -> KernelResult<VirtualAddress> {
        let process = self.process_mut(pid)?;
        let start = process
            .memory
            .find_free_range(size, USER_SPACE_BASE, USER_SPACE_END)
            .ok_or(MemError::OutOfSpace { size })?;
        let start = VirtualAddress::new(start);
        process.memory.insert(MemoryMapping {
            start,
            phys,
            size,
            perms,
            kind,
        })?;
        process.refresh_memory_stats();
        Ok(start)
    }

    /// Remove one exact mapping and release what backs it
    pub(crate) fn unmap(
        &mut self,
        pid: ProcessId,
        addr: VirtualAddress,
        size: usize,
    ) -> KernelResult<()> {
        let process = self.process_mut(pid)?;
        let mapping = process.memory.remove_exact(addr, page_align_up(size)?)?;
        process.refresh_memory_stats();
        self.release_mapping(mapping);
        Ok(())
    }

    /// Give back the frames or shared reference held by a removed mapping
    pub(crate) fn release_mapping(&mut self, mapping: MemoryMapping) {
        match mapping.kind {
            MappingKind::Anonymous | MappingKind::Stack => {
                self.frames
                    .free_frames(mapping.phys, pages_for(mapping.size));
            }
            MappingKind::Shared(id) => {
                if let Some(region) = self.shm.release(id) {
                    log::debug!("[MM] Shared region {} released its last mapping", id);
                    self.frames
                        .free_frames(region.phys, pages_for(region.size));
                }
            }
            // Not ours to free
            MappingKind::Device => {}
        }
    }

    /// Drop every mapping of `pid`
    pub(crate) fn release_address_space(&mut self, pid: ProcessId) {
        let Some(process) = self.processes.get_mut(pid.0) else {
            return;
        };
        let mappings = process.memory.drain();
        process.refresh_memory_stats();
        let count = mappings.len();
        for mapping in mappings {
            self.release_mapping(mapping);
        }
        log::debug!("[MM] Released {} mappings of process {}", count, pid);
    }
}
