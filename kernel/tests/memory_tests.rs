//! Memory Management Tests
//!
//! Per-process mappings, frame accounting and shared regions.

mod common;

use common::{scheduler, with_init, ENTRY};
use tbos_kernel::{
    mm::{FrameAllocator, MappingKind},
    KernelError, MapPermissions, MemError, PhysicalAddress, SchedConfig, VirtualAddress,
};

const DEVICE_BASE: u64 = 0xFEE0_0000;

// ===== Mapping Tests =====

#[test]
fn test_alloc_and_free_return_frames() {
    let mut sched = scheduler();
    let pid = sched.create("app", ENTRY, 0, 10).unwrap();
    let free = sched.frames().free_count();

    let va = sched
        .alloc_memory(pid, 3 * 4096, MapPermissions::READ_WRITE)
        .unwrap();
    assert!(va.is_page_aligned());
    assert_eq!(sched.frames().free_count(), free - 3);
    let mapping = sched.mapping_at(pid, va.add(4096)).unwrap();
    assert_eq!(mapping.kind, MappingKind::Anonymous);
    assert_eq!(mapping.size, 3 * 4096);

    sched.free_memory(pid, va, 3 * 4096).unwrap();
    assert_eq!(sched.frames().free_count(), free);
    assert!(sched.mapping_at(pid, va).is_none());
}

#[test]
fn test_free_requires_exact_region() {
    let mut sched = scheduler();
    let pid = sched.create("app", ENTRY, 0, 10).unwrap();
    let va = sched
        .alloc_memory(pid, 2 * 4096, MapPermissions::READ)
        .unwrap();

    assert!(sched.free_memory(pid, va, 4096).is_err());
    assert!(sched.free_memory(pid, va.add(4096), 4096).is_err());
    assert!(sched.free_memory(pid, va, 2 * 4096).is_ok());
}

#[test]
fn test_overlapping_map_rejected() {
    let mut sched = scheduler();
    let pid = sched.create("driver", ENTRY, 0, 10).unwrap();
    let va = VirtualAddress::new(0x7000_0000);

    sched
        .map_memory(
            pid,
            va,
            PhysicalAddress::new(DEVICE_BASE),
            0x2000,
            MapPermissions::READ_WRITE,
        )
        .unwrap();
    assert_eq!(sched.mapping_at(pid, va).unwrap().kind, MappingKind::Device);

    assert!(matches!(
        sched.map_memory(
            pid,
            va.add(0x1000),
            PhysicalAddress::new(DEVICE_BASE + 0x4000),
            0x1000,
            MapPermissions::READ,
        ),
        Err(KernelError::MemoryError(MemError::Overlap { .. }))
    ));
    assert_eq!(sched.process(pid).unwrap().memory_map().len(), 2);
}

#[test]
fn test_unaligned_map_rejected() {
    let mut sched = scheduler();
    let pid = sched.create("driver", ENTRY, 0, 10).unwrap();

    assert!(matches!(
        sched.map_memory(
            pid,
            VirtualAddress::new(0x7000_0010),
            PhysicalAddress::new(DEVICE_BASE),
            0x1000,
            MapPermissions::READ,
        ),
        Err(KernelError::MemoryError(MemError::Unaligned { .. }))
    ));
}

// ===== Size Limit Tests =====

#[test]
fn test_unalignable_sizes_fail_cleanly() {
    let (mut sched, init) = with_init(SchedConfig::default());
    let free = sched.frames().free_count();
    let out_of_space = KernelError::MemoryError(MemError::OutOfSpace { size: usize::MAX });

    assert_eq!(
        sched.alloc_memory(init, usize::MAX, MapPermissions::READ),
        Err(out_of_space)
    );
    assert_eq!(
        sched.thread_create(init, ENTRY, 0, usize::MAX),
        Err(out_of_space)
    );
    assert!(sched
        .shm_create(init, usize::MAX, MapPermissions::READ)
        .is_err());

    assert_eq!(sched.frames().free_count(), free);
    assert_eq!(sched.process(init).unwrap().threads.len(), 1);
    sched.assert_consistent();
}

#[test]
fn test_map_at_top_of_address_space_rejected() {
    let (mut sched, init) = with_init(SchedConfig::default());
    let regions = sched.process(init).unwrap().memory_map().len();

    let result = sched.map_memory(
        init,
        VirtualAddress::new(0xFFFF_FFFF_FFFF_F000),
        PhysicalAddress::new(0x1000),
        0x2000,
        MapPermissions::READ,
    );
    assert!(matches!(
        result,
        Err(KernelError::InvalidArgument { .. })
            | Err(KernelError::MemoryError(MemError::Overlap { .. }))
    ));
    assert_eq!(sched.process(init).unwrap().memory_map().len(), regions);
}

// ===== Shared Memory Tests =====

#[test]
fn test_shared_frames_outlive_first_unmap() {
    let mut sched = scheduler();
    let a = sched.create("producer", ENTRY, 0, 10).unwrap();
    let b = sched.create("consumer", ENTRY, 0, 10).unwrap();
    let before = sched.frames().free_count();

    let (id, va_a) = sched
        .shm_create(a, 0x2000, MapPermissions::READ_WRITE)
        .unwrap();
    let va_b = sched.shm_attach(b, id, MapPermissions::READ).unwrap();
    assert_eq!(sched.shm_refcount(id), Some(2));
    assert_eq!(sched.frames().free_count(), before - 2);
    assert_eq!(
        sched.mapping_at(a, va_a).unwrap().phys,
        sched.mapping_at(b, va_b).unwrap().phys
    );

    sched.free_memory(a, va_a, 0x2000).unwrap();
    assert_eq!(sched.shm_refcount(id), Some(1));
    assert_eq!(sched.frames().free_count(), before - 2);

    sched.free_memory(b, va_b, 0x2000).unwrap();
    assert_eq!(sched.shm_refcount(id), None);
    assert_eq!(sched.frames().free_count(), before);
}

#[test]
fn test_shared_region_released_on_exit() {
    let mut sched = scheduler();
    let a = sched.create("producer", ENTRY, 0, 10).unwrap();
    let b = sched.create("consumer", ENTRY, 0, 10).unwrap();
    let (id, _) = sched
        .shm_create(a, 0x1000, MapPermissions::READ_WRITE)
        .unwrap();
    sched.shm_attach(b, id, MapPermissions::READ).unwrap();

    sched.terminate(a, 0).unwrap();
    assert_eq!(sched.shm_refcount(id), Some(1));
    sched.terminate(b, 0).unwrap();
    assert_eq!(sched.shm_refcount(id), None);
}

#[test]
fn test_attach_unknown_region() {
    let mut sched = scheduler();
    let pid = sched.create("consumer", ENTRY, 0, 10).unwrap();
    assert!(sched.shm_attach(pid, 42, MapPermissions::READ).is_err());
}

// ===== Teardown Tests =====

#[test]
fn test_teardown_returns_every_frame() {
    let mut sched = scheduler();
    let a = sched.create("a", ENTRY, 0, 10).unwrap();
    let b = sched.create("b", ENTRY, 0, 10).unwrap();
    sched.thread_create(a, ENTRY, 0, 0).unwrap();
    sched.alloc_memory(b, 0x5000, MapPermissions::READ).unwrap();
    let (id, _) = sched.shm_create(a, 0x3000, MapPermissions::READ).unwrap();
    sched.shm_attach(b, id, MapPermissions::READ).unwrap();
    sched.schedule();

    let (_, frames) = sched.teardown();
    assert_eq!(frames.free_count(), frames.total_count());
}
