use hle_kernel::{
    AddressSpaceLayout, KernelConfig, KernelCore, KernelError, KernelObject, MemoryPermission,
    MemoryState, PageList, Process, SharedMemory, VirtualAddress,
};
use std::sync::Arc;

const RW: MemoryPermission = MemoryPermission::READ_WRITE;
const R: MemoryPermission = MemoryPermission::READ;

fn kernel() -> Arc<KernelCore> {
    let _ = kernel_log::init(log::LevelFilter::Debug);
    KernelCore::new(
        KernelConfig::default()
            .with_device_memory_size(0x40_0000)
            .with_address_space(AddressSpaceLayout::new(0x1000, 0x1000_0000)),
    )
    .unwrap()
}

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn font(kernel: &Arc<KernelCore>, owner: &Arc<Process>) -> Arc<SharedMemory> {
    kernel
        .create_shared_memory(owner, 0x2000, RW, R, "font")
        .unwrap()
}

fn snapshot(process: &Process) -> Vec<hle_kernel::MemoryInfo> {
    process.page_table().mappings().collect()
}

#[test]
fn owner_and_user_map_with_their_own_permission() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");
    let shm = font(&kernel, &a);

    // Owner maps read-write.
    shm.map(&a, va(0x1000), 0x2000, RW).unwrap();
    let info = a.page_table().query(va(0x1000)).unwrap();
    assert_eq!((info.base, info.size), (va(0x1000), 0x2000));
    assert_eq!(info.state, MemoryState::Shared);
    assert_eq!(info.permission, RW);

    // Another process asking for the owner permission is refused.
    assert_eq!(
        shm.map(&b, va(0x5000), 0x2000, RW),
        Err(KernelError::PermissionMismatch {
            expected: R,
            requested: RW
        })
    );
    assert_eq!(b.page_table().mapping_count(), 0);

    shm.map(&b, va(0x5000), 0x2000, R).unwrap();
    assert_eq!(b.page_table().query(va(0x6FFF)).unwrap().permission, R);

    // Partial unmap is refused and leaves the mapping alone.
    assert_eq!(
        shm.unmap(&a, va(0x1000), 0x1000),
        Err(KernelError::InvalidSize(0x1000))
    );
    assert_eq!(a.page_table().query(va(0x1000)).unwrap().state, MemoryState::Shared);

    shm.unmap(&a, va(0x1000), 0x2000).unwrap();
    let freed = a.page_table().query(va(0x1000)).unwrap();
    assert_eq!(freed.state, MemoryState::Free);
    assert!(freed.contains(va(0x2FFF)));

    // B is unaffected.
    assert_eq!(b.page_table().query(va(0x5000)).unwrap().state, MemoryState::Shared);
}

#[test]
fn page_count_mismatch_maps_nothing() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let shm = font(&kernel, &a);

    for size in [0x1000, 0x3000, 0] {
        let err = shm.map(&a, va(0x1000), size, RW).unwrap_err();
        assert!(matches!(err, KernelError::SizeMismatch { expected_pages: 2, .. }));
    }
    // A size that rounds up to the region's page count is accepted.
    shm.map(&a, va(0x1000), 0x1800, RW).unwrap();
    assert_eq!(a.page_table().mapping_count(), 1);
}

#[test]
fn map_then_unmap_restores_free_boundaries() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let shm = font(&kernel, &a);
    let other = kernel
        .create_shared_memory(&a, 0x1000, RW, R, "other")
        .unwrap();

    other.map(&a, va(0x1000), 0x1000, RW).unwrap();
    other.map(&a, va(0x9000), 0x1000, RW).unwrap();
    let before = a.page_table().query(va(0x4000)).unwrap();
    assert_eq!((before.base, before.size), (va(0x2000), 0x7000));

    shm.map(&a, va(0x4000), 0x2000, RW).unwrap();
    shm.unmap(&a, va(0x4000), 0x2000).unwrap();

    assert_eq!(a.page_table().query(va(0x4000)).unwrap(), before);
    assert_eq!(a.page_table().mapping_count(), 2);
}

#[test]
fn unmap_leaves_adjacent_mappings_untouched() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let left = kernel.create_shared_memory(&a, 0x1000, RW, R, "left").unwrap();
    let mid = font(&kernel, &a);
    let right = kernel.create_shared_memory(&a, 0x1000, RW, R, "right").unwrap();

    left.map(&a, va(0x1000), 0x1000, RW).unwrap();
    mid.map(&a, va(0x2000), 0x2000, RW).unwrap();
    right.map(&a, va(0x4000), 0x1000, RW).unwrap();

    mid.unmap(&a, va(0x2000), 0x2000).unwrap();

    let table = snapshot(&a);
    assert_eq!(table.len(), 2);
    assert_eq!((table[0].base, table[0].size), (va(0x1000), 0x1000));
    assert_eq!((table[1].base, table[1].size), (va(0x4000), 0x1000));
}

#[test]
fn overlapping_map_is_rejected_without_changes() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let first = font(&kernel, &a);
    let second = font(&kernel, &a);

    first.map(&a, va(0x2000), 0x2000, RW).unwrap();
    let before = snapshot(&a);

    let err = second.map(&a, va(0x3000), 0x2000, RW).unwrap_err();
    assert_eq!(
        err,
        KernelError::OverlappingMapping {
            address: va(0x3000),
            size: 0x2000
        }
    );
    assert_eq!(snapshot(&a), before);
}

#[test]
fn unmap_of_unmapped_address_is_reported() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let shm = font(&kernel, &a);
    assert_eq!(
        shm.unmap(&a, va(0x8000), 0x2000),
        Err(KernelError::UnmappedRegion(va(0x8000)))
    );
}

#[test]
fn mapped_views_share_backing_pages() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");
    let shm = font(&kernel, &a);
    shm.map(&a, va(0x1000), 0x2000, RW).unwrap();
    shm.map(&b, va(0x7000), 0x2000, R).unwrap();

    // Straddles the page boundary.
    a.write_memory(va(0x1FFC), b"abcdefgh").unwrap();

    let mut buf = [0u8; 8];
    b.read_memory(va(0x7FFC), &mut buf).unwrap();
    assert_eq!(&buf, b"abcdefgh");
    shm.read(0xFFC, &mut buf).unwrap();
    assert_eq!(&buf, b"abcdefgh");

    // B only has read access.
    assert_eq!(
        b.write_memory(va(0x7000), b"x"),
        Err(KernelError::InvalidMemoryPermissions(MemoryPermission::WRITE))
    );
    assert_eq!(
        b.read_memory(va(0x9000), &mut buf),
        Err(KernelError::UnmappedRegion(va(0x9000)))
    );
}

#[test]
fn shared_memory_over_fragmented_pages() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");

    // Leave a one-page hole at the bottom of device memory.
    let hole = kernel.create_shared_memory(&a, 0x1000, RW, R, "hole").unwrap();
    let keep = kernel.create_shared_memory(&a, 0x1000, RW, R, "keep").unwrap();
    drop(hole);

    let shm = kernel
        .create_shared_memory(&a, 0x3000, RW, R, "fragmented")
        .unwrap();
    assert_eq!(shm.page_list().blocks().len(), 2);
    assert_eq!(shm.physical_address(), shm.page_list().first_address().unwrap());
    assert_ne!(
        shm.page_list().blocks()[1].address(),
        keep.physical_address()
    );

    let data: Vec<u8> = (0..0x3000u32).map(|i| (i % 251) as u8).collect();
    shm.write(0, &data).unwrap();

    shm.map(&b, va(0x10_0000), 0x3000, R).unwrap();
    let mut back = vec![0u8; data.len()];
    b.read_memory(va(0x10_0000), &mut back).unwrap();
    assert_eq!(back, data);

    assert!(matches!(
        shm.write(0x2FFF, b"xy"),
        Err(KernelError::OutOfBounds { .. })
    ));
}

#[test]
fn create_over_an_existing_mapping() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");
    let heap = kernel.create_shared_memory(&a, 0x4000, RW, RW, "heap").unwrap();
    heap.map(&a, va(0x20_0000), 0x4000, RW).unwrap();
    a.write_memory(va(0x20_1000), b"transfer").unwrap();

    // Share the middle two pages of the mapped heap.
    let pages = a.page_table().make_page_list(va(0x20_1000), 2).unwrap();
    let first = pages.first_address().unwrap();
    let transfer =
        SharedMemory::create(&kernel, &a, pages, RW, R, first, 0x2000, "transfer").unwrap();

    transfer.map(&b, va(0x1000), 0x2000, R).unwrap();
    let mut buf = [0u8; 8];
    b.read_memory(va(0x1000), &mut buf).unwrap();
    assert_eq!(&buf, b"transfer");

    // Pages borrowed from the heap stay allocated after the view goes away.
    let free_before = kernel.page_allocator().free_pages();
    transfer.unmap(&b, va(0x1000), 0x2000).unwrap();
    drop(transfer);
    assert_eq!(kernel.page_allocator().free_pages(), free_before);
}

#[test]
fn create_validates_size_against_page_list() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let pages = kernel.page_allocator().allocate(2).unwrap();
    let first = pages.first_address().unwrap();

    assert_eq!(
        SharedMemory::create(&kernel, &a, pages.clone(), RW, R, first, 0x3000, "x").unwrap_err(),
        KernelError::SizeMismatch {
            expected_pages: 3,
            requested_pages: 2
        }
    );
    assert_eq!(
        SharedMemory::create(&kernel, &a, pages.clone(), RW, R, first, 0x1800, "x").unwrap_err(),
        KernelError::InvalidSize(0x1800)
    );
    assert_eq!(
        SharedMemory::create(&kernel, &a, PageList::new(), RW, R, first, 0, "x").unwrap_err(),
        KernelError::InvalidSize(0)
    );
    assert!(matches!(
        SharedMemory::create(&kernel, &a, pages.clone(), RW, R, first + 0x1000, 0x2000, "x"),
        Err(KernelError::InvariantViolation(_))
    ));

    kernel.page_allocator().free(&pages).unwrap();
}

#[test]
fn owner_branch_is_unreachable_after_owner_is_destroyed() {
    let kernel = kernel();
    let owner = kernel.create_process("owner");
    let other = kernel.create_process("other");
    let shm = font(&kernel, &owner);
    let owner_pid = owner.process_id();

    assert!(shm.is_owned_by(&owner));
    assert!(!shm.is_owned_by(&other));
    assert_eq!(shm.expected_permission(&owner), RW);

    drop(owner);
    assert!(shm.owner().is_none());
    assert_eq!(shm.owner_process_id(), owner_pid);

    // Every process is a user now, including ones created later.
    let late = kernel.create_process("late");
    for process in [&other, &late] {
        assert_eq!(shm.expected_permission(process), R);
        assert!(matches!(
            shm.map(process, va(0x1000), 0x2000, RW),
            Err(KernelError::PermissionMismatch { expected, .. }) if expected == R
        ));
        shm.map(process, va(0x1000), 0x2000, R).unwrap();
    }
}

#[test]
fn objects_are_destroyed_exactly_once() {
    let kernel = kernel();
    assert_eq!(kernel.live_objects(), 0);
    let total = kernel.page_allocator().total_pages();

    let a = kernel.create_process("a");
    let b = kernel.create_process("b");
    let shm = font(&kernel, &a);
    assert_eq!(kernel.live_objects(), 3);
    assert_eq!(kernel.page_allocator().free_pages(), total - 2);

    // Handles held by several threads.
    let handles: Vec<_> = (0..8).map(|_| Arc::clone(&shm)).collect();
    let threads: Vec<_> = handles
        .into_iter()
        .map(|h| std::thread::spawn(move || h.size()))
        .collect();
    for t in threads {
        assert_eq!(t.join().unwrap(), 0x2000);
    }

    // B's mapping holds the last reference.
    let watch = Arc::downgrade(&shm);
    shm.map(&b, va(0x1000), 0x2000, R).unwrap();
    drop(shm);
    assert_eq!(kernel.live_objects(), 3);
    assert_eq!(kernel.page_allocator().free_pages(), total - 2);

    let shm = watch.upgrade().unwrap();
    shm.unmap(&b, va(0x1000), 0x2000).unwrap();
    drop(shm);
    assert!(watch.upgrade().is_none());
    assert_eq!(kernel.live_objects(), 2);
    assert_eq!(kernel.page_allocator().free_pages(), total);

    drop(a);
    drop(b);
    assert_eq!(kernel.live_objects(), 0);
}

#[test]
fn released_object_stays_alive_while_mapped() {
    let kernel = kernel();
    let total = kernel.page_allocator().total_pages();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");

    let first = kernel.create_shared_memory(&a, 0x1000, RW, R, "first").unwrap();
    first.write(0, b"first").unwrap();
    let first_pa = first.physical_address();
    let watch = Arc::downgrade(&first);
    first.map(&b, va(0x1000), 0x1000, R).unwrap();
    drop(first);

    // The pages are still allocated, so new objects get others.
    assert_eq!(kernel.page_allocator().free_pages(), total - 1);
    let second = kernel.create_shared_memory(&a, 0x1000, RW, R, "second").unwrap();
    assert_ne!(second.physical_address(), first_pa);
    second.write(0, b"other").unwrap();

    let mut buf = [0u8; 5];
    b.read_memory(va(0x1000), &mut buf).unwrap();
    assert_eq!(&buf, b"first");
    assert_eq!(b.page_table().translate(va(0x1000)), Some(first_pa));

    // Unmapping drops the last reference and returns the pages.
    let first = watch.upgrade().unwrap();
    first.unmap(&b, va(0x1000), 0x1000).unwrap();
    drop(first);
    assert!(watch.upgrade().is_none());
    assert_eq!(kernel.page_allocator().free_pages(), total - 1);
}

#[test]
fn destroying_a_process_releases_its_mappings() {
    let kernel = kernel();
    let total = kernel.page_allocator().total_pages();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");

    let shm = font(&kernel, &a);
    shm.map(&a, va(0x1000), 0x2000, RW).unwrap();
    shm.map(&b, va(0x1000), 0x2000, R).unwrap();
    let watch = Arc::downgrade(&shm);
    drop(shm);

    drop(a);
    assert!(watch.upgrade().is_some());
    drop(b);
    assert!(watch.upgrade().is_none());
    assert_eq!(kernel.page_allocator().free_pages(), total);
    assert_eq!(kernel.live_objects(), 0);
}

#[test]
fn ids_and_handle_types() {
    let kernel = kernel();
    let a = kernel.create_process("a");
    let b = kernel.create_process("b");
    let shm = font(&kernel, &a);

    assert_eq!(a.process_id(), 81);
    assert_eq!(b.process_id(), 82);
    assert_ne!(a.object_id(), b.object_id());
    assert_ne!(b.object_id(), shm.object_id());

    assert_eq!(shm.name(), "font");
    assert_eq!(shm.type_name(), "SharedMemory");
    assert_eq!(shm.handle_type(), hle_kernel::HandleType::SharedMemory);
    assert_eq!(a.handle_type(), hle_kernel::HandleType::Process);

    let objects: [Arc<dyn KernelObject>; 2] = [a.clone(), shm.clone()];
    assert_eq!(objects[0].name(), "a");
}

#[test]
fn invalid_configuration_is_rejected() {
    let err = KernelCore::new(KernelConfig::default().with_device_memory_size(0x1234)).unwrap_err();
    assert!(matches!(err, KernelError::InvalidConfig(_)));
    assert_eq!(err.result_code(), hle_kernel::ResultCode::UNKNOWN);
}

#[test]
fn exhausted_device_memory() {
    let kernel = KernelCore::new(KernelConfig::default().with_device_memory_size(0x2000)).unwrap();
    let a = kernel.create_process("a");
    let _shm = font(&kernel, &a);
    assert_eq!(
        kernel.create_shared_memory(&a, 0x1000, RW, R, "more").unwrap_err(),
        KernelError::OutOfMemory
    );
}
