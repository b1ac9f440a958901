//! # Guest Memory Layout

/// Mapping granularity of the guest kernel.
pub const PAGE_SIZE: u64 = 0x1000;

/// Physical address at which guest DRAM (the device memory pool) begins.
pub const DRAM_BASE: u64 = 0x8000_0000;

/// Size of the device memory pool when no explicit size is configured.
pub const DEFAULT_DEVICE_MEMORY_SIZE: u64 = 64 * 1024 * 1024; // 64 MiB

/// First usable virtual address of a process.
///
/// The null page is never handed out so that a zero address always faults.
pub const ADDRESS_SPACE_BEGIN: u64 = PAGE_SIZE;

/// One past the last usable virtual address of a process (39-bit space).
pub const ADDRESS_SPACE_END: u64 = 1 << 39;

/// Lowest process ID handed to a userland process.
pub const PROCESS_ID_MIN: u64 = 81;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(DRAM_BASE.is_multiple_of(PAGE_SIZE));
    assert!(DEFAULT_DEVICE_MEMORY_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(ADDRESS_SPACE_BEGIN.is_multiple_of(PAGE_SIZE));
    assert!(ADDRESS_SPACE_END > ADDRESS_SPACE_BEGIN);
};
