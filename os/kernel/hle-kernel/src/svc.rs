//! Supervisor-call entry points for shared memory.
//!
//! These take decoded guest arguments, reject malformed ones with the error
//! a guest kernel would return, and hand the rest to [`SharedMemory`].

use crate::{KernelCore, KernelError, Process, SharedMemory};
use alloc::sync::Arc;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};
use kernel_vmem::MemoryPermission;
use log::warn;

/// Create a new shared memory object owned by `owner`.
///
/// # Errors
/// - [`KernelError::InvalidSize`] if `size` is zero or not page aligned.
/// - [`KernelError::InvalidMemoryPermissions`] if either permission is not
///   read or read-write. Don't-care is refused: a map must name the expected
///   permission exactly, and no map request may name don't-care.
/// - [`KernelError::OutOfMemory`] if no backing pages are left.
pub fn create_shared_memory(
    kernel: &Arc<KernelCore>,
    owner: &Arc<Process>,
    size: u64,
    local_permission: MemoryPermission,
    remote_permission: MemoryPermission,
) -> Result<Arc<SharedMemory>, KernelError> {
    if size == 0 || !Size4K::is_aligned(size) {
        warn!("svc create_shared_memory: invalid size {size:#x}");
        return Err(KernelError::InvalidSize(size));
    }
    for permission in [local_permission, remote_permission] {
        if !is_mappable_permission(permission) {
            warn!("svc create_shared_memory: invalid permission {permission}");
            return Err(KernelError::InvalidMemoryPermissions(permission));
        }
    }

    kernel.create_shared_memory(
        owner,
        size,
        local_permission,
        remote_permission,
        "SharedMemory",
    )
}

/// Map `shared_memory` into `process` at `address`.
///
/// # Errors
/// Argument errors as described in [`check_region`] and
/// [`KernelError::InvalidMemoryPermissions`] for anything other than read or
/// read-write; then whatever [`SharedMemory::map`] reports.
pub fn map_shared_memory(
    process: &Process,
    shared_memory: &Arc<SharedMemory>,
    address: VirtualAddress,
    size: u64,
    permission: MemoryPermission,
) -> Result<(), KernelError> {
    check_region(process, address, size)?;
    if !is_mappable_permission(permission) {
        warn!("svc map_shared_memory: invalid permission {permission}");
        return Err(KernelError::InvalidMemoryPermissions(permission));
    }
    shared_memory.map(process, address, size, permission)
}

/// Unmap `shared_memory` from `process` at `address`.
///
/// # Errors
/// Argument errors as described in [`check_region`]; then whatever
/// [`SharedMemory::unmap`] reports.
pub fn unmap_shared_memory(
    process: &Process,
    shared_memory: &SharedMemory,
    address: VirtualAddress,
    size: u64,
) -> Result<(), KernelError> {
    check_region(process, address, size)?;
    shared_memory.unmap(process, address, size)
}

/// Validate a guest-supplied region.
///
/// # Errors
/// - [`KernelError::InvalidAddress`] if `address` is not page aligned.
/// - [`KernelError::InvalidSize`] if `size` is zero or not page aligned.
/// - [`KernelError::InvalidMemoryRange`] if the region wraps or leaves the
///   process address space.
pub fn check_region(process: &Process, address: VirtualAddress, size: u64) -> Result<(), KernelError> {
    if !address.is_aligned::<Size4K>() {
        warn!("svc: unaligned address {address}");
        return Err(KernelError::InvalidAddress(address));
    }
    if size == 0 || !Size4K::is_aligned(size) {
        warn!("svc: invalid size {size:#x}");
        return Err(KernelError::InvalidSize(size));
    }
    let layout = process.with_page_table(|page_table| page_table.layout());
    if !layout.contains(address, size) {
        warn!("svc: range {address} + {size:#x} outside the address space");
        return Err(KernelError::InvalidMemoryRange { address, size });
    }
    Ok(())
}

fn is_mappable_permission(permission: MemoryPermission) -> bool {
    permission == MemoryPermission::READ || permission == MemoryPermission::READ_WRITE
}
