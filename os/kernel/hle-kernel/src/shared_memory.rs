//! # Shared Memory
//!
//! A [`SharedMemory`] is a fixed, page-backed region that processes map into
//! their address spaces. Each object carries two permissions:
//!
//! - the owner permission, required when the creating process maps it;
//! - the user permission, required when any other process maps it.
//!
//! A map request must name exactly the permission that applies to the caller
//! and must cover the whole region. Unmapping likewise takes the whole region.
//!
//! ```text
//!              SharedMemory (size 0x2000, owner rw, user r)
//!                 │ PageList [0x8000_0000 x2]
//!        ┌────────┴─────────┐
//!   Process A (owner)    Process B
//!   0x1000..0x3000 rw    0x5000..0x7000 r
//! ```
//!
//! The object is immutable after creation. Only the page tables of the
//! processes it is mapped into change. Each mapping holds a strong reference
//! to the object, so its pages stay allocated until the last mapping is gone
//! even after every handle has been dropped.
//!
//! ## Ownership
//!
//! The owner is held by a weak reference: shared memory never keeps its
//! owner alive. Once the owner is gone no live process can be the owner, so
//! every later map resolves to the user permission.

use crate::object::{KObjectBase, impl_kernel_object};
use crate::{KernelCore, KernelError, Process};
use alloc::sync::{Arc, Weak};
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress};
use kernel_vmem::{Backing, MemoryPermission, MemoryState, PageList};
use log::{debug, error, warn};

pub struct SharedMemory {
    base: KObjectBase,
    owner: Weak<Process>,
    owner_process_id: u64,
    page_list: PageList,
    owner_permission: MemoryPermission,
    user_permission: MemoryPermission,
    physical_address: PhysicalAddress,
    size: u64,
    /// Pages came from the kernel's allocator and are returned on drop.
    owns_pages: bool,
}

impl_kernel_object!(SharedMemory, SharedMemory);

impl SharedMemory {
    /// Create shared memory over an already resolved page list.
    ///
    /// The pages stay owned by whoever provided them, typically a region the
    /// owner already has mapped.
    ///
    /// # Errors
    /// - [`KernelError::InvalidSize`] if `size` is zero or not page aligned.
    /// - [`KernelError::SizeMismatch`] if `page_list` does not hold exactly
    ///   `size` bytes.
    /// - [`KernelError::InvariantViolation`] if `physical_address` is not the
    ///   first page of `page_list`.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        kernel: &Arc<KernelCore>,
        owner: &Arc<Process>,
        page_list: PageList,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
        physical_address: PhysicalAddress,
        size: u64,
        name: &str,
    ) -> Result<Arc<Self>, KernelError> {
        Self::build(
            kernel,
            owner,
            page_list,
            owner_permission,
            user_permission,
            physical_address,
            size,
            name,
            false,
        )
    }

    /// Like [`create`](Self::create), but the pages return to the kernel's
    /// allocator when the object is destroyed.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_owned(
        kernel: &Arc<KernelCore>,
        owner: &Arc<Process>,
        page_list: PageList,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
        physical_address: PhysicalAddress,
        size: u64,
        name: &str,
    ) -> Result<Arc<Self>, KernelError> {
        Self::build(
            kernel,
            owner,
            page_list,
            owner_permission,
            user_permission,
            physical_address,
            size,
            name,
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        kernel: &Arc<KernelCore>,
        owner: &Arc<Process>,
        page_list: PageList,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
        physical_address: PhysicalAddress,
        size: u64,
        name: &str,
        owns_pages: bool,
    ) -> Result<Arc<Self>, KernelError> {
        if size == 0 || !Size4K::is_aligned(size) {
            return Err(KernelError::InvalidSize(size));
        }
        let expected_pages = Size4K::pages_for(size);
        if page_list.num_pages() != expected_pages {
            return Err(KernelError::SizeMismatch {
                expected_pages,
                requested_pages: page_list.num_pages(),
            });
        }
        if page_list.first_address() != Some(physical_address) {
            return Err(KernelError::InvariantViolation(
                "physical address is not the first page of the page list",
            ));
        }

        let shared_memory = Arc::new(Self {
            base: KObjectBase::new(kernel, name),
            owner: Arc::downgrade(owner),
            owner_process_id: owner.process_id(),
            page_list,
            owner_permission,
            user_permission,
            physical_address,
            size,
            owns_pages,
        });
        debug!(
            "created shared memory '{name}': {size:#x} bytes at {physical_address}, owner pid {} ({owner_permission}), users ({user_permission})",
            owner.process_id()
        );
        Ok(shared_memory)
    }

    /// Map the whole region into `target` at `address`.
    ///
    /// # Errors
    /// - [`KernelError::SizeMismatch`] if `size`, rounded up to pages, is not
    ///   the region's page count.
    /// - [`KernelError::PermissionMismatch`] if `permission` is not exactly the
    ///   owner permission (for the owner) or the user permission (for anyone
    ///   else).
    /// - Page table failures such as [`KernelError::OverlappingMapping`].
    ///
    /// `target`'s page table is unchanged on error. On success the mapping
    /// keeps this object alive until it is unmapped.
    pub fn map(
        self: &Arc<Self>,
        target: &Process,
        address: VirtualAddress,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<(), KernelError> {
        self.check_page_count()?;

        let requested_pages = Size4K::pages_for(size);
        if requested_pages != self.page_list.num_pages() {
            error!(
                "map of '{}' with {requested_pages} page(s) does not cover its {} page(s)",
                self.base.name(),
                self.page_list.num_pages()
            );
            return Err(KernelError::SizeMismatch {
                expected_pages: self.page_list.num_pages(),
                requested_pages,
            });
        }

        let expected = self.expected_permission(target);
        if permission != expected {
            error!(
                "map of '{}' into pid {} requested {permission}, expected {expected}",
                self.base.name(),
                target.process_id()
            );
            return Err(KernelError::PermissionMismatch {
                expected,
                requested: permission,
            });
        }

        let backing = Backing::new(Arc::clone(self));
        target.with_page_table(|page_table| {
            page_table.map_pages_backed(
                address,
                &self.page_list,
                MemoryState::Shared,
                permission,
                Some(backing),
            )
        })?;
        debug!(
            "mapped shared memory '{}' into pid {} at {address} ({permission})",
            self.base.name(),
            target.process_id()
        );
        Ok(())
    }

    /// Remove the mapping of this region from `target` at `address`.
    ///
    /// # Errors
    /// - [`KernelError::InvalidSize`] if `size` is not the region's size.
    /// - Page table failures, e.g. [`KernelError::UnmappedRegion`] if nothing
    ///   is mapped at `address`.
    pub fn unmap(
        &self,
        target: &Process,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), KernelError> {
        if size != self.size {
            error!(
                "invalid unmap size: must equal the shared memory size. shared memory size={:#018X}, unmap size={size:#018X}",
                self.size
            );
            return Err(KernelError::InvalidSize(size));
        }

        // Dropped outside the page table lock.
        let backing = target.with_page_table(|page_table| page_table.take_mapping(address, size))?;
        drop(backing);
        debug!(
            "unmapped shared memory '{}' from pid {} at {address}",
            self.base.name(),
            target.process_id()
        );
        Ok(())
    }

    /// The permission `target` has to request when mapping this region.
    #[must_use]
    pub fn expected_permission(&self, target: &Process) -> MemoryPermission {
        if self.is_owned_by(target) {
            self.owner_permission
        } else {
            self.user_permission
        }
    }

    /// Whether `process` is the live process that created this region.
    #[must_use]
    pub fn is_owned_by(&self, process: &Process) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|owner| core::ptr::eq(Arc::as_ptr(&owner), process))
    }

    /// The owning process, unless it has been destroyed.
    #[must_use]
    pub fn owner(&self) -> Option<Arc<Process>> {
        self.owner.upgrade()
    }

    #[must_use]
    pub const fn owner_process_id(&self) -> u64 {
        self.owner_process_id
    }

    #[must_use]
    pub const fn owner_permission(&self) -> MemoryPermission {
        self.owner_permission
    }

    #[must_use]
    pub const fn user_permission(&self) -> MemoryPermission {
        self.user_permission
    }

    /// Physical address of the first backing page.
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn page_list(&self) -> &PageList {
        &self.page_list
    }

    /// Copy region bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    /// [`KernelError::OutOfBounds`] if the range leaves the region.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        let kernel = self.kernel()?;
        let mut done = 0;
        for (pa, len) in self.physical_chunks(offset, buf.len())? {
            kernel
                .device_memory()
                .read(pa, &mut buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`.
    ///
    /// # Errors
    /// [`KernelError::OutOfBounds`] if the range leaves the region.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), KernelError> {
        let kernel = self.kernel()?;
        let mut done = 0;
        for (pa, len) in self.physical_chunks(offset, data.len())? {
            kernel.device_memory().write(pa, &data[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// Physical pieces of `[offset, offset + len)`, split at page boundaries.
    fn physical_chunks(
        &self,
        offset: u64,
        len: usize,
    ) -> Result<impl Iterator<Item = (PhysicalAddress, usize)> + '_, KernelError> {
        let out_of_bounds = KernelError::OutOfBounds {
            offset,
            len: len as u64,
            size: self.size,
        };
        let end = offset.checked_add(len as u64).ok_or(out_of_bounds)?;
        if end > self.size {
            return Err(out_of_bounds);
        }

        let mut cursor = offset;
        Ok(core::iter::from_fn(move || {
            if cursor >= end {
                return None;
            }
            let pa = self.page_list.physical_address_at(cursor)?;
            let room = Size4K::SIZE - (cursor & (Size4K::SIZE - 1));
            #[allow(clippy::cast_possible_truncation)]
            let chunk = room.min(end - cursor) as usize;
            cursor += chunk as u64;
            Some((pa, chunk))
        }))
    }

    /// The stored page list must always describe exactly `size` bytes.
    fn check_page_count(&self) -> Result<(), KernelError> {
        let consistent = self.page_list.num_pages() == Size4K::pages_for(self.size);
        debug_assert!(consistent, "shared memory page list does not match its size");
        if consistent {
            Ok(())
        } else {
            Err(KernelError::InvariantViolation(
                "shared memory page list does not match its size",
            ))
        }
    }

    fn kernel(&self) -> Result<Arc<KernelCore>, KernelError> {
        self.base
            .kernel()
            .ok_or(KernelError::InvariantViolation("shared memory outlived its kernel"))
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        debug!("destroying shared memory '{}'", self.base.name());
        if !self.owns_pages {
            return;
        }
        let Some(kernel) = self.base.kernel() else {
            warn!(
                "kernel gone before shared memory '{}'; pages not returned",
                self.base.name()
            );
            return;
        };
        if let Err(e) = kernel.page_allocator().free(&self.page_list) {
            error!(
                "failed to return pages of shared memory '{}': {e}",
                self.base.name()
            );
        }
    }
}

impl core::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.base.name())
            .field("owner_process_id", &self.owner_process_id)
            .field("owner_permission", &self.owner_permission)
            .field("user_permission", &self.user_permission)
            .field("physical_address", &self.physical_address)
            .field("size", &format_args!("{:#x}", self.size))
            .finish_non_exhaustive()
    }
}
