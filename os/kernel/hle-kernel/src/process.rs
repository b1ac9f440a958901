use crate::KernelCore;
use crate::KernelError;
use crate::object::{KObjectBase, impl_kernel_object};
use alloc::sync::Arc;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};
use kernel_sync::{SpinLock, SpinLockGuard};
use kernel_vmem::{MemoryPermission, PageTable};
use log::trace;

/// An emulated guest process.
///
/// Its identity (the allocation behind its `Arc`) is what shared memory
/// compares against to tell the owner from other processes. All changes to
/// its mappings go through one lock.
pub struct Process {
    base: KObjectBase,
    process_id: u64,
    page_table: SpinLock<PageTable>,
}

impl_kernel_object!(Process, Process);

impl Process {
    pub(crate) fn new(kernel: &Arc<KernelCore>, process_id: u64, name: &str) -> Arc<Self> {
        Arc::new(Self {
            base: KObjectBase::new(kernel, name),
            process_id,
            page_table: SpinLock::new(PageTable::new(kernel.config().address_space)),
        })
    }

    #[must_use]
    pub const fn process_id(&self) -> u64 {
        self.process_id
    }

    /// Lock the page table.
    pub fn page_table(&self) -> SpinLockGuard<'_, PageTable> {
        self.page_table.lock()
    }

    /// Run `f` with the page table locked.
    pub fn with_page_table<R>(&self, f: impl FnOnce(&mut PageTable) -> R) -> R {
        self.page_table.with_lock(f)
    }

    /// Copy guest memory at `address` into `buf`.
    ///
    /// # Errors
    /// - [`KernelError::UnmappedRegion`] if a byte is not mapped.
    /// - [`KernelError::InvalidMemoryPermissions`] if a page is not readable.
    pub fn read_memory(&self, address: VirtualAddress, buf: &mut [u8]) -> Result<(), KernelError> {
        let kernel = self.kernel()?;
        let page_table = self.page_table.lock();
        let mut done = 0;
        for (va, len) in page_chunks(address, buf.len())? {
            let pa = page_table.translate_checked(va, MemoryPermission::READ)?;
            kernel
                .device_memory()
                .read(pa, &mut buf[done..done + len])?;
            done += len;
        }
        trace!("pid {}: read {done:#x} bytes at {address}", self.process_id);
        Ok(())
    }

    /// Copy `data` into guest memory at `address`.
    ///
    /// Every page is checked before the first byte is written.
    ///
    /// # Errors
    /// - [`KernelError::UnmappedRegion`] if a byte is not mapped.
    /// - [`KernelError::InvalidMemoryPermissions`] if a page is not writable.
    pub fn write_memory(&self, address: VirtualAddress, data: &[u8]) -> Result<(), KernelError> {
        let kernel = self.kernel()?;
        let page_table = self.page_table.lock();
        let chunks = page_chunks(address, data.len())?;
        for (va, _) in chunks.clone() {
            page_table.translate_checked(va, MemoryPermission::WRITE)?;
        }

        let mut done = 0;
        for (va, len) in chunks {
            let pa = page_table.translate_checked(va, MemoryPermission::WRITE)?;
            kernel.device_memory().write(pa, &data[done..done + len])?;
            done += len;
        }
        trace!("pid {}: wrote {done:#x} bytes at {address}", self.process_id);
        Ok(())
    }

    fn kernel(&self) -> Result<Arc<KernelCore>, KernelError> {
        self.base
            .kernel()
            .ok_or(KernelError::InvariantViolation("process outlived its kernel"))
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("process_id", &self.process_id)
            .field("name", &self.base.name())
            .finish_non_exhaustive()
    }
}

/// Split `[address, address + len)` at page boundaries.
fn page_chunks(
    address: VirtualAddress,
    len: usize,
) -> Result<impl Iterator<Item = (VirtualAddress, usize)> + Clone, KernelError> {
    let end = address
        .checked_add(len as u64)
        .ok_or(KernelError::InvalidMemoryRange {
            address,
            size: len as u64,
        })?;

    let mut cursor = address;
    Ok(core::iter::from_fn(move || {
        if cursor >= end {
            return None;
        }
        let room = Size4K::SIZE - cursor.offset::<Size4K>();
        #[allow(clippy::cast_possible_truncation)]
        let chunk = room.min(end.as_u64() - cursor.as_u64()) as usize;
        let at = cursor;
        cursor += chunk as u64;
        Some((at, chunk))
    }))
}
