use crate::{KernelError, Process, SharedMemory};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_alloc::{DeviceMemory, PageAllocator};
use kernel_info::KernelConfig;
use kernel_info::memory::PROCESS_ID_MIN;
use kernel_memory_addresses::{PageSize, Size4K};
use kernel_vmem::{MemoryPermission, PageList};
use log::{debug, error, info};

/// One emulation session's kernel state.
///
/// Owns guest DRAM and its page allocator and hands out object and process
/// ids. Created at session start and torn down when the last reference is
/// dropped; objects only hold a weak reference back to it.
pub struct KernelCore {
    config: KernelConfig,
    device_memory: DeviceMemory,
    page_allocator: PageAllocator,
    next_object_id: AtomicU64,
    next_process_id: AtomicU64,
    live_objects: Arc<AtomicUsize>,
}

impl KernelCore {
    /// Start a kernel with the given configuration.
    ///
    /// # Errors
    /// - [`KernelError::InvalidConfig`] if `config` does not validate.
    /// - Device memory setup failures.
    pub fn new(config: KernelConfig) -> Result<Arc<Self>, KernelError> {
        config.validate()?;
        let device_memory = DeviceMemory::new(config.device_memory_size)?;
        let page_allocator = PageAllocator::new(device_memory.base(), device_memory.size())?;

        info!(
            "kernel up: {:#x} bytes of device memory, address space [{}, {})",
            config.device_memory_size,
            config.address_space.begin(),
            config.address_space.end()
        );
        Ok(Arc::new(Self {
            config,
            device_memory,
            page_allocator,
            next_object_id: AtomicU64::new(1),
            next_process_id: AtomicU64::new(PROCESS_ID_MIN),
            live_objects: Arc::new(AtomicUsize::new(0)),
        }))
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn device_memory(&self) -> &DeviceMemory {
        &self.device_memory
    }

    #[must_use]
    pub const fn page_allocator(&self) -> &PageAllocator {
        &self.page_allocator
    }

    /// Number of kernel objects created and not yet destroyed.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::Acquire)
    }

    /// Create an empty process with its own page table.
    #[must_use]
    pub fn create_process(self: &Arc<Self>, name: &str) -> Arc<Process> {
        let pid = self.next_process_id.fetch_add(1, Ordering::Relaxed);
        Process::new(self, pid, name)
    }

    /// Create a shared memory object over freshly allocated, zeroed pages.
    ///
    /// The pages go back to the allocator when the object is destroyed.
    ///
    /// # Errors
    /// - [`KernelError::InvalidSize`] if `size` is zero or not page aligned.
    /// - [`KernelError::OutOfMemory`] if device memory is exhausted.
    pub fn create_shared_memory(
        self: &Arc<Self>,
        owner: &Arc<Process>,
        size: u64,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
        name: &str,
    ) -> Result<Arc<SharedMemory>, KernelError> {
        if size == 0 || !Size4K::is_aligned(size) {
            return Err(KernelError::InvalidSize(size));
        }

        let pages = self.page_allocator.allocate(Size4K::pages_for(size))?;
        let created = self.back_shared_memory(
            owner,
            pages.clone(),
            owner_permission,
            user_permission,
            size,
            name,
        );
        match created {
            Ok(shared_memory) => {
                debug!("allocated {size:#x} bytes of shared memory '{name}'");
                Ok(shared_memory)
            }
            Err(cause) => Err(self.discard_pages(&pages, name, cause)),
        }
    }

    /// Return the pages of a failed creation. `cause` stays the reported
    /// error even if the pages cannot be returned.
    fn discard_pages(&self, pages: &PageList, name: &str, cause: KernelError) -> KernelError {
        if let Err(e) = self.page_allocator.free(pages) {
            error!("failed to return pages of '{name}' after '{cause}': {e}");
        }
        cause
    }

    fn back_shared_memory(
        self: &Arc<Self>,
        owner: &Arc<Process>,
        pages: PageList,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
        size: u64,
        name: &str,
    ) -> Result<Arc<SharedMemory>, KernelError> {
        for block in &pages {
            self.device_memory.zero(block.address(), block.size())?;
        }
        let physical_address = pages
            .first_address()
            .ok_or(KernelError::InvariantViolation("allocator returned no pages"))?;
        SharedMemory::create_owned(
            self,
            owner,
            pages,
            owner_permission,
            user_permission,
            physical_address,
            size,
            name,
        )
    }

    pub(crate) fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn live_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live_objects)
    }
}

impl core::fmt::Debug for KernelCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelCore")
            .field("config", &self.config)
            .field("page_allocator", &self.page_allocator)
            .field("live_objects", &self.live_objects())
            .finish_non_exhaustive()
    }
}
