use crate::AllocError;
use alloc::boxed::Box;
use alloc::vec;
use kernel_info::memory::DRAM_BASE;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};
use kernel_sync::SpinLock;
use log::debug;

/// Host buffer standing in for guest DRAM.
///
/// Byte `i` of the buffer is guest physical address `base + i`.
pub struct DeviceMemory {
    base: PhysicalAddress,
    bytes: SpinLock<Box<[u8]>>,
}

impl DeviceMemory {
    /// Allocate `size` zeroed bytes of device memory at [`DRAM_BASE`].
    ///
    /// # Errors
    /// [`AllocError::InvalidSize`] if `size` is zero, not a page multiple, or
    /// not addressable on the host.
    pub fn new(size: u64) -> Result<Self, AllocError> {
        if size == 0 || !Size4K::is_aligned(size) {
            return Err(AllocError::InvalidSize(size));
        }
        let len = usize::try_from(size).map_err(|_| AllocError::InvalidSize(size))?;

        debug!("device memory: {size:#x} bytes at {DRAM_BASE:#x}");
        Ok(Self {
            base: PhysicalAddress::new(DRAM_BASE),
            bytes: SpinLock::new(vec![0u8; len].into_boxed_slice()),
        })
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.with_lock(|b| b.len() as u64)
    }

    /// First physical address past device memory.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.size()
    }

    /// Copy `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if any byte lies outside device memory.
    pub fn read(&self, address: PhysicalAddress, buf: &mut [u8]) -> Result<(), AllocError> {
        let bytes = self.bytes.lock();
        let range = self.host_range(address, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    /// Copy `data` into device memory starting at `address`.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if any byte lies outside device memory.
    pub fn write(&self, address: PhysicalAddress, data: &[u8]) -> Result<(), AllocError> {
        let mut bytes = self.bytes.lock();
        let range = self.host_range(address, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Clear `len` bytes starting at `address`.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if any byte lies outside device memory.
    pub fn zero(&self, address: PhysicalAddress, len: u64) -> Result<(), AllocError> {
        let count = usize::try_from(len).map_err(|_| AllocError::OutOfRange { address, len })?;
        let mut bytes = self.bytes.lock();
        let range = self.host_range(address, count, bytes.len())?;
        bytes[range].fill(0);
        Ok(())
    }

    fn host_range(
        &self,
        address: PhysicalAddress,
        len: usize,
        capacity: usize,
    ) -> Result<core::ops::Range<usize>, AllocError> {
        let out_of_range = AllocError::OutOfRange {
            address,
            len: len as u64,
        };
        let start = address
            .distance_from(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(out_of_range)?;
        let end = start.checked_add(len).ok_or(out_of_range)?;
        if end > capacity {
            return Err(out_of_range);
        }
        Ok(start..end)
    }
}

impl core::fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("base", &self.base)
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}
