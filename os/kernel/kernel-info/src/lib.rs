//! # Kernel Configuration
//!
//! This crate is the single source of truth for the layout values the
//! emulated kernel is built around, and for the runtime configuration an
//! emulation session is started with.
//!
//! ## Compile-Time Layout ([`memory`])
//!
//! ```text
//! Guest Virtual Address Space (per process):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │      Null page (never mapped)   │
//! ADDRESS_SPACE_BEGIN   ├─────────────────────────────────┤ 0x0000_0000_0000_1000
//!                       │                                 │
//!                       │   Mappable guest memory         │
//!                       │   (private, shared, locked)     │
//!                       │                                 │
//! ADDRESS_SPACE_END     └─────────────────────────────────┘ 0x0000_0080_0000_0000
//!
//! Guest Physical Memory (device memory pool):
//!
//! DRAM_BASE             ┌─────────────────────────────────┐ 0x0000_0000_8000_0000
//!                       │   Pages handed out by the page  │
//!                       │   allocator as page lists       │
//! DRAM_BASE + size      └─────────────────────────────────┘
//! ```
//!
//! ## Runtime Configuration ([`KernelConfig`])
//!
//! A session picks the device memory size and the per-process address space
//! bounds. Defaults mirror the compile-time constants.
//!
//! ```rust
//! use kernel_info::{AddressSpaceLayout, KernelConfig};
//!
//! let config = KernelConfig::default()
//!     .with_device_memory_size(0x10_0000)
//!     .with_address_space(AddressSpaceLayout::new(0x1000, 0x1_0000_0000));
//! assert!(config.validate().is_ok());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;

use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};

/// Virtual bounds `[begin, end)` of every process address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressSpaceLayout {
    begin: u64,
    end: u64,
}

impl AddressSpaceLayout {
    #[must_use]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    #[must_use]
    pub const fn begin(&self) -> VirtualAddress {
        VirtualAddress::new(self.begin)
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.end)
    }

    /// Size of the address space in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    /// Whether `[address, address + size)` lies entirely inside the layout.
    ///
    /// A zero-sized range is never contained.
    #[must_use]
    pub const fn contains(&self, address: VirtualAddress, size: u64) -> bool {
        let start = address.as_u64();
        let Some(last) = start.checked_add(size) else {
            return false;
        };
        size != 0 && start >= self.begin && last <= self.end
    }
}

impl Default for AddressSpaceLayout {
    fn default() -> Self {
        Self::new(memory::ADDRESS_SPACE_BEGIN, memory::ADDRESS_SPACE_END)
    }
}

/// Settings an emulation session is started with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Bytes of guest DRAM backing all guest memory.
    pub device_memory_size: u64,
    /// Bounds applied to every process created in this session.
    pub address_space: AddressSpaceLayout,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            device_memory_size: memory::DEFAULT_DEVICE_MEMORY_SIZE,
            address_space: AddressSpaceLayout::default(),
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub const fn with_device_memory_size(mut self, size: u64) -> Self {
        self.device_memory_size = size;
        self
    }

    #[must_use]
    pub const fn with_address_space(mut self, layout: AddressSpaceLayout) -> Self {
        self.address_space = layout;
        self
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_memory_size == 0 || !Size4K::is_aligned(self.device_memory_size) {
            return Err(ConfigError::DeviceMemorySize(self.device_memory_size));
        }

        let layout = self.address_space;
        if layout.size() == 0
            || !Size4K::is_aligned(layout.begin)
            || !Size4K::is_aligned(layout.end)
        {
            return Err(ConfigError::AddressSpace {
                begin: layout.begin,
                end: layout.end,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("device memory size {0:#x} must be a non-zero multiple of the page size")]
    DeviceMemorySize(u64),
    #[error("address space [{begin:#x}, {end:#x}) must be non-empty and page aligned")]
    AddressSpace { begin: u64, end: u64 },
}
