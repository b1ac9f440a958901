//! # Guest Physical Memory
//!
//! Backing store and page allocation for emulated guest DRAM.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 PageAllocator                       │
//! │    • 4KiB page bookkeeping (bitmap)                 │
//! │    • Hands out page lists, possibly fragmented      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ physical addresses
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 DeviceMemory                        │
//! │    • One host buffer starting at DRAM_BASE          │
//! │    • Bounds-checked byte access by physical address │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Both halves cover the same physical range `[DRAM_BASE, DRAM_BASE + size)`.
//! Neither knows about virtual addresses; translation is the page table's job.
//!
//! ```rust
//! use kernel_alloc::{DeviceMemory, PageAllocator};
//!
//! let memory = DeviceMemory::new(0x10_000).unwrap();
//! let pages = PageAllocator::new(memory.base(), memory.size()).unwrap();
//!
//! let list = pages.allocate(2).unwrap();
//! let pa = list.first_address().unwrap();
//! memory.write(pa, b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! memory.read(pa, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//!
//! pages.free(&list).unwrap();
//! assert_eq!(pages.free_pages(), pages.total_pages());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod device_memory;
mod page_alloc;

pub use crate::device_memory::DeviceMemory;
pub use crate::page_alloc::PageAllocator;
use kernel_memory_addresses::PhysicalAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of device memory: {requested} page(s) requested, {available} free")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("physical range {address} + {len:#x} is outside device memory")]
    OutOfRange { address: PhysicalAddress, len: u64 },
    #[error("page {0} is not allocated")]
    NotAllocated(PhysicalAddress),
    #[error("invalid size {0:#x}")]
    InvalidSize(u64),
}
