//! # HLE Kernel Memory Objects
//!
//! The memory side of an emulated guest kernel: processes with their own
//! address spaces, and shared memory objects that several processes map with
//! separately negotiated permissions.
//!
//! ## Architecture
//!
//! ```text
//!                ┌─────────────────────────────┐
//!   svc layer ──►│ KernelCore                  │
//!                │  • DeviceMemory (guest DRAM)│
//!                │  • PageAllocator            │
//!                │  • object / process ids     │
//!                └──────┬───────────────┬──────┘
//!                       │ Arc           │ Arc
//!                ┌──────▼─────┐  Weak ┌─▼────────────┐
//!                │  Process   │◄──────┤ SharedMemory │
//!                │ SpinLock<  │ owner │  PageList    │
//!                │  PageTable>│       │  owner/user  │
//!                └────────────┘       │  permission  │
//!                                     └──────────────┘
//! ```
//!
//! - Every object lives behind an [`Arc`](alloc::sync::Arc) and implements
//!   [`KernelObject`]. [`KernelCore::live_objects`] counts objects not yet
//!   destroyed.
//! - Objects refer back to their kernel weakly; [`SharedMemory`] refers to its
//!   owner weakly, so it never keeps the owner alive.
//! - A mapping of a [`SharedMemory`] holds it strongly: the object and its
//!   pages outlive every handle until the last mapping is removed.
//! - Each [`Process`] serializes mapping changes through its page table lock.
//!   No operation holds two page table locks at once.
//!
//! ## Example
//!
//! ```rust
//! use hle_kernel::{KernelConfig, KernelCore, KernelError, MemoryPermission, VirtualAddress};
//!
//! let kernel = KernelCore::new(KernelConfig::default().with_device_memory_size(0x10_0000)).unwrap();
//! let a = kernel.create_process("a");
//! let b = kernel.create_process("b");
//!
//! let shm = kernel
//!     .create_shared_memory(&a, 0x2000, MemoryPermission::READ_WRITE, MemoryPermission::READ, "font")
//!     .unwrap();
//!
//! shm.map(&a, VirtualAddress::new(0x1000), 0x2000, MemoryPermission::READ_WRITE).unwrap();
//! assert!(matches!(
//!     shm.map(&b, VirtualAddress::new(0x5000), 0x2000, MemoryPermission::READ_WRITE),
//!     Err(KernelError::PermissionMismatch { .. })
//! ));
//! shm.map(&b, VirtualAddress::new(0x5000), 0x2000, MemoryPermission::READ).unwrap();
//!
//! a.write_memory(VirtualAddress::new(0x1000), b"shared").unwrap();
//! let mut buf = [0u8; 6];
//! b.read_memory(VirtualAddress::new(0x5000), &mut buf).unwrap();
//! assert_eq!(&buf, b"shared");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod context;
mod error;
mod object;
mod process;
mod shared_memory;
pub mod svc;

pub use crate::context::KernelCore;
pub use crate::error::{KernelError, ResultCode};
pub use crate::object::{HandleType, KObjectBase, KernelObject};
pub use crate::process::Process;
pub use crate::shared_memory::SharedMemory;
pub use kernel_info::{AddressSpaceLayout, KernelConfig};
pub use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
pub use kernel_vmem::{MemoryInfo, MemoryPermission, MemoryState, PageList, PageTable};
