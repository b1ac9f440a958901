//! # Virtual Memory Support
//!
//! Page-granular mapping bookkeeping for emulated guest processes.
//!
//! ## What you get
//! - A [`PageTable`] per process holding disjoint, structured mapping records
//!   (virtual base, physical [`PageList`], [`MemoryState`], [`MemoryPermission`]).
//! - A [`PageList`] describing the possibly non-contiguous physical backing of
//!   a region.
//! - [`MemoryPermission`], a bitfield in the guest kernel's raw encoding.
//! - [`MemoryState`] tags for mapped ranges.
//! - [`VmemError`], the failure modes of all of the above.
//!
//! ## Model
//!
//! There is no MMU behind this: a guest access goes through
//! [`PageTable::translate_checked`] to find the physical address, and the
//! physical address indexes the device memory arena.
//!
//! ```text
//!  guest VA ──► PageTable ──► (base, Mapping) ──► PageList ──► PA ──► DeviceMemory
//!                               │ state, permission
//! ```
//!
//! ### Invariants
//!
//! - Every mapping is page aligned and a whole number of pages long.
//! - Every mapping lies inside the process' [`AddressSpaceLayout`](kernel_info::AddressSpaceLayout).
//! - No two mappings overlap.
//! - A failed call leaves the table unchanged.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_list;
mod page_table;
mod permission;
mod state;

extern crate alloc;

pub use crate::page_list::{PageBlock, PageList};
pub use crate::page_table::{Backing, MemoryInfo, PageTable};
pub use crate::permission::MemoryPermission;
pub use crate::state::MemoryState;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Errors reported by page lists and page tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    #[error("virtual address {0} is not valid here")]
    InvalidAddress(VirtualAddress),
    #[error("physical address {0} is not page aligned or wraps around")]
    InvalidPhysicalAddress(PhysicalAddress),
    #[error("invalid size {0:#x}")]
    InvalidSize(u64),
    #[error("range {address} + {size:#x} lies outside the address space")]
    InvalidMemoryRange { address: VirtualAddress, size: u64 },
    #[error("range {address} + {size:#x} overlaps the mapping at {existing}")]
    OverlappingMapping {
        address: VirtualAddress,
        size: u64,
        existing: VirtualAddress,
    },
    #[error("nothing is mapped at {0}")]
    UnmappedRegion(VirtualAddress),
    #[error("memory state '{0}' is not valid for this operation")]
    InvalidState(MemoryState),
    #[error("{requested} access to {address} denied (mapped {granted})")]
    AccessViolation {
        address: VirtualAddress,
        requested: MemoryPermission,
        granted: MemoryPermission,
    },
}
