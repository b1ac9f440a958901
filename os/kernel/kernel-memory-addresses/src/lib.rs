//! # Guest Virtual and Physical Address Types
//!
//! Strongly typed wrappers for the raw addresses the emulated kernel deals in.
//!
//! ## Overview
//!
//! Guest code hands the kernel plain `u64` values. Once decoded, they are
//! wrapped into one of two zero-cost newtypes so that virtual and physical
//! values cannot be mixed up by accident:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] | An address inside a guest process' address space. |
//! | [`PhysicalAddress`] | An address inside the emulated device memory (guest DRAM). |
//!
//! ## Page Sizes
//!
//! The guest kernel manages memory at a single granularity, modelled by the
//! [`Size4K`] marker implementing [`PageSize`]. Page-count conversions go through
//! [`PageSize::pages_for`] (rounding up) and [`PageSize::bytes_for`].
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1234);
//! assert_eq!(va.align_down::<Size4K>().as_u64(), 0x1000);
//! assert_eq!(va.offset::<Size4K>(), 0x234);
//! assert!(!va.is_aligned::<Size4K>());
//!
//! assert_eq!(Size4K::pages_for(0x1001), 2);
//! assert_eq!(Size4K::bytes_for(2), 0x2000);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys.
//! - There is no host pointer conversion: physical addresses are offsets into
//!   the emulated device memory arena, never host addresses.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod virtual_address;

pub use crate::page_size::{PageSize, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;
