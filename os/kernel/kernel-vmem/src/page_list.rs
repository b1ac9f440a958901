//! # Physical Page Lists
//!
//! A [`PageList`] describes the (possibly non-contiguous) physical backing of a
//! virtual region as an ordered sequence of [`PageBlock`] runs. The first block
//! backs the lowest virtual pages of the region, the next block continues where
//! the previous one ended, and so on.
//!
//! ```text
//!  virtual:   | p0 | p1 | p2 | p3 | p4 |
//!               └──┬──┘   └─────┬─────┘
//!  physical:  [0x8000_0000 x2]  [0x8010_0000 x3]
//! ```

use crate::VmemError;
use alloc::vec::Vec;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};

/// One physically contiguous run of pages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PageBlock {
    address: PhysicalAddress,
    num_pages: u64,
}

impl PageBlock {
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.address
    }

    #[must_use]
    pub const fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Size of the run in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        Size4K::bytes_for(self.num_pages)
    }

    /// First physical address past the run.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.address + self.size()
    }
}

/// Ordered list of physical runs backing a virtual region.
///
/// Adjacent runs are merged on insertion, so two lists describing the same
/// pages compare equal regardless of how they were assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageList {
    blocks: Vec<PageBlock>,
}

impl PageList {
    #[must_use]
    pub const fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// A list holding exactly one run.
    ///
    /// # Errors
    /// See [`add_block`](Self::add_block).
    pub fn from_block(address: PhysicalAddress, num_pages: u64) -> Result<Self, VmemError> {
        let mut list = Self::new();
        list.add_block(address, num_pages)?;
        Ok(list)
    }

    /// Append `num_pages` pages starting at `address`.
    ///
    /// The run is merged into the last block when it continues it directly.
    ///
    /// # Errors
    /// - [`VmemError::InvalidPhysicalAddress`] if `address` is not page aligned
    ///   or the run would wrap the physical address space.
    /// - [`VmemError::InvalidSize`] if `num_pages` is zero.
    pub fn add_block(&mut self, address: PhysicalAddress, num_pages: u64) -> Result<(), VmemError> {
        if num_pages == 0 {
            return Err(VmemError::InvalidSize(0));
        }
        if !address.is_aligned::<Size4K>() {
            return Err(VmemError::InvalidPhysicalAddress(address));
        }
        let bytes = num_pages
            .checked_mul(Size4K::SIZE)
            .ok_or(VmemError::InvalidSize(num_pages))?;
        if address.checked_add(bytes).is_none() {
            return Err(VmemError::InvalidPhysicalAddress(address));
        }

        if let Some(last) = self.blocks.last_mut()
            && last.end() == address
        {
            last.num_pages += num_pages;
            return Ok(());
        }

        self.blocks.push(PageBlock { address, num_pages });
        Ok(())
    }

    /// Total number of pages; the authoritative size of the region.
    #[must_use]
    pub fn num_pages(&self) -> u64 {
        self.blocks.iter().map(PageBlock::num_pages).sum()
    }

    /// Total size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        Size4K::bytes_for(self.num_pages())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn blocks(&self) -> &[PageBlock] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageBlock> {
        self.blocks.iter()
    }

    /// Physical address of the first page, if any.
    #[must_use]
    pub fn first_address(&self) -> Option<PhysicalAddress> {
        self.blocks.first().map(PageBlock::address)
    }

    /// Resolve a byte offset into the region to its physical address.
    #[must_use]
    pub fn physical_address_at(&self, offset: u64) -> Option<PhysicalAddress> {
        let mut remaining = offset;
        for block in &self.blocks {
            if remaining < block.size() {
                return block.address.checked_add(remaining);
            }
            remaining -= block.size();
        }
        None
    }

    /// The sub-list covering pages `[first_page, first_page + num_pages)`.
    ///
    /// Returns `None` if the requested window is empty or not fully covered.
    #[must_use]
    pub fn slice(&self, first_page: u64, num_pages: u64) -> Option<Self> {
        if num_pages == 0 || first_page.checked_add(num_pages)? > self.num_pages() {
            return None;
        }

        let mut out = Self::new();
        let mut skip = first_page;
        let mut want = num_pages;
        for block in &self.blocks {
            if want == 0 {
                break;
            }
            if skip >= block.num_pages {
                skip -= block.num_pages;
                continue;
            }
            let take = (block.num_pages - skip).min(want);
            let address = block.address + Size4K::bytes_for(skip);
            out.add_block(address, take).ok()?;
            want -= take;
            skip = 0;
        }
        Some(out)
    }

    /// Append every run of `other`, merging at the seam.
    ///
    /// # Errors
    /// Propagates [`add_block`](Self::add_block) failures; cannot fail for
    /// runs that were valid in `other`.
    pub fn extend_from(&mut self, other: &Self) -> Result<(), VmemError> {
        for block in other.iter() {
            self.add_block(block.address, block.num_pages)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PageList {
    type Item = &'a PageBlock;
    type IntoIter = core::slice::Iter<'a, PageBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}
