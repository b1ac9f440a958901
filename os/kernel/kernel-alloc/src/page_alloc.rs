//! Bitmap page allocator over device memory.

use crate::AllocError;
use alloc::vec;
use alloc::vec::Vec;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};
use kernel_sync::SpinLock;
use kernel_vmem::PageList;
use log::{debug, trace, warn};

const BITS: u64 = u64::BITS as u64;

/// One bit per page, set while the page is handed out.
struct Bitmap {
    words: Vec<u64>,
    free: u64,
}

#[allow(clippy::cast_possible_truncation)]
impl Bitmap {
    fn is_used(&self, page: u64) -> bool {
        self.words[(page / BITS) as usize] & (1 << (page % BITS)) != 0
    }

    fn set(&mut self, page: u64, used: bool) {
        let word = &mut self.words[(page / BITS) as usize];
        if used {
            *word |= 1 << (page % BITS);
        } else {
            *word &= !(1 << (page % BITS));
        }
    }
}

/// Hands out 4 KiB pages of device memory as [`PageList`]s.
///
/// Allocation takes the lowest free pages first. When free space is
/// fragmented the returned list has several runs; callers must not assume
/// physical contiguity.
pub struct PageAllocator {
    base: PhysicalAddress,
    total_pages: u64,
    bitmap: SpinLock<Bitmap>,
}

impl PageAllocator {
    /// Manage the `size` bytes of physical memory starting at `base`.
    ///
    /// # Errors
    /// [`AllocError::InvalidSize`] if `size` is zero or not a page multiple;
    /// [`AllocError::OutOfRange`] if `base` is not page aligned or the range
    /// wraps.
    pub fn new(base: PhysicalAddress, size: u64) -> Result<Self, AllocError> {
        if size == 0 || !Size4K::is_aligned(size) {
            return Err(AllocError::InvalidSize(size));
        }
        if !base.is_aligned::<Size4K>() || base.checked_add(size).is_none() {
            return Err(AllocError::OutOfRange { address: base, len: size });
        }

        let total_pages = Size4K::pages_for(size);
        let words = usize::try_from(total_pages.div_ceil(BITS))
            .map_err(|_| AllocError::InvalidSize(size))?;
        Ok(Self {
            base,
            total_pages,
            bitmap: SpinLock::new(Bitmap {
                words: vec![0; words],
                free: total_pages,
            }),
        })
    }

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.bitmap.with_lock(|b| b.free)
    }

    /// Take `num_pages` free pages.
    ///
    /// # Errors
    /// - [`AllocError::InvalidSize`] if `num_pages` is zero.
    /// - [`AllocError::OutOfMemory`] if fewer than `num_pages` pages are free;
    ///   nothing is taken in that case.
    pub fn allocate(&self, num_pages: u64) -> Result<PageList, AllocError> {
        if num_pages == 0 {
            return Err(AllocError::InvalidSize(0));
        }

        let mut bitmap = self.bitmap.lock();
        if bitmap.free < num_pages {
            warn!(
                "page allocation of {num_pages} failed, {} free",
                bitmap.free
            );
            return Err(AllocError::OutOfMemory {
                requested: num_pages,
                available: bitmap.free,
            });
        }

        let mut list = PageList::new();
        let mut found = 0;
        let mut page = 0;
        while found < num_pages && page < self.total_pages {
            if !bitmap.is_used(page) {
                let address = self.page_address(page);
                list.add_block(address, 1)
                    .map_err(|_| AllocError::OutOfRange {
                        address,
                        len: Size4K::SIZE,
                    })?;
                found += 1;
            }
            page += 1;
        }

        for block in &list {
            let first = self.page_index(block.address(), block.size())?;
            for page in first..first + block.num_pages() {
                bitmap.set(page, true);
            }
        }
        bitmap.free -= num_pages;

        trace!(
            "allocated {num_pages} page(s) in {} run(s)",
            list.blocks().len()
        );
        Ok(list)
    }

    /// Return every page of `list`.
    ///
    /// # Errors
    /// - [`AllocError::OutOfRange`] if a run lies outside this allocator.
    /// - [`AllocError::NotAllocated`] if a page is already free.
    ///
    /// The list is checked in full before anything is released.
    pub fn free(&self, list: &PageList) -> Result<(), AllocError> {
        let mut bitmap = self.bitmap.lock();
        for block in list {
            let first = self.page_index(block.address(), block.size())?;
            for page in first..first + block.num_pages() {
                if !bitmap.is_used(page) {
                    return Err(AllocError::NotAllocated(self.page_address(page)));
                }
            }
        }

        for block in list {
            let first = self.page_index(block.address(), block.size())?;
            for page in first..first + block.num_pages() {
                bitmap.set(page, false);
            }
        }
        bitmap.free += list.num_pages();
        debug!("freed {} page(s)", list.num_pages());
        Ok(())
    }

    fn page_address(&self, page: u64) -> PhysicalAddress {
        self.base + Size4K::bytes_for(page)
    }

    fn page_index(&self, address: PhysicalAddress, len: u64) -> Result<u64, AllocError> {
        let out_of_range = AllocError::OutOfRange { address, len };
        let offset = address.distance_from(self.base).ok_or(out_of_range)?;
        let end = offset.checked_add(len).ok_or(out_of_range)?;
        if end > Size4K::bytes_for(self.total_pages) || !Size4K::is_aligned(offset) {
            return Err(out_of_range);
        }
        Ok(offset >> Size4K::SHIFT)
    }
}

impl core::fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("base", &self.base)
            .field("total_pages", &self.total_pages)
            .field("free_pages", &self.free_pages())
            .finish()
    }
}
