//! # Range-Based Process Page Table
//!
//! Instead of a radix tree of hardware entries, a [`PageTable`] keeps one
//! structured record per mapping, keyed by its virtual base:
//!
//! ```text
//!  layout.begin                                                layout.end
//!  │ free │ 0x1000..0x3000 shared rw │ free │ 0x5000..0x6000 private r │ free │
//!           └─ PageList [pa x2]              └─ PageList [pa x1]
//! ```
//!
//! Free space is implicit: anything inside the address space layout that is
//! not covered by a record is free. Records never overlap, so unmapping a
//! record restores exactly the free boundaries that existed before it was
//! mapped.
//!
//! Physical backing is addressed by [`PhysicalAddress`] into the device memory
//! arena; there are no host pointers in here. A mapping may also hold a
//! [`Backing`] handle to the object that owns those pages, so the pages stay
//! allocated for as long as anything maps them.
//!
//! The table itself is not synchronized. Its owner (a process) serializes
//! access through a lock.

mod memory_info;

pub use crate::page_table::memory_info::MemoryInfo;
use crate::{MemoryPermission, MemoryState, PageList, VmemError};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::any::Any;
use core::fmt;
use core::ops::Bound::{Excluded, Unbounded};
use kernel_info::AddressSpaceLayout;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress};
use log::{debug, warn};

/// Strong reference to the object whose pages back a mapping.
///
/// Dropped together with the mapping.
#[derive(Clone)]
pub struct Backing(Arc<dyn Any + Send + Sync>);

impl Backing {
    #[must_use]
    pub fn new<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self(object)
    }

    /// Whether this handle refers to `object`.
    #[must_use]
    pub fn is<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        core::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(object))
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backing").field(&Arc::as_ptr(&self.0)).finish()
    }
}

/// One mapped range.
#[derive(Debug, Clone)]
struct Mapping {
    state: MemoryState,
    permission: MemoryPermission,
    pages: PageList,
    backing: Option<Backing>,
}

impl Mapping {
    fn size(&self) -> u64 {
        self.pages.size()
    }

    fn info(&self, base: VirtualAddress) -> MemoryInfo {
        MemoryInfo {
            base,
            size: self.size(),
            state: self.state,
            permission: self.permission,
        }
    }
}

/// Virtual-to-physical mapping set of a single process.
#[derive(Debug, Clone)]
pub struct PageTable {
    layout: AddressSpaceLayout,
    mappings: BTreeMap<VirtualAddress, Mapping>,
}

impl PageTable {
    #[must_use]
    pub const fn new(layout: AddressSpaceLayout) -> Self {
        Self {
            layout,
            mappings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn layout(&self) -> AddressSpaceLayout {
        self.layout
    }

    /// Number of live mappings.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// All live mappings in ascending address order.
    pub fn mappings(&self) -> impl Iterator<Item = MemoryInfo> + '_ {
        self.mappings.iter().map(|(base, m)| m.info(*base))
    }

    /// Map the pages of `pages` at `address`, in list order.
    ///
    /// The first run of the list backs the lowest virtual pages. The new range
    /// is tagged with `state` and `permission`.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] if `address` is not page aligned.
    /// - [`VmemError::InvalidSize`] if `pages` is empty.
    /// - [`VmemError::InvalidState`] if `state` is [`MemoryState::Free`].
    /// - [`VmemError::InvalidMemoryRange`] if the range leaves the address space.
    /// - [`VmemError::OverlappingMapping`] if any page of the range is mapped.
    ///
    /// The table is left untouched on error.
    pub fn map_pages(
        &mut self,
        address: VirtualAddress,
        pages: &PageList,
        state: MemoryState,
        permission: MemoryPermission,
    ) -> Result<(), VmemError> {
        self.map_pages_backed(address, pages, state, permission, None)
    }

    /// Like [`map_pages`](Self::map_pages), keeping `backing` alive until the
    /// range is unmapped.
    ///
    /// # Errors
    /// As for [`map_pages`](Self::map_pages). `backing` is dropped on error.
    pub fn map_pages_backed(
        &mut self,
        address: VirtualAddress,
        pages: &PageList,
        state: MemoryState,
        permission: MemoryPermission,
        backing: Option<Backing>,
    ) -> Result<(), VmemError> {
        if pages.is_empty() {
            return Err(VmemError::InvalidSize(0));
        }
        let size = pages.size();
        self.validate_range(address, size)?;
        if state.is_free() {
            return Err(VmemError::InvalidState(state));
        }

        if let Some(existing) = self.first_overlap(address, size) {
            warn!("refusing to map {address} + {size:#x}: overlaps mapping at {existing}");
            return Err(VmemError::OverlappingMapping {
                address,
                size,
                existing,
            });
        }

        debug!(
            "mapped {address} + {size:#x} as {state} {permission} ({} run(s))",
            pages.blocks().len()
        );
        self.mappings.insert(
            address,
            Mapping {
                state,
                permission,
                pages: pages.clone(),
                backing,
            },
        );
        Ok(())
    }

    /// Remove the mapping that starts at `address` and spans exactly `size`.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] / [`VmemError::InvalidSize`] for
    ///   misaligned or empty arguments, or when the span does not match the
    ///   mapping that covers `address`.
    /// - [`VmemError::InvalidMemoryRange`] if the range leaves the address space.
    /// - [`VmemError::UnmappedRegion`] if nothing is mapped at `address`.
    pub fn unmap_memory(&mut self, address: VirtualAddress, size: u64) -> Result<(), VmemError> {
        self.take_mapping(address, size).map(drop)
    }

    /// Remove the mapping like [`unmap_memory`](Self::unmap_memory) and hand
    /// its [`Backing`] to the caller, so it can be released outside any lock
    /// around the table.
    ///
    /// # Errors
    /// As for [`unmap_memory`](Self::unmap_memory).
    pub fn take_mapping(
        &mut self,
        address: VirtualAddress,
        size: u64,
    ) -> Result<Option<Backing>, VmemError> {
        self.validate_range(address, size)?;

        let Some((base, mapping)) = self.containing(address) else {
            return Err(VmemError::UnmappedRegion(address));
        };
        if base != address {
            warn!("unmap at {address} starts inside the mapping at {base}");
            return Err(VmemError::InvalidAddress(address));
        }
        if mapping.size() != size {
            warn!(
                "unmap size {size:#x} at {address} does not match mapped size {:#x}",
                mapping.size()
            );
            return Err(VmemError::InvalidSize(size));
        }

        let removed = self.mappings.remove(&address);
        debug!("unmapped {address} + {size:#x}");
        Ok(removed.and_then(|m| m.backing))
    }

    /// The [`Backing`] of the mapping that starts at `address`, if any.
    #[must_use]
    pub fn backing(&self, address: VirtualAddress) -> Option<&Backing> {
        self.mappings.get(&address)?.backing.as_ref()
    }

    /// Describe the range containing `address`.
    ///
    /// Returns `None` for addresses outside the address space.
    #[must_use]
    pub fn query(&self, address: VirtualAddress) -> Option<MemoryInfo> {
        if address < self.layout.begin() || address >= self.layout.end() {
            return None;
        }
        if let Some((base, mapping)) = self.containing(address) {
            return Some(mapping.info(base));
        }

        let lower = self
            .mappings
            .range(..=address)
            .next_back()
            .map_or(self.layout.begin(), |(base, m)| *base + m.size())
            .max(self.layout.begin());
        let upper = self
            .mappings
            .range((Excluded(address), Unbounded))
            .next()
            .map_or(self.layout.end(), |(base, _)| *base);

        Some(MemoryInfo {
            base: lower,
            size: upper.as_u64() - lower.as_u64(),
            state: MemoryState::Free,
            permission: MemoryPermission::NONE,
        })
    }

    /// Whether no page of `[address, address + size)` is mapped.
    #[must_use]
    pub fn is_free(&self, address: VirtualAddress, size: u64) -> bool {
        self.layout.contains(address, size) && self.first_overlap(address, size).is_none()
    }

    /// Translate a virtual address to its physical backing, if mapped.
    #[must_use]
    pub fn translate(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let (base, mapping) = self.containing(address)?;
        mapping
            .pages
            .physical_address_at(address.as_u64() - base.as_u64())
    }

    /// Translate `address` for an access needing `access` rights.
    ///
    /// # Errors
    /// - [`VmemError::UnmappedRegion`] if nothing is mapped at `address`.
    /// - [`VmemError::AccessViolation`] if the mapping does not grant `access`.
    pub fn translate_checked(
        &self,
        address: VirtualAddress,
        access: MemoryPermission,
    ) -> Result<PhysicalAddress, VmemError> {
        let (base, mapping) = self
            .containing(address)
            .ok_or(VmemError::UnmappedRegion(address))?;
        if !mapping.permission.allows(access) {
            return Err(VmemError::AccessViolation {
                address,
                requested: access,
                granted: mapping.permission,
            });
        }
        mapping
            .pages
            .physical_address_at(address.as_u64() - base.as_u64())
            .ok_or(VmemError::UnmappedRegion(address))
    }

    /// Resolve `num_pages` mapped pages starting at `address` to their
    /// physical backing.
    ///
    /// The range may span several mappings as long as there is no gap.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] / [`VmemError::InvalidSize`] /
    ///   [`VmemError::InvalidMemoryRange`] for bad arguments.
    /// - [`VmemError::UnmappedRegion`] at the first unmapped page.
    pub fn make_page_list(
        &self,
        address: VirtualAddress,
        num_pages: u64,
    ) -> Result<PageList, VmemError> {
        let size = num_pages
            .checked_mul(Size4K::SIZE)
            .ok_or(VmemError::InvalidSize(num_pages))?;
        self.validate_range(address, size)?;

        let mut out = PageList::new();
        let mut cursor = address;
        let mut remaining = num_pages;
        while remaining > 0 {
            let (base, mapping) = self
                .containing(cursor)
                .ok_or(VmemError::UnmappedRegion(cursor))?;
            let first_page = (cursor.as_u64() - base.as_u64()) >> Size4K::SHIFT;
            let take = (mapping.pages.num_pages() - first_page).min(remaining);
            let part = mapping
                .pages
                .slice(first_page, take)
                .ok_or(VmemError::UnmappedRegion(cursor))?;
            out.extend_from(&part)?;
            cursor += Size4K::bytes_for(take);
            remaining -= take;
        }
        Ok(out)
    }

    fn validate_range(&self, address: VirtualAddress, size: u64) -> Result<(), VmemError> {
        if !address.is_aligned::<Size4K>() {
            return Err(VmemError::InvalidAddress(address));
        }
        if size == 0 || !Size4K::is_aligned(size) {
            return Err(VmemError::InvalidSize(size));
        }
        if !self.layout.contains(address, size) {
            return Err(VmemError::InvalidMemoryRange { address, size });
        }
        Ok(())
    }

    /// The mapping whose range contains `address`.
    fn containing(&self, address: VirtualAddress) -> Option<(VirtualAddress, &Mapping)> {
        let (base, mapping) = self.mappings.range(..=address).next_back()?;
        (address.as_u64() - base.as_u64() < mapping.size()).then_some((*base, mapping))
    }

    /// Base of the first mapping intersecting `[address, address + size)`.
    fn first_overlap(&self, address: VirtualAddress, size: u64) -> Option<VirtualAddress> {
        let end = address.checked_add(size)?;
        if let Some((base, _)) = self.containing(address) {
            return Some(base);
        }
        self.mappings
            .range((Excluded(address), Unbounded))
            .next()
            .and_then(|(base, _)| (*base < end).then_some(*base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: MemoryPermission = MemoryPermission::READ_WRITE;

    fn table() -> PageTable {
        PageTable::new(AddressSpaceLayout::new(0x1000, 0x10_0000))
    }

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pages(pa: u64, n: u64) -> PageList {
        PageList::from_block(PhysicalAddress::new(pa), n).unwrap()
    }

    #[test]
    fn map_records_state_and_permission() {
        let mut pt = table();
        pt.map_pages(va(0x1000), &pages(0x8000_0000, 2), MemoryState::Shared, RW)
            .unwrap();

        let info = pt.query(va(0x2FFF)).unwrap();
        assert_eq!(info.base, va(0x1000));
        assert_eq!(info.size, 0x2000);
        assert_eq!(info.state, MemoryState::Shared);
        assert_eq!(info.permission, RW);
        assert_eq!(pt.translate(va(0x2004)), Some(PhysicalAddress::new(0x8000_1004)));
    }

    #[test]
    fn backing_lives_as_long_as_the_mapping() {
        let object = Arc::new(0x5eed_u32);
        let mut pt = table();
        pt.map_pages_backed(
            va(0x1000),
            &pages(0x8000_0000, 1),
            MemoryState::Shared,
            RW,
            Some(Backing::new(Arc::clone(&object))),
        )
        .unwrap();
        assert_eq!(Arc::strong_count(&object), 2);
        assert!(pt.backing(va(0x1000)).unwrap().is(&object));

        // A rejected map drops the handle it was given.
        let err = pt.map_pages_backed(
            va(0x1000),
            &pages(0x8100_0000, 1),
            MemoryState::Shared,
            RW,
            Some(Backing::new(Arc::clone(&object))),
        );
        assert!(matches!(err, Err(VmemError::OverlappingMapping { .. })));
        assert_eq!(Arc::strong_count(&object), 2);

        let backing = pt.take_mapping(va(0x1000), 0x1000).unwrap().unwrap();
        assert_eq!(pt.mapping_count(), 0);
        drop(backing);
        assert_eq!(Arc::strong_count(&object), 1);

        pt.map_pages_backed(
            va(0x1000),
            &pages(0x8000_0000, 1),
            MemoryState::Shared,
            RW,
            Some(Backing::new(Arc::clone(&object))),
        )
        .unwrap();
        pt.unmap_memory(va(0x1000), 0x1000).unwrap();
        assert_eq!(Arc::strong_count(&object), 1);
    }

    #[test]
    fn runs_map_in_list_order() {
        let mut list = pages(0x9000_0000, 1);
        list.add_block(PhysicalAddress::new(0x8000_0000), 1).unwrap();

        let mut pt = table();
        pt.map_pages(va(0x4000), &list, MemoryState::Private, RW)
            .unwrap();
        assert_eq!(pt.translate(va(0x4000)), Some(PhysicalAddress::new(0x9000_0000)));
        assert_eq!(pt.translate(va(0x5000)), Some(PhysicalAddress::new(0x8000_0000)));
    }

    #[test]
    fn overlap_is_rejected_without_side_effects() {
        let mut pt = table();
        pt.map_pages(va(0x3000), &pages(0x8000_0000, 2), MemoryState::Private, RW)
            .unwrap();

        for start in [0x2000, 0x3000, 0x4000] {
            let err = pt
                .map_pages(va(start), &pages(0x8100_0000, 2), MemoryState::Shared, RW)
                .unwrap_err();
            assert_eq!(
                err,
                VmemError::OverlappingMapping {
                    address: va(start),
                    size: 0x2000,
                    existing: va(0x3000)
                }
            );
        }
        assert_eq!(pt.mapping_count(), 1);

        // Adjacent on both sides is fine.
        pt.map_pages(va(0x1000), &pages(0x8100_0000, 2), MemoryState::Shared, RW)
            .unwrap();
        pt.map_pages(va(0x5000), &pages(0x8200_0000, 1), MemoryState::Shared, RW)
            .unwrap();
        assert_eq!(pt.mapping_count(), 3);
    }

    #[test]
    fn map_validates_arguments() {
        let mut pt = table();
        let list = pages(0x8000_0000, 1);
        assert_eq!(
            pt.map_pages(va(0x1800), &list, MemoryState::Shared, RW),
            Err(VmemError::InvalidAddress(va(0x1800)))
        );
        assert_eq!(
            pt.map_pages(va(0x1000), &PageList::new(), MemoryState::Shared, RW),
            Err(VmemError::InvalidSize(0))
        );
        assert_eq!(
            pt.map_pages(va(0x0), &list, MemoryState::Shared, RW),
            Err(VmemError::InvalidMemoryRange {
                address: va(0),
                size: 0x1000
            })
        );
        assert_eq!(
            pt.map_pages(va(0x10_0000), &list, MemoryState::Shared, RW),
            Err(VmemError::InvalidMemoryRange {
                address: va(0x10_0000),
                size: 0x1000
            })
        );
        assert_eq!(
            pt.map_pages(va(0x1000), &list, MemoryState::Free, RW),
            Err(VmemError::InvalidState(MemoryState::Free))
        );
        assert_eq!(pt.mapping_count(), 0);
    }

    #[test]
    fn unmap_requires_exact_span() {
        let mut pt = table();
        pt.map_pages(va(0x1000), &pages(0x8000_0000, 2), MemoryState::Shared, RW)
            .unwrap();

        assert_eq!(
            pt.unmap_memory(va(0x1000), 0x1000),
            Err(VmemError::InvalidSize(0x1000))
        );
        assert_eq!(
            pt.unmap_memory(va(0x2000), 0x1000),
            Err(VmemError::InvalidAddress(va(0x2000)))
        );
        assert_eq!(
            pt.unmap_memory(va(0x8000), 0x2000),
            Err(VmemError::UnmappedRegion(va(0x8000)))
        );
        assert_eq!(pt.mapping_count(), 1);

        pt.unmap_memory(va(0x1000), 0x2000).unwrap();
        assert_eq!(pt.mapping_count(), 0);
        assert_eq!(pt.translate(va(0x1000)), None);
    }

    #[test]
    fn unmap_restores_free_boundaries() {
        let mut pt = table();
        pt.map_pages(va(0x1000), &pages(0x8000_0000, 1), MemoryState::Private, RW)
            .unwrap();
        pt.map_pages(va(0x8000), &pages(0x8001_0000, 1), MemoryState::Private, RW)
            .unwrap();

        let before = pt.query(va(0x4000)).unwrap();
        assert_eq!((before.base, before.size), (va(0x2000), 0x6000));

        pt.map_pages(va(0x4000), &pages(0x8002_0000, 2), MemoryState::Shared, RW)
            .unwrap();
        let below = pt.query(va(0x2000)).unwrap();
        assert_eq!((below.base, below.size), (va(0x2000), 0x2000));

        pt.unmap_memory(va(0x4000), 0x2000).unwrap();
        assert_eq!(pt.query(va(0x4000)).unwrap(), before);
        assert_eq!(pt.query(va(0x1000)).unwrap().state, MemoryState::Private);
        assert_eq!(pt.query(va(0x8000)).unwrap().state, MemoryState::Private);
    }

    #[test]
    fn query_outside_layout_is_none() {
        let pt = table();
        assert_eq!(pt.query(va(0)), None);
        assert_eq!(pt.query(va(0x10_0000)), None);
        let all = pt.query(va(0x1000)).unwrap();
        assert_eq!((all.base, all.size), (va(0x1000), 0xF_F000));
    }

    #[test]
    fn translate_checked_enforces_permission() {
        let mut pt = table();
        pt.map_pages(
            va(0x1000),
            &pages(0x8000_0000, 1),
            MemoryState::Shared,
            MemoryPermission::READ,
        )
        .unwrap();

        assert!(pt.translate_checked(va(0x1000), MemoryPermission::READ).is_ok());
        assert_eq!(
            pt.translate_checked(va(0x1000), MemoryPermission::WRITE),
            Err(VmemError::AccessViolation {
                address: va(0x1000),
                requested: MemoryPermission::WRITE,
                granted: MemoryPermission::READ,
            })
        );
        assert_eq!(
            pt.translate_checked(va(0x3000), MemoryPermission::READ),
            Err(VmemError::UnmappedRegion(va(0x3000)))
        );
    }

    #[test]
    fn make_page_list_spans_adjacent_mappings() {
        let mut pt = table();
        pt.map_pages(va(0x1000), &pages(0x8000_0000, 2), MemoryState::Private, RW)
            .unwrap();
        pt.map_pages(va(0x3000), &pages(0x8000_2000, 1), MemoryState::Private, RW)
            .unwrap();

        let list = pt.make_page_list(va(0x2000), 2).unwrap();
        assert_eq!(list, pages(0x8000_1000, 2));

        assert_eq!(
            pt.make_page_list(va(0x3000), 2),
            Err(VmemError::UnmappedRegion(va(0x4000)))
        );
    }
}
