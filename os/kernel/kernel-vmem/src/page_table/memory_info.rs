use crate::{MemoryPermission, MemoryState};
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Snapshot of one range as seen by a page table query.
///
/// Free ranges are reported with [`MemoryState::Free`] and
/// [`MemoryPermission::NONE`]; their bounds are the neighbouring mappings (or
/// the address space limits).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    pub base: VirtualAddress,
    pub size: u64,
    pub state: MemoryState,
    pub permission: MemoryPermission,
}

impl MemoryInfo {
    /// First address past the range.
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.base + self.size
    }

    #[must_use]
    pub fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.base && address < self.end()
    }
}

impl fmt::Display for MemoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) {} {}",
            self.base,
            self.end(),
            self.state,
            self.permission
        )
    }
}
