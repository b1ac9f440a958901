use core::fmt;

/// Classification of a virtual range inside a page table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum MemoryState {
    /// Not mapped; available for new mappings.
    #[default]
    Free,
    /// Memory private to the owning process (heap, stacks, code).
    Private,
    /// A view of a shared memory object.
    Shared,
    /// Private memory pinned for use by the kernel or a device.
    Locked,
}

impl MemoryState {
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Private => "private",
            Self::Shared => "shared",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
