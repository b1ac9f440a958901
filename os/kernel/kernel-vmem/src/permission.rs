use bitfield_struct::bitfield;
use core::fmt;

/// Access rights of a mapped range, in the guest kernel's raw encoding.
///
/// ### Bit layout
///
/// | Bits   | Name        | Meaning |
/// |--------|-------------|---------|
/// | 0      | `read`      | Range may be read |
/// | 1      | `write`     | Range may be written |
/// | 2      | `execute`   | Range may be executed |
/// | 3–27   | reserved    | Must be zero |
/// | 28     | `dont_care` | Remote side of a shared memory accepts any permission |
/// | 29–31  | reserved    | Must be zero |
///
/// Comparisons are exact: [`MemoryPermission::READ_WRITE`] is **not** equal to
/// [`MemoryPermission::READ`], even though it grants a superset. Use
/// [`allows`](MemoryPermission::allows) for subset checks.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::MemoryPermission;
/// let rw = MemoryPermission::READ_WRITE;
/// assert!(rw.allows(MemoryPermission::READ));
/// assert_ne!(rw, MemoryPermission::READ);
/// assert_eq!(MemoryPermission::from_raw(0b011), Some(rw));
/// assert_eq!(MemoryPermission::from_raw(0b1000), None);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct MemoryPermission {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    #[bits(25)]
    __: u32,
    pub dont_care: bool,
    #[bits(3)]
    __: u8,
}

impl MemoryPermission {
    pub const NONE: Self = Self::new();
    pub const READ: Self = Self::new().with_read(true);
    pub const WRITE: Self = Self::new().with_write(true);
    pub const EXECUTE: Self = Self::new().with_execute(true);
    pub const READ_WRITE: Self = Self::READ.with_write(true);
    pub const READ_EXECUTE: Self = Self::READ.with_execute(true);
    pub const READ_WRITE_EXECUTE: Self = Self::READ_WRITE.with_execute(true);
    pub const DONT_CARE: Self = Self::new().with_dont_care(true);

    const DEFINED_BITS: u32 = Self::READ_WRITE_EXECUTE.into_bits() | Self::DONT_CARE.into_bits();

    /// Decode a raw guest value, rejecting reserved bits.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw & !Self::DEFINED_BITS == 0 {
            Some(Self::from_bits(raw))
        } else {
            None
        }
    }

    /// Whether every right in `other` is also granted by `self`.
    #[must_use]
    pub const fn allows(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }
}

impl fmt::Display for MemoryPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dont_care() {
            return f.write_str("dont-care");
        }
        let r = if self.read() { 'r' } else { '-' };
        let w = if self.write() { 'w' } else { '-' };
        let x = if self.execute() { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}
