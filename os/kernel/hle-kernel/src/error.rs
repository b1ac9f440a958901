//! Kernel error taxonomy and the guest-visible result codes it maps to.

use bitfield_struct::bitfield;
use kernel_alloc::AllocError;
use kernel_info::ConfigError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{MemoryPermission, MemoryState, VmemError};

/// Guest result word: `module | description << 9`.
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct ResultCode {
    #[bits(9)]
    pub module: u16,
    #[bits(13)]
    pub description: u16,
    #[bits(10)]
    __: u16,
}

impl ResultCode {
    pub const SUCCESS: Self = Self::new();
    /// Catch-all for emulator-internal failures.
    pub const UNKNOWN: Self = Self::from_bits(u32::MAX);

    /// Module number of the guest kernel.
    pub const KERNEL_MODULE: u16 = 1;

    pub const INVALID_SIZE: Self = Self::kernel(101);
    pub const INVALID_ADDRESS: Self = Self::kernel(102);
    pub const OUT_OF_MEMORY: Self = Self::kernel(104);
    pub const INVALID_STATE: Self = Self::kernel(106);
    pub const INVALID_MEMORY_PERMISSIONS: Self = Self::kernel(108);
    pub const INVALID_MEMORY_RANGE: Self = Self::kernel(110);

    const fn kernel(description: u16) -> Self {
        Self::new()
            .with_module(Self::KERNEL_MODULE)
            .with_description(description)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.into_bits() == 0
    }
}

/// Everything a kernel memory operation can fail with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("shared memory spans {expected_pages} page(s), {requested_pages} requested")]
    SizeMismatch {
        expected_pages: u64,
        requested_pages: u64,
    },
    #[error("permission {requested} does not match the expected {expected}")]
    PermissionMismatch {
        expected: MemoryPermission,
        requested: MemoryPermission,
    },
    #[error("invalid size {0:#x}")]
    InvalidSize(u64),
    #[error("invalid address {0}")]
    InvalidAddress(VirtualAddress),
    #[error("range {address} + {size:#x} is outside the address space")]
    InvalidMemoryRange { address: VirtualAddress, size: u64 },
    #[error("invalid memory permission {0}")]
    InvalidMemoryPermissions(MemoryPermission),
    #[error("range {address} + {size:#x} overlaps an existing mapping")]
    OverlappingMapping { address: VirtualAddress, size: u64 },
    #[error("nothing is mapped at {0}")]
    UnmappedRegion(VirtualAddress),
    #[error("memory state '{0}' is not valid here")]
    InvalidState(MemoryState),
    #[error("{len:#x} byte(s) at offset {offset:#x} exceed the object size {size:#x}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error("kernel invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl KernelError {
    /// The result code a guest observes for this error.
    #[must_use]
    pub const fn result_code(&self) -> ResultCode {
        match self {
            Self::SizeMismatch { .. } | Self::InvalidSize(_) | Self::OutOfBounds { .. } => {
                ResultCode::INVALID_SIZE
            }
            Self::PermissionMismatch { .. } | Self::InvalidMemoryPermissions(_) => {
                ResultCode::INVALID_MEMORY_PERMISSIONS
            }
            Self::InvalidAddress(_) => ResultCode::INVALID_ADDRESS,
            Self::InvalidMemoryRange { .. } => ResultCode::INVALID_MEMORY_RANGE,
            Self::OverlappingMapping { .. } | Self::UnmappedRegion(_) | Self::InvalidState(_) => {
                ResultCode::INVALID_STATE
            }
            Self::OutOfMemory => ResultCode::OUT_OF_MEMORY,
            Self::InvalidConfig(_) | Self::InvariantViolation(_) => ResultCode::UNKNOWN,
        }
    }
}

impl From<KernelError> for ResultCode {
    fn from(value: KernelError) -> Self {
        value.result_code()
    }
}

impl From<VmemError> for KernelError {
    fn from(value: VmemError) -> Self {
        match value {
            VmemError::InvalidAddress(address) => Self::InvalidAddress(address),
            VmemError::InvalidSize(size) => Self::InvalidSize(size),
            VmemError::InvalidMemoryRange { address, size } => {
                Self::InvalidMemoryRange { address, size }
            }
            VmemError::OverlappingMapping { address, size, .. } => {
                Self::OverlappingMapping { address, size }
            }
            VmemError::UnmappedRegion(address) => Self::UnmappedRegion(address),
            VmemError::InvalidState(state) => Self::InvalidState(state),
            VmemError::AccessViolation { requested, .. } => {
                Self::InvalidMemoryPermissions(requested)
            }
            VmemError::InvalidPhysicalAddress(_) => {
                Self::InvariantViolation("page list holds an invalid physical address")
            }
        }
    }
}

impl From<AllocError> for KernelError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory { .. } => Self::OutOfMemory,
            AllocError::InvalidSize(size) => Self::InvalidSize(size),
            AllocError::OutOfRange { .. } => {
                Self::InvariantViolation("physical range outside device memory")
            }
            AllocError::NotAllocated(_) => Self::InvariantViolation("page freed twice"),
        }
    }
}
