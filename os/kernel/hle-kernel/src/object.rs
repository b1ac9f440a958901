//! Kernel object model.
//!
//! Every kernel resource lives behind an [`Arc`]: cloning a handle adds a
//! reference, dropping it releases one, and the resource is destroyed when the
//! last reference goes away. Resources embed a [`KObjectBase`] and are only
//! constructed by factory functions returning `Arc<T>`, so no reference
//! escapes before construction is complete.

use crate::KernelCore;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Kind of object a guest handle refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleType {
    Process,
    SharedMemory,
}

/// Common interface of all kernel objects.
pub trait KernelObject: Send + Sync {
    fn base(&self) -> &KObjectBase;

    /// Short type name for diagnostics.
    fn type_name(&self) -> &'static str;

    fn handle_type(&self) -> HandleType;

    /// Unique id, never reused within a kernel instance.
    fn object_id(&self) -> u64 {
        self.base().id()
    }

    fn name(&self) -> &str {
        self.base().name()
    }
}

/// State shared by every kernel object.
///
/// Holds a token in the kernel's live-object count that is returned when the
/// object is destroyed.
pub struct KObjectBase {
    id: u64,
    name: String,
    kernel: Weak<KernelCore>,
    live: Arc<AtomicUsize>,
}

impl KObjectBase {
    pub(crate) fn new(kernel: &Arc<KernelCore>, name: &str) -> Self {
        let live = kernel.live_counter();
        live.fetch_add(1, Ordering::AcqRel);
        Self {
            id: kernel.next_object_id(),
            name: String::from(name),
            kernel: Arc::downgrade(kernel),
            live,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kernel that created this object, if it is still running.
    #[must_use]
    pub fn kernel(&self) -> Option<Arc<KernelCore>> {
        self.kernel.upgrade()
    }
}

impl Drop for KObjectBase {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for KObjectBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KObjectBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Implement [`KernelObject`] for a type with a `base: KObjectBase` field.
macro_rules! impl_kernel_object {
    ($class:ident, $handle:ident) => {
        impl $crate::object::KernelObject for $class {
            fn base(&self) -> &$crate::object::KObjectBase {
                &self.base
            }

            fn type_name(&self) -> &'static str {
                stringify!($class)
            }

            fn handle_type(&self) -> $crate::object::HandleType {
                $crate::object::HandleType::$handle
            }
        }
    };
}

pub(crate) use impl_kernel_object;
