//! # Kernel synchronization primitives
//!
//! The emulated kernel runs guest threads on several host workers at once.
//! Mutation of per-process memory state is serialized through [`SpinLock`];
//! critical sections are short, in-memory state transitions that never block.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
