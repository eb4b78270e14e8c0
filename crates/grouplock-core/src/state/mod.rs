// # Lock Store Implementations
//
// This module provides implementations of the LockStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileLockStore, FileLockStoreFactory};
pub use memory::{MemoryLockStore, MemoryLockStoreFactory};
