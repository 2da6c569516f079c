//! Shared persistent store used for all coordination.
//!
//! Every host talks to the same store; there is no other channel between
//! processes. The store offers scalars and ordered lists under string keys
//! and runs batches of operations atomically:
//!
//! - [`Txn`]: the operation set available inside a transaction
//! - [`Store`]: runs a closure as one all-or-nothing transaction
//! - [`MemoryStore`]: process-local store, used by tests and embedders
//! - [`FileStore`]: JSON snapshot shared through the filesystem, guarded by
//!   an exclusive file lock
//!
//! Missing keys behave like Redis: an absent list has length 0, deleting an
//! absent key is a no-op and a list that becomes empty stops existing.

mod file;
mod keyspace;
mod memory;

pub use file::FileStore;
pub use keyspace::Keyspace;
pub use memory::MemoryStore;

use crate::error::Result;

/// Operations available inside a transaction.
pub trait Txn {
    fn get_scalar(&mut self, key: &str) -> Result<Option<String>>;

    fn set_scalar(&mut self, key: &str, value: String) -> Result<()>;

    /// Delete a key of any type. Returns whether it existed.
    fn delete(&mut self, key: &str) -> Result<bool>;

    fn exists(&mut self, key: &str) -> Result<bool>;

    /// Append to the tail of a list, returning the new length.
    fn list_append(&mut self, key: &str, value: String) -> Result<usize>;

    fn list_length(&mut self, key: &str) -> Result<usize>;

    fn list_enumerate(&mut self, key: &str) -> Result<Vec<String>>;

    /// Remove up to `n` elements equal to `value`, head first. Returns the
    /// number removed.
    fn list_remove_n(&mut self, key: &str, value: &str, n: usize) -> Result<usize>;

    /// Keep only elements in `start..=stop`.
    fn list_trim(&mut self, key: &str, start: usize, stop: usize) -> Result<()>;
}

/// A store shared by every host in the fleet.
pub trait Store: Send + Sync {
    /// Run `f` as a single transaction.
    ///
    /// Writes made through the [`Txn`] become visible to other callers only
    /// if `f` returns `Ok`; on `Err` nothing is applied. Transactions are
    /// serialized with respect to each other.
    fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Txn) -> Result<R>;

    fn get_scalar(&self, key: &str) -> Result<Option<String>> {
        self.transaction(|txn| txn.get_scalar(key))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.transaction(|txn| txn.exists(key))
    }

    fn list_length(&self, key: &str) -> Result<usize> {
        self.transaction(|txn| txn.list_length(key))
    }

    fn list_enumerate(&self, key: &str) -> Result<Vec<String>> {
        self.transaction(|txn| txn.list_enumerate(key))
    }
}
