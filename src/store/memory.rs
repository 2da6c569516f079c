use std::sync::Mutex;

use crate::error::{QtrixError, Result};
use crate::store::{Keyspace, Store, Txn};

/// Store held in process memory.
///
/// Transactions run against a copy of the keyspace under a mutex and the
/// copy replaces the live keyspace only when the closure succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents, for inspection.
    pub fn snapshot(&self) -> Result<Keyspace> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| QtrixError::unavailable("memory store lock poisoned"))?;
        Ok(guard.clone())
    }
}

impl Store for MemoryStore {
    fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Txn) -> Result<R>,
    {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| QtrixError::unavailable("memory store lock poisoned"))?;

        let mut working = guard.clone();
        working.mark_clean();
        let result = f(&mut working)?;
        if working.is_dirty() {
            working.mark_clean();
            *guard = working;
        }
        Ok(result)
    }
}
