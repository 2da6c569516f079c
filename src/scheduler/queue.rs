use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QtrixError, Result};
use crate::namespace::{Namespace, Namespacing};
use crate::store::{Store, Txn};

/// A queue and its weight relative to the other queues of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub weight: u64,
}

impl Queue {
    pub fn new(name: impl Into<String>, weight: u64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Supplies the known queues of a namespace and their weights.
///
/// Called from inside the matrix build transaction so a source backed by
/// the shared store reads a state consistent with the override ledger.
pub trait QueueWeightSource: Send + Sync {
    fn queues(&self, txn: &mut dyn Txn, ns_key: &str) -> Result<Vec<Queue>>;
}

/// The same fixed queues for every namespace.
#[derive(Debug, Clone, Default)]
pub struct StaticWeights {
    queues: Vec<Queue>,
}

impl StaticWeights {
    pub fn new(queues: Vec<Queue>) -> Self {
        Self { queues }
    }
}

impl QueueWeightSource for StaticWeights {
    fn queues(&self, _txn: &mut dyn Txn, _ns_key: &str) -> Result<Vec<Queue>> {
        Ok(self.queues.clone())
    }
}

/// Queue weights kept in the shared store, one map per namespace.
pub struct StoredWeights<S> {
    store: Arc<S>,
    namespacing: Namespacing,
}

impl<S: Store> StoredWeights<S> {
    pub fn new(store: Arc<S>, namespacing: Namespacing) -> Self {
        Self { store, namespacing }
    }

    /// Replace the namespace's queue weights and drop its cached matrix.
    pub fn map_queue_weights(
        &self,
        ns: impl Into<Namespace>,
        weights: &BTreeMap<String, u64>,
    ) -> Result<()> {
        if let Some((name, _)) = weights.iter().find(|(_, w)| **w == 0) {
            return Err(QtrixError::validation(format!(
                "queue {:?} needs a weight of at least 1",
                name
            )));
        }
        if weights.keys().any(|name| name.trim().is_empty()) {
            return Err(QtrixError::validation("queue names must not be empty"));
        }
        if weights
            .values()
            .try_fold(0u64, |total, w| total.checked_add(*w))
            .is_none()
        {
            return Err(QtrixError::validation("total queue weight is too large"));
        }
        let encoded = serde_json::to_string(weights).map_err(|source| QtrixError::Corrupt {
            key: "queue_weights".to_string(),
            source,
        })?;
        let ns = ns.into();

        let ns_key = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            if weights.is_empty() {
                txn.delete(&self.namespacing.weights_key(&ns_key))?;
            } else {
                txn.set_scalar(&self.namespacing.weights_key(&ns_key), encoded)?;
            }
            txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            Ok(ns_key)
        })?;

        tracing::info!(namespace = %ns_key, queues = weights.len(), "Queue weights updated");
        Ok(())
    }

    pub fn all_queues(&self, ns: impl Into<Namespace>) -> Result<Vec<Queue>> {
        let ns = ns.into();
        self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            self.queues(txn, &ns_key)
        })
    }
}

impl<S: Store> QueueWeightSource for StoredWeights<S> {
    fn queues(&self, txn: &mut dyn Txn, ns_key: &str) -> Result<Vec<Queue>> {
        let key = self.namespacing.weights_key(ns_key);
        let Some(raw) = txn.get_scalar(&key)? else {
            return Ok(Vec::new());
        };
        let weights: BTreeMap<String, u64> =
            serde_json::from_str(&raw).map_err(|source| QtrixError::Corrupt { key, source })?;
        Ok(weights
            .into_iter()
            .map(|(name, weight)| Queue { name, weight })
            .collect())
    }
}
