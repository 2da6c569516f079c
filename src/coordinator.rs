use std::sync::Arc;

use crate::config::QtrixConfig;
use crate::error::{QtrixError, Result};
use crate::namespace::{Namespace, Namespacing};
use crate::scheduler::{HostRegistry, MatrixBuilder, OverrideLedger, QueueSet, QueueWeightSource};
use crate::store::Store;

/// Ties the ledger, host registry and matrix together over one store.
pub struct Coordinator<S, W> {
    pub overrides: OverrideLedger<S>,
    pub hosts: HostRegistry<S>,
    pub matrix: MatrixBuilder<S, W>,
    store: Arc<S>,
    weights: Arc<W>,
    namespacing: Namespacing,
}

impl<S: Store, W: QueueWeightSource> Coordinator<S, W> {
    pub fn new(store: Arc<S>, weights: Arc<W>, namespacing: Namespacing) -> Self {
        Self {
            overrides: OverrideLedger::new(store.clone(), namespacing.clone()),
            hosts: HostRegistry::new(store.clone(), namespacing.clone()),
            matrix: MatrixBuilder::new(store.clone(), weights.clone(), namespacing.clone()),
            store,
            weights,
            namespacing,
        }
    }

    pub fn from_config(store: Arc<S>, weights: Arc<W>, config: &QtrixConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(store, weights, Namespacing::from_config(config)))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn weights(&self) -> &Arc<W> {
        &self.weights
    }

    pub fn namespacing(&self) -> &Namespacing {
        &self.namespacing
    }

    /// Queue lists for each of `slots` worker slots on `host`.
    ///
    /// Registers the host, claims up to `slots` overrides, then hands out
    /// one list per slot: the claimed queue sets first, and for every other
    /// slot the host's row without the pinned queues (or the whole row when
    /// every queue is pinned).
    pub fn fetch_queues(
        &self,
        ns: impl Into<Namespace>,
        host: &str,
        slots: u32,
    ) -> Result<Vec<Vec<String>>> {
        if slots < 1 {
            return Err(QtrixError::validation("a host needs at least 1 slot"));
        }
        let ns = self.namespacing.pin(self.store.as_ref(), &ns.into())?;

        self.hosts.register(&ns, host, slots)?;
        let pinned: Vec<QueueSet> = self.overrides.overrides_for(&ns, host, slots as usize)?;
        let row_queues: Vec<String> = self
            .matrix
            .row_for(&ns, host)?
            .map(|row| row.entries.into_iter().map(|e| e.queue).collect())
            .unwrap_or_default();

        let unpinned: Vec<String> = row_queues
            .iter()
            .filter(|q| !pinned.iter().any(|set| set.contains(*q)))
            .cloned()
            .collect();
        let fallback = if unpinned.is_empty() {
            row_queues
        } else {
            unpinned
        };

        let pinned_count = pinned.len();
        let mut lists = pinned;
        while lists.len() < slots as usize {
            lists.push(fallback.clone());
        }

        tracing::info!(
            namespace = %ns,
            host,
            slots,
            pinned = pinned_count,
            "Queues fetched"
        );
        Ok(lists)
    }
}
