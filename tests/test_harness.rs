//! Shared fixtures for integration tests.
//!
//! Provides a coordinator over an in-memory store with two namespaces,
//! `default` (current) and `night`, both knowing the same queues.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use qtrix::scheduler::StoredWeights;
use qtrix::store::{MemoryStore, Store};
use qtrix::{Coordinator, Namespacing};

pub type TestCoordinator = Coordinator<MemoryStore, StoredWeights<MemoryStore>>;

pub const QUEUES: [&str; 3] = ["a", "b", "c"];

/// Coordinator over a fresh in-memory store with no namespaces populated.
pub fn empty_coordinator() -> TestCoordinator {
    let store = Arc::new(MemoryStore::new());
    let namespacing = Namespacing::default();
    let weights = Arc::new(StoredWeights::new(store.clone(), namespacing.clone()));
    Coordinator::new(store, weights, namespacing)
}

/// Coordinator with `default` as the current namespace and weights for
/// `x`, `y`, `z` in both `default` and `night`.
pub fn established_namespaces() -> TestCoordinator {
    let c = empty_coordinator();
    c.namespacing()
        .set_current(c.store().as_ref(), "default")
        .unwrap();

    let weights: BTreeMap<String, u64> = [("x", 30), ("y", 20), ("z", 10)]
        .iter()
        .map(|(n, w)| (n.to_string(), *w))
        .collect();
    c.weights().map_queue_weights("default", &weights).unwrap();
    c.weights().map_queue_weights("night", &weights).unwrap();
    c
}

/// Raw length of a namespace's override list, read straight from the store.
pub fn raw_override_count(c: &TestCoordinator, ns: &str) -> usize {
    c.store()
        .list_length(&c.namespacing().overrides_key(ns))
        .unwrap()
}

pub fn queues() -> Vec<String> {
    QUEUES.iter().map(|q| q.to_string()).collect()
}
