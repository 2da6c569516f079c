use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QtrixError, Result};
use crate::namespace::{Namespace, Namespacing};
use crate::scheduler::host::{load_hosts, HostRecord};
use crate::scheduler::overrides::{load_records, OverrideRecord, QueueSet};
use crate::scheduler::queue::{Queue, QueueWeightSource};
use crate::store::{Store, Txn};

/// One cell of a host's row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub queue: String,
    /// Cumulative share of the host's capacity covered by this entry and
    /// every entry before it. The last entry of a row is always 1.
    pub resource_percentage: f64,
    /// Priority score; entries are ordered by it, descending.
    pub value: f64,
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:.3},{:.3})", self.queue, self.value, self.resource_percentage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub hostname: String,
    pub entries: Vec<Entry>,
}

impl Row {
    pub fn queues(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.queue.as_str()).collect()
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.hostname)?;
        for (i, entry) in self.entries.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, entry)?;
        }
        Ok(())
    }
}

/// Build one row.
///
/// Queues pinned to the host come first, in claim order, with values above
/// 1 and an even share of `pinned_sets / slots` of capacity. The remaining
/// queues follow by weight (ties by name), valued at their weight share and
/// splitting the rest of the capacity by weight.
pub fn build_row(host: &HostRecord, pinned_sets: &[QueueSet], queues: &[Queue]) -> Row {
    let mut pinned: Vec<&str> = Vec::new();
    for queue in pinned_sets.iter().flatten() {
        if !pinned.contains(&queue.as_str()) {
            pinned.push(queue);
        }
    }

    let mut weighted: Vec<&Queue> = queues
        .iter()
        .filter(|q| !pinned.contains(&q.name.as_str()))
        .collect();
    weighted.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));

    let slots = f64::from(host.slots.max(1));
    let pinned_share = (pinned_sets.len() as f64 / slots).min(1.0);
    // Static sources can carry weights whose sum does not fit a u64
    let total_weight: u128 = weighted.iter().map(|q| u128::from(q.weight)).sum();

    let mut cells: Vec<(String, f64, f64)> = Vec::with_capacity(pinned.len() + weighted.len());
    let pinned_count = pinned.len();
    for (i, queue) in pinned.into_iter().enumerate() {
        let value = 1.0 + (pinned_count - i) as f64;
        cells.push((queue.to_string(), value, pinned_share / pinned_count as f64));
    }
    for queue in weighted {
        let fraction = if total_weight == 0 {
            0.0
        } else {
            queue.weight as f64 / total_weight as f64
        };
        cells.push((queue.name.clone(), fraction, (1.0 - pinned_share) * fraction));
    }

    Row {
        hostname: host.hostname.clone(),
        entries: cumulate(cells),
    }
}

/// Turn `(queue, value, share)` cells into entries whose cumulative
/// percentage ends at exactly 1.
fn cumulate(cells: Vec<(String, f64, f64)>) -> Vec<Entry> {
    if cells.is_empty() {
        return Vec::new();
    }
    let total: f64 = cells.iter().map(|(_, _, share)| share).sum();
    let even = 1.0 / cells.len() as f64;
    let last = cells.len() - 1;

    let mut running = 0.0;
    cells
        .into_iter()
        .enumerate()
        .map(|(i, (queue, value, share))| {
            running += if total > 0.0 { share / total } else { even };
            Entry {
                queue,
                resource_percentage: if i == last { 1.0 } else { running.min(1.0) },
                value,
            }
        })
        .collect()
}

/// Queue sets each host holds through claimed overrides, in record order.
fn pinned_by_host(records: &[OverrideRecord], host: &str) -> Vec<QueueSet> {
    records
        .iter()
        .filter(|r| r.is_claimed_by(host))
        .map(|r| r.queues.clone())
        .collect()
}

/// Build the full table from the ledger and the weight source.
pub fn build_table(
    hosts: &[HostRecord],
    records: &[OverrideRecord],
    queues: &[Queue],
) -> Vec<Row> {
    hosts
        .iter()
        .map(|host| {
            let mut pinned = pinned_by_host(records, &host.hostname);
            pinned.truncate(host.slots as usize);
            build_row(host, &pinned, queues)
        })
        .filter(|row| !row.entries.is_empty())
        .collect()
}

/// Serves each namespace's table, building and caching it on a miss.
///
/// The cached table is only ever dropped (by the ledger, the host registry
/// or a weight update), never patched.
pub struct MatrixBuilder<S, W> {
    store: Arc<S>,
    weights: Arc<W>,
    namespacing: Namespacing,
}

impl<S: Store, W: QueueWeightSource> MatrixBuilder<S, W> {
    pub fn new(store: Arc<S>, weights: Arc<W>, namespacing: Namespacing) -> Self {
        Self {
            store,
            weights,
            namespacing,
        }
    }

    pub fn to_table(&self, ns: impl Into<Namespace>) -> Result<Vec<Row>> {
        let ns = ns.into();
        self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            self.table_in(txn, &ns_key)
        })
    }

    pub fn row_for(&self, ns: impl Into<Namespace>, hostname: &str) -> Result<Option<Row>> {
        Ok(self
            .to_table(ns)?
            .into_iter()
            .find(|row| row.hostname == hostname))
    }

    /// Whether a built table is currently cached for the namespace.
    pub fn is_cached(&self, ns: impl Into<Namespace>) -> Result<bool> {
        let ns = ns.into();
        self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            txn.exists(&self.namespacing.matrix_key(&ns_key))
        })
    }

    fn table_in(&self, txn: &mut dyn Txn, ns_key: &str) -> Result<Vec<Row>> {
        let key = self.namespacing.matrix_key(ns_key);
        if let Some(raw) = txn.get_scalar(&key)? {
            tracing::debug!(namespace = %ns_key, "Matrix cache hit");
            return serde_json::from_str(&raw).map_err(|source| QtrixError::Corrupt { key, source });
        }

        let hosts = load_hosts(txn, &self.namespacing.hosts_key(ns_key))?;
        let records = load_records(txn, &self.namespacing.overrides_key(ns_key))?;
        let queues = self.weights.queues(txn, ns_key)?;
        let table = build_table(&hosts, &records, &queues);

        let encoded = serde_json::to_string(&table).map_err(|source| QtrixError::Corrupt {
            key: key.clone(),
            source,
        })?;
        txn.set_scalar(&key, encoded)?;

        tracing::debug!(
            namespace = %ns_key,
            rows = table.len(),
            hosts = hosts.len(),
            overrides = records.len(),
            queues = queues.len(),
            "Matrix rebuilt"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, slots: u32) -> HostRecord {
        HostRecord {
            hostname: name.to_string(),
            slots,
        }
    }

    fn qs(names: &[&str]) -> QueueSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_weighted_row_is_cumulative() {
        let queues = vec![Queue::new("low", 1), Queue::new("high", 3)];
        let row = build_row(&host("h", 2), &[], &queues);

        assert_eq!(row.queues(), vec!["high", "low"]);
        assert_close(row.entries[0].resource_percentage, 0.75);
        assert_close(row.entries[1].resource_percentage, 1.0);
        assert_close(row.entries[0].value, 0.75);
        assert_close(row.entries[1].value, 0.25);
    }

    #[test]
    fn test_ties_are_broken_by_name() {
        let queues = vec![Queue::new("b", 1), Queue::new("a", 1)];
        let row = build_row(&host("h", 1), &[], &queues);
        assert_eq!(row.queues(), vec!["a", "b"]);
    }

    #[test]
    fn test_pinned_queues_lead_and_dominate() {
        let queues = vec![Queue::new("a", 1), Queue::new("b", 1), Queue::new("c", 2)];
        let row = build_row(&host("h", 4), &[qs(&["b", "x"])], &queues);

        assert_eq!(row.queues(), vec!["b", "x", "c", "a"]);
        let max_weighted = row.entries[2..]
            .iter()
            .map(|e| e.value)
            .fold(f64::MIN, f64::max);
        assert!(row.entries[..2].iter().all(|e| e.value > max_weighted));
        assert!(row.entries[0].value > row.entries[1].value);

        // One of four slots pinned, split across two queues
        assert_close(row.entries[0].resource_percentage, 0.125);
        assert_close(row.entries[1].resource_percentage, 0.25);
        assert_close(row.entries[2].resource_percentage, 0.75);
        assert_close(row.entries[3].resource_percentage, 1.0);
    }

    #[test]
    fn test_fully_pinned_host_still_ends_at_one() {
        let queues = vec![Queue::new("a", 1)];
        let row = build_row(&host("h", 1), &[qs(&["p"])], &queues);
        assert_eq!(row.queues(), vec!["p", "a"]);
        assert_close(row.entries[0].resource_percentage, 1.0);
        assert_close(row.entries[1].resource_percentage, 1.0);
    }

    #[test]
    fn test_values_are_descending() {
        let queues = vec![Queue::new("a", 5), Queue::new("b", 2), Queue::new("c", 9)];
        let row = build_row(&host("h", 3), &[qs(&["z"]), qs(&["y", "z"])], &queues);
        assert!(row.entries.windows(2).all(|w| w[0].value >= w[1].value));
        assert!(row
            .entries
            .windows(2)
            .all(|w| w[0].resource_percentage <= w[1].resource_percentage));
    }

    #[test]
    fn test_empty_inputs_yield_empty_table() {
        let queues = vec![Queue::new("a", 1)];
        assert!(build_table(&[], &[], &queues).is_empty());
        assert!(build_table(&[host("h", 1)], &[], &[]).is_empty());
    }

    #[test]
    fn test_table_pins_only_claimed_records() {
        let mut claimed = OverrideRecord::new(qs(&["p"]), 1);
        claimed.claims.push("h1".to_string());
        let unclaimed = OverrideRecord::new(qs(&["u"]), 1);

        let table = build_table(
            &[host("h1", 2), host("h2", 2)],
            &[claimed, unclaimed],
            &[Queue::new("a", 1)],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].queues(), vec!["p", "a"]);
        assert_eq!(table[1].queues(), vec!["a"]);
    }

    #[test]
    fn test_huge_weights_do_not_overflow() {
        let queues = vec![Queue::new("a", u64::MAX), Queue::new("b", u64::MAX)];
        let row = build_row(&host("h", 1), &[], &queues);
        assert_eq!(row.queues(), vec!["a", "b"]);
        assert_close(row.entries[0].value, 0.5);
        assert_close(row.entries[0].resource_percentage, 0.5);
        assert_close(row.entries[1].resource_percentage, 1.0);
    }

    #[test]
    fn test_huge_weights_keep_store_usable() {
        use crate::scheduler::host::HostRegistry;
        use crate::scheduler::overrides::OverrideLedger;
        use crate::scheduler::queue::StaticWeights;
        use crate::store::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let namespacing = Namespacing::default();
        let weights = Arc::new(StaticWeights::new(vec![
            Queue::new("a", u64::MAX),
            Queue::new("b", 1),
        ]));
        let builder = MatrixBuilder::new(store.clone(), weights, namespacing.clone());
        HostRegistry::new(store.clone(), namespacing.clone())
            .register("default", "h1", 1)
            .unwrap();

        let table = builder.to_table("default").unwrap();
        assert_eq!(table[0].queues(), vec!["a", "b"]);
        assert!(table[0].entries[0].value > table[0].entries[1].value);
        assert!(table[0].entries[1].value > 0.0);

        let ledger = OverrideLedger::new(store, namespacing);
        ledger.add("default", &["c"], 1).unwrap();
        assert_eq!(ledger.all("default").unwrap().len(), 1);
    }

    #[test]
    fn test_row_display() {
        let row = build_row(&host("h", 1), &[], &[Queue::new("a", 1)]);
        assert_eq!(row.to_string(), "h: a(1.000,1.000)");
    }
}
