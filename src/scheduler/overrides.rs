use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QtrixError, Result};
use crate::namespace::{Namespace, Namespacing};
use crate::store::{Store, Txn};

/// Ordered list of queue names a pinned slot polls.
pub type QueueSet = Vec<String>;

/// A manually declared pinning of `queues` to `processes` worker slots.
///
/// Each unit of `processes` can be claimed by one host. `claims` lists the
/// claiming hosts in claim order; a host holds at most one unit of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: Uuid,
    pub queues: QueueSet,
    pub processes: u32,
    #[serde(default)]
    pub claims: Vec<String>,
    /// Bumped on every change to `processes` or `claims`.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl OverrideRecord {
    pub fn new(queues: QueueSet, processes: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            queues,
            processes,
            claims: Vec::new(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// The host holding this record, if any. With several claimants this is
    /// the earliest.
    pub fn host(&self) -> Option<&str> {
        self.claims.first().map(String::as_str)
    }

    pub fn is_claimed_by(&self, host: &str) -> bool {
        self.claims.iter().any(|h| h == host)
    }

    /// Units not yet claimed by any host.
    pub fn available(&self) -> u32 {
        self.processes.saturating_sub(self.claims.len() as u32)
    }

    fn claim(&mut self, host: &str) {
        self.claims.push(host.to_string());
        self.version += 1;
    }

    /// Remove up to `units` of capacity, releasing the latest claims that no
    /// longer fit. Returns how many units were removed.
    fn shrink(&mut self, units: u32) -> u32 {
        let taken = units.min(self.processes);
        if taken > 0 {
            self.processes -= taken;
            self.claims.truncate(self.processes as usize);
            self.version += 1;
        }
        taken
    }

    fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|source| QtrixError::Corrupt {
            key: self.id.to_string(),
            source,
        })
    }
}

/// Claim up to `count` queue sets for `host`.
///
/// Returns the host's queue sets in record order and whether any new claim
/// was recorded. Existing claims are returned first and never duplicated;
/// records are offered oldest first and each contributes at most one set.
pub(crate) fn claim_records(
    records: &mut [OverrideRecord],
    host: &str,
    count: usize,
) -> (Vec<QueueSet>, bool) {
    let held = records.iter().filter(|r| r.is_claimed_by(host)).count();
    let mut changed = false;

    if held < count {
        let mut wanted = count - held;
        for record in records.iter_mut() {
            if wanted == 0 {
                break;
            }
            if record.available() > 0 && !record.is_claimed_by(host) {
                record.claim(host);
                wanted -= 1;
                changed = true;
            }
        }
    }

    let sets = records
        .iter()
        .filter(|r| r.is_claimed_by(host))
        .take(count)
        .map(|r| r.queues.clone())
        .collect();
    (sets, changed)
}

/// Remove `units` of capacity from records whose queues equal `queues`,
/// dropping records that reach zero. Returns units removed.
///
/// Unclaimed units across all matching records go first, oldest record
/// first; claimed units are only taken once none are left, again oldest
/// record first, releasing that record's latest claims.
pub(crate) fn remove_capacity(
    records: &mut Vec<OverrideRecord>,
    queues: &[String],
    units: u32,
) -> u32 {
    let mut remaining = units;
    for record in records.iter_mut().filter(|r| r.queues == queues) {
        if remaining == 0 {
            break;
        }
        let free = record.available().min(remaining);
        remaining -= record.shrink(free);
    }
    for record in records.iter_mut().filter(|r| r.queues == queues) {
        if remaining == 0 {
            break;
        }
        remaining -= record.shrink(remaining);
    }
    records.retain(|r| r.processes > 0);
    units - remaining
}

fn validate_queues<T: AsRef<str>>(queues: &[T]) -> Result<QueueSet> {
    if queues.is_empty() {
        return Err(QtrixError::validation("an override needs at least one queue"));
    }
    let mut set: QueueSet = Vec::with_capacity(queues.len());
    for q in queues {
        let q = q.as_ref().trim();
        if q.is_empty() {
            return Err(QtrixError::validation("queue names must not be empty"));
        }
        if set.iter().any(|existing| existing == q) {
            return Err(QtrixError::validation(format!(
                "queue {:?} listed more than once",
                q
            )));
        }
        set.push(q.to_string());
    }
    Ok(set)
}

/// Namespace-scoped, claimable override records.
///
/// Every mutation runs as one store transaction that also drops the
/// namespace's cached matrix.
pub struct OverrideLedger<S> {
    store: Arc<S>,
    namespacing: Namespacing,
}

impl<S: Store> OverrideLedger<S> {
    pub fn new(store: Arc<S>, namespacing: Namespacing) -> Self {
        Self { store, namespacing }
    }

    /// Append one record pinning `queues` to `processes` slots.
    pub fn add<T: AsRef<str>>(
        &self,
        ns: impl Into<Namespace>,
        queues: &[T],
        processes: u32,
    ) -> Result<()> {
        if processes < 1 {
            return Err(QtrixError::validation(format!(
                "processes must be at least 1, got {}",
                processes
            )));
        }
        let queues = validate_queues(queues)?;
        let ns = ns.into();
        let record = OverrideRecord::new(queues, processes);
        let encoded = record.encode()?;

        let ns_key = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            txn.list_append(&self.namespacing.overrides_key(&ns_key), encoded)?;
            txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            Ok(ns_key)
        })?;

        tracing::info!(
            namespace = %ns_key,
            override_id = %record.id,
            queues = ?record.queues,
            processes,
            "Override added"
        );
        Ok(())
    }

    /// Remove up to `processes` units of capacity for `queues`.
    ///
    /// Removing more than exists is not an error. The cached matrix is
    /// dropped even if nothing matched.
    pub fn remove<T: AsRef<str>>(
        &self,
        ns: impl Into<Namespace>,
        queues: &[T],
        processes: u32,
    ) -> Result<()> {
        let queues: QueueSet = queues.iter().map(|q| q.as_ref().trim().to_string()).collect();
        let ns = ns.into();

        let (ns_key, removed) = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            let key = self.namespacing.overrides_key(&ns_key);
            let mut records = load_records(txn, &key)?;
            let removed = remove_capacity(&mut records, &queues, processes);
            if removed > 0 {
                write_records(txn, &key, &records)?;
            }
            txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            Ok((ns_key, removed))
        })?;

        tracing::info!(
            namespace = %ns_key,
            queues = ?queues,
            requested = processes,
            removed,
            "Override capacity removed"
        );
        Ok(())
    }

    /// Drop every override in the namespace, including the list key itself.
    pub fn clear(&self, ns: impl Into<Namespace>) -> Result<()> {
        let ns = ns.into();
        let ns_key = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            txn.delete(&self.namespacing.overrides_key(&ns_key))?;
            txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            Ok(ns_key)
        })?;
        tracing::info!(namespace = %ns_key, "Overrides cleared");
        Ok(())
    }

    /// Claim up to `count` overrides for `host` and return their queue sets.
    ///
    /// Calling again with the same count returns the same sets without new
    /// claims. The result never exceeds the capacity available to the host
    /// and is empty when nothing is left to claim.
    ///
    /// The cached matrix is dropped only when a new claim is recorded; a
    /// call that changes no claim leaves it in place.
    pub fn overrides_for(
        &self,
        ns: impl Into<Namespace>,
        host: &str,
        count: usize,
    ) -> Result<Vec<QueueSet>> {
        if host.is_empty() {
            return Err(QtrixError::validation("host name must not be empty"));
        }
        let ns = ns.into();

        let (ns_key, sets, changed) = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            let key = self.namespacing.overrides_key(&ns_key);
            let mut records = load_records(txn, &key)?;
            let (sets, changed) = claim_records(&mut records, host, count);
            if changed {
                write_records(txn, &key, &records)?;
                txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            }
            Ok((ns_key, sets, changed))
        })?;

        if changed {
            tracing::info!(namespace = %ns_key, host, count, claimed = sets.len(), "Overrides claimed");
        } else {
            tracing::debug!(namespace = %ns_key, host, count, held = sets.len(), "Override claims unchanged");
        }
        Ok(sets)
    }

    /// Every record in the namespace, claimed or not, oldest first.
    pub fn all(&self, ns: impl Into<Namespace>) -> Result<Vec<OverrideRecord>> {
        let ns = ns.into();
        self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            load_records(txn, &self.namespacing.overrides_key(&ns_key))
        })
    }
}

pub(crate) fn load_records(txn: &mut dyn Txn, key: &str) -> Result<Vec<OverrideRecord>> {
    txn.list_enumerate(key)?
        .iter()
        .map(|raw| {
            serde_json::from_str(raw).map_err(|source| QtrixError::Corrupt {
                key: key.to_string(),
                source,
            })
        })
        .collect()
}

fn write_records(txn: &mut dyn Txn, key: &str, records: &[OverrideRecord]) -> Result<()> {
    txn.delete(key)?;
    for record in records {
        txn.list_append(key, record.encode()?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qs(names: &[&str]) -> QueueSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_claim_bounded_by_available_capacity() {
        let mut records = vec![OverrideRecord::new(qs(&["a", "b"]), 1)];
        let (sets, changed) = claim_records(&mut records, "host1", 3);
        assert!(changed);
        assert_eq!(sets, vec![qs(&["a", "b"])]);
        assert_eq!(records[0].host(), Some("host1"));
        assert_eq!(records[0].available(), 0);
    }

    #[test]
    fn test_one_set_per_record_per_host() {
        let mut records = vec![OverrideRecord::new(qs(&["a"]), 5)];
        let (sets, _) = claim_records(&mut records, "host1", 3);
        assert_eq!(sets.len(), 1);
        assert_eq!(records[0].available(), 4);
    }

    #[test]
    fn test_claim_is_idempotent() {
        let mut records = vec![
            OverrideRecord::new(qs(&["a"]), 1),
            OverrideRecord::new(qs(&["b"]), 2),
        ];
        let (first, changed) = claim_records(&mut records, "host1", 2);
        assert!(changed);
        let snapshot = records.clone();

        let (second, changed) = claim_records(&mut records, "host1", 2);
        assert!(!changed);
        assert_eq!(first, second);
        assert_eq!(records, snapshot);
    }

    #[test]
    fn test_claims_follow_insertion_order() {
        let mut records = vec![
            OverrideRecord::new(qs(&["first"]), 1),
            OverrideRecord::new(qs(&["second"]), 1),
        ];
        let (h1, _) = claim_records(&mut records, "host1", 1);
        let (h2, _) = claim_records(&mut records, "host2", 1);
        let (h3, _) = claim_records(&mut records, "host3", 1);
        assert_eq!(h1, vec![qs(&["first"])]);
        assert_eq!(h2, vec![qs(&["second"])]);
        assert!(h3.is_empty());
    }

    #[test]
    fn test_smaller_count_returns_prefix_of_existing_claims() {
        let mut records = vec![
            OverrideRecord::new(qs(&["a"]), 1),
            OverrideRecord::new(qs(&["b"]), 1),
        ];
        claim_records(&mut records, "host1", 2);
        let (sets, changed) = claim_records(&mut records, "host1", 1);
        assert!(!changed);
        assert_eq!(sets, vec![qs(&["a"])]);
        assert!(records[1].is_claimed_by("host1"));
    }

    #[test]
    fn test_remove_consumes_oldest_first() {
        let mut records = vec![
            OverrideRecord::new(qs(&["a"]), 2),
            OverrideRecord::new(qs(&["b"]), 1),
            OverrideRecord::new(qs(&["a"]), 3),
        ];
        let removed = remove_capacity(&mut records, &qs(&["a"]), 3);
        assert_eq!(removed, 3);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].queues, qs(&["b"]));
        assert_eq!(records[1].processes, 2);
    }

    #[test]
    fn test_remove_more_than_exists() {
        let mut records = vec![OverrideRecord::new(qs(&["a"]), 2)];
        let removed = remove_capacity(&mut records, &qs(&["a"]), 100);
        assert_eq!(removed, 2);
        assert!(records.is_empty());
    }

    #[test]
    fn test_remove_releases_latest_claims() {
        let mut records = vec![OverrideRecord::new(qs(&["a"]), 3)];
        claim_records(&mut records, "h1", 1);
        claim_records(&mut records, "h2", 1);
        claim_records(&mut records, "h3", 1);

        remove_capacity(&mut records, &qs(&["a"]), 2);
        assert_eq!(records[0].processes, 1);
        assert_eq!(records[0].claims, vec!["h1".to_string()]);
    }

    #[test]
    fn test_remove_takes_unclaimed_capacity_before_claims() {
        let mut records = vec![
            OverrideRecord::new(qs(&["a"]), 1),
            OverrideRecord::new(qs(&["a"]), 1),
        ];
        claim_records(&mut records, "h1", 1);

        assert_eq!(remove_capacity(&mut records, &qs(&["a"]), 1), 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].claims, vec!["h1".to_string()]);

        assert_eq!(remove_capacity(&mut records, &qs(&["a"]), 1), 1);
        assert!(records.is_empty());
    }

    #[test]
    fn test_remove_spreads_over_claimed_and_unclaimed_units() {
        let mut records = vec![
            OverrideRecord::new(qs(&["a"]), 2),
            OverrideRecord::new(qs(&["a"]), 2),
        ];
        claim_records(&mut records, "h1", 1);
        claim_records(&mut records, "h2", 1);
        // h1 and h2 both sit on the oldest record
        assert_eq!(records[0].claims.len(), 2);

        assert_eq!(remove_capacity(&mut records, &qs(&["a"]), 3), 3);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].processes, 1);
        assert_eq!(records[0].claims, vec!["h1".to_string()]);
    }

    #[test]
    fn test_remove_matches_queue_order() {
        let mut records = vec![OverrideRecord::new(qs(&["a", "b"]), 1)];
        assert_eq!(remove_capacity(&mut records, &qs(&["b", "a"]), 1), 0);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_validate_queues() {
        assert!(validate_queues::<&str>(&[]).is_err());
        assert!(validate_queues(&["a", "a"]).is_err());
        assert!(validate_queues(&["a", " "]).is_err());
        assert_eq!(validate_queues(&[" a", "b "]).unwrap(), qs(&["a", "b"]));
    }
}
