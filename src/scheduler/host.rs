use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QtrixError, Result};
use crate::namespace::{Namespace, Namespacing};
use crate::store::{Store, Txn};

/// A host known to a namespace and how many worker slots it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    pub slots: u32,
}

/// Hosts that have asked for queues in a namespace. Each one gets a row in
/// the namespace's matrix.
pub struct HostRegistry<S> {
    store: Arc<S>,
    namespacing: Namespacing,
}

impl<S: Store> HostRegistry<S> {
    pub fn new(store: Arc<S>, namespacing: Namespacing) -> Self {
        Self { store, namespacing }
    }

    /// Record `hostname` with `slots` worker slots. The cached matrix is
    /// dropped only when this changes what is recorded.
    pub fn register(&self, ns: impl Into<Namespace>, hostname: &str, slots: u32) -> Result<()> {
        if hostname.is_empty() {
            return Err(QtrixError::validation("host name must not be empty"));
        }
        if slots < 1 {
            return Err(QtrixError::validation(format!(
                "host {} needs at least 1 slot, got {}",
                hostname, slots
            )));
        }
        let ns = ns.into();
        let record = HostRecord {
            hostname: hostname.to_string(),
            slots,
        };

        let (ns_key, changed) = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            let key = self.namespacing.hosts_key(&ns_key);
            let raw_entries = txn.list_enumerate(&key)?;
            let mut current = None;
            for raw in &raw_entries {
                let existing = decode(&key, raw)?;
                if existing.hostname == hostname {
                    current = Some((raw.clone(), existing));
                    break;
                }
            }

            match current {
                Some((_, existing)) if existing == record => Ok((ns_key, false)),
                other => {
                    if let Some((raw, _)) = other {
                        txn.list_remove_n(&key, &raw, usize::MAX)?;
                    }
                    txn.list_append(&key, encode(&record)?)?;
                    txn.delete(&self.namespacing.matrix_key(&ns_key))?;
                    Ok((ns_key, true))
                }
            }
        })?;

        if changed {
            tracing::info!(namespace = %ns_key, host = hostname, slots, "Host registered");
        }
        Ok(())
    }

    /// Forget `hostname`. Claims it holds on overrides are kept.
    pub fn deregister(&self, ns: impl Into<Namespace>, hostname: &str) -> Result<bool> {
        let ns = ns.into();
        let (ns_key, removed) = self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            let key = self.namespacing.hosts_key(&ns_key);
            let mut removed = false;
            for raw in txn.list_enumerate(&key)? {
                if decode(&key, &raw)?.hostname == hostname {
                    txn.list_remove_n(&key, &raw, usize::MAX)?;
                    removed = true;
                }
            }
            if removed {
                txn.delete(&self.namespacing.matrix_key(&ns_key))?;
            }
            Ok((ns_key, removed))
        })?;

        if removed {
            tracing::info!(namespace = %ns_key, host = hostname, "Host deregistered");
        }
        Ok(removed)
    }

    /// Known hosts sorted by name.
    pub fn all(&self, ns: impl Into<Namespace>) -> Result<Vec<HostRecord>> {
        let ns = ns.into();
        self.store.transaction(|txn| {
            let ns_key = self.namespacing.resolve(txn, &ns)?;
            load_hosts(txn, &self.namespacing.hosts_key(&ns_key))
        })
    }
}

pub(crate) fn load_hosts(txn: &mut dyn Txn, key: &str) -> Result<Vec<HostRecord>> {
    let mut hosts = txn
        .list_enumerate(key)?
        .iter()
        .map(|raw| decode(key, raw))
        .collect::<Result<Vec<_>>>()?;
    hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Ok(hosts)
}

fn decode(key: &str, raw: &str) -> Result<HostRecord> {
    serde_json::from_str(raw).map_err(|source| QtrixError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn encode(record: &HostRecord) -> Result<String> {
    serde_json::to_string(record).map_err(|source| QtrixError::Corrupt {
        key: record.hostname.clone(),
        source,
    })
}
