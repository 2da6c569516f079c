use std::fmt;

use crate::config::QtrixConfig;
use crate::error::{QtrixError, Result};
use crate::store::{Store, Txn};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const CURRENT: &str = "current";

/// Which namespace an operation targets.
///
/// Namespaces need no registration: any name becomes a namespace the first
/// time something is written under it. There is no way to list them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
    /// Whatever namespace is active right now.
    #[default]
    Current,
    Named(String),
}

impl Namespace {
    pub fn named(name: impl Into<String>) -> Self {
        Namespace::Named(name.into())
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        if name == CURRENT {
            Namespace::Current
        } else {
            Namespace::Named(name.to_string())
        }
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Namespace::from(name.as_str())
    }
}

impl From<&Namespace> for Namespace {
    fn from(ns: &Namespace) -> Self {
        ns.clone()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Current => write!(f, "{}", CURRENT),
            Namespace::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Maps namespaces to store keys.
///
/// Holds only the key prefix; which namespace is current lives in the store.
#[derive(Debug, Clone)]
pub struct Namespacing {
    prefix: String,
}

impl Default for Namespacing {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KEY_PREFIX)
    }
}

impl Namespacing {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &QtrixConfig) -> Self {
        Self::new(config.key_prefix.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn current_key(&self) -> String {
        format!("{}:current_namespace", self.prefix)
    }

    /// Key under which `suffix` lives for the resolved namespace `ns_key`.
    pub fn key(&self, ns_key: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, ns_key, suffix)
    }

    pub fn overrides_key(&self, ns_key: &str) -> String {
        self.key(ns_key, "overrides")
    }

    pub fn matrix_key(&self, ns_key: &str) -> String {
        self.key(ns_key, "matrix")
    }

    pub fn hosts_key(&self, ns_key: &str) -> String {
        self.key(ns_key, "hosts")
    }

    pub fn weights_key(&self, ns_key: &str) -> String {
        self.key(ns_key, "queue_weights")
    }

    /// Resolve inside a transaction so the answer is consistent with the
    /// rest of the transaction's reads.
    pub fn resolve(&self, txn: &mut dyn Txn, ns: &Namespace) -> Result<String> {
        match ns {
            Namespace::Named(name) => Ok(name.clone()),
            Namespace::Current => Ok(txn
                .get_scalar(&self.current_key())?
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())),
        }
    }

    /// Pin `ns` to a concrete name, so a multi-step operation keeps
    /// targeting one namespace even if the current one changes midway.
    pub fn pin<S: Store>(&self, store: &S, ns: &Namespace) -> Result<Namespace> {
        match ns {
            Namespace::Named(_) => Ok(ns.clone()),
            Namespace::Current => store
                .transaction(|txn| self.resolve(txn, ns))
                .map(Namespace::Named),
        }
    }

    pub fn current<S: Store>(&self, store: &S) -> Result<String> {
        store.transaction(|txn| self.resolve(txn, &Namespace::Current))
    }

    /// Make `name` the namespace that `current` resolves to.
    pub fn set_current<S: Store>(&self, store: &S, name: &str) -> Result<()> {
        if name.is_empty() || name == CURRENT || name.contains(':') {
            return Err(QtrixError::validation(format!(
                "invalid namespace name {:?}",
                name
            )));
        }
        store.transaction(|txn| txn.set_scalar(&self.current_key(), name.to_string()))?;
        tracing::info!(namespace = %name, "Current namespace changed");
        Ok(())
    }
}
