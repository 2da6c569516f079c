use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{QtrixError, Result};

pub const DEFAULT_KEY_PREFIX: &str = "qtrix";
pub const DEFAULT_STORE_PATH: &str = "qtrix-store.json";

/// Settings for the read-only HTTP dashboard.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub listen_addr: SocketAddr,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QtrixConfig {
    /// Prefix of every key written to the shared store.
    ///
    /// Two fleets sharing one store must use different prefixes; all
    /// namespaces of one fleet live under the same prefix.
    pub key_prefix: String,
    /// Location of the file-backed store snapshot. Every host that should
    /// coordinate must see the same path.
    pub store_path: PathBuf,
    pub dashboard: DashboardConfig,
}

impl Default for QtrixConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl QtrixConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_dashboard_addr(mut self, addr: SocketAddr) -> Self {
        self.dashboard.listen_addr = addr;
        self
    }

    /// Reject settings that would produce ambiguous store keys.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(QtrixError::Config("key prefix must not be empty".into()));
        }
        if self.key_prefix.contains(':') {
            return Err(QtrixError::Config(format!(
                "key prefix {:?} must not contain ':'",
                self.key_prefix
            )));
        }
        Ok(())
    }
}
