// src/state/log_address.rs
use log::info;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use super::{ExecOutcome, Fleet};
use crate::error::FleetError;

/// Extra destinations the servers forward their live logs to.
pub struct LogAddresses {
    addresses: RwLock<BTreeSet<String>>,
}

impl LogAddresses {
    pub fn new(addresses: impl IntoIterator<Item = String>) -> Self {
        Self {
            addresses: RwLock::new(addresses.into_iter().filter(|a| valid_address(a)).collect()),
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.addresses.read().iter().cloned().collect()
    }

    fn insert(&self, address: &str) -> bool {
        self.addresses.write().insert(address.to_string())
    }

    fn remove(&self, address: &str) -> bool {
        self.addresses.write().remove(address)
    }
}

/// `host:port` with nothing the console would split on.
fn valid_address(address: &str) -> bool {
    let Some((host, port)) = address.rsplit_once(':') else {
        return false;
    };
    !host.is_empty()
        && port.parse::<u16>().map_or(false, |p| p > 0)
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

impl Fleet {
    /// Registers a log destination and pushes it to every server.
    pub async fn log_address_add(&self, address: &str) -> Result<BTreeMap<i32, ExecOutcome>, FleetError> {
        let address = address.trim();
        if !valid_address(address) {
            return Err(FleetError::InvalidAddress(address.to_string()));
        }
        if self.log_addresses.insert(address) {
            info!("Added log address {}", address);
        }
        Ok(self.broadcast(&[], &format!("logaddress_add {}", address)).await)
    }

    /// Unregisters a log destination and removes it from every server.
    pub async fn log_address_del(&self, address: &str) -> Result<BTreeMap<i32, ExecOutcome>, FleetError> {
        let address = address.trim();
        if !valid_address(address) {
            return Err(FleetError::InvalidAddress(address.to_string()));
        }
        if self.log_addresses.remove(address) {
            info!("Removed log address {}", address);
        }
        Ok(self.broadcast(&[], &format!("logaddress_del {}", address)).await)
    }

    /// Re-sends every registered address to the given servers.
    pub async fn push_log_addresses(&self, server_ids: &[i32]) {
        for address in self.log_addresses.list() {
            let results = self.broadcast(server_ids, &format!("logaddress_add {}", address)).await;
            let failed = results.values().filter(|r| !r.is_ok()).count();
            info!(
                "Pushed log address {} to {} server(s), {} failed",
                address,
                results.len() - failed,
                failed
            );
        }
    }
}
