//! Carmine daemon config.

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use carmine_common::{Network, NodeConfig};

use crate::error::IndexerError;

/// Config information required for Carmine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CarminedConfig {
    /// Full node JSON-RPC listen address.
    pub node_listen_address: SocketAddr,
    /// Path to the node cookie file. Enables cookie authentication with
    /// Some.
    pub node_cookie_path: Option<PathBuf>,
    /// Full node RPC username.
    pub node_user: Option<String>,
    /// Full node RPC password.
    pub node_password: Option<String>,
    /// Whole-request deadline for node RPC calls, in seconds.
    pub rpc_timeout_secs: u64,
    /// Message bus retention per subscriber.
    pub bus_capacity: usize,
    /// Fallback sync poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Seconds between status log lines.
    pub status_interval_secs: u64,
    /// Network chain type.
    pub network: Network,
}

impl Default for CarminedConfig {
    fn default() -> Self {
        Self {
            node_listen_address: "127.0.0.1:18443"
                .parse()
                .expect("hardcoded address parses"),
            node_cookie_path: None,
            node_user: Some("xxxxxx".to_string()),
            node_password: Some("xxxxxx".to_string()),
            rpc_timeout_secs: 15,
            bus_capacity: 4096,
            poll_interval_ms: 2000,
            status_interval_secs: 10,
            network: Network::Testnet,
        }
    }
}

impl CarminedConfig {
    /// Performs checks on config data.
    pub(crate) fn check_config(&self) -> Result<(), IndexerError> {
        // Check node cookie authentication settings.
        if let Some(ref cookie_path) = self.node_cookie_path {
            if !Path::new(cookie_path).exists() {
                return Err(IndexerError::ConfigError(format!(
                    "Node cookie authentication is enabled, but cookie path {:?} does not exist.",
                    cookie_path
                )));
            }
        }

        // Ensure the node listen address is private.
        if !is_private_listen_addr(&self.node_listen_address) {
            return Err(IndexerError::ConfigError(
                "Carmine may only connect to a node with private IP addresses.".to_string(),
            ));
        }

        if self.rpc_timeout_secs == 0 {
            return Err(IndexerError::ConfigError(
                "rpc_timeout_secs must be at least 1.".to_string(),
            ));
        }

        Ok(())
    }

    /// The node connection settings in their shared form.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_rpc_listen_address: self.node_listen_address,
            node_cookie_path: self.node_cookie_path.clone(),
            node_user: self.node_user.clone(),
            node_password: self.node_password.clone(),
        }
    }
}

/// Attempts to load config data from a toml file at the specified path,
/// layered over the defaults.
pub fn load_config(file_path: &Path) -> Result<CarminedConfig, IndexerError> {
    if !file_path.exists() {
        return Err(IndexerError::ConfigError(format!(
            "Config file {:?} does not exist.",
            file_path
        )));
    }
    let config: CarminedConfig = Figment::from(Serialized::defaults(CarminedConfig::default()))
        .merge(Toml::file(file_path))
        .extract()
        .map_err(|e| IndexerError::ConfigError(format!("Error parsing config: {e}")))?;
    config.check_config()?;
    Ok(config)
}

/// Validates that the configured `address` is either an RFC1918 (private)
/// IPv4 address, an IPv6 Unique Local Address, or loopback.
pub(crate) fn is_private_listen_addr(addr: &SocketAddr) -> bool {
    let ip = addr.ip();
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_loopback(),
        IpAddr::V6(ipv6) => ipv6.is_unique_local() || ip.is_loopback(),
    }
}
