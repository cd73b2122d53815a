//! Configuration types shared across Carmine services.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Full node configuration for Carmine services.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct NodeConfig {
    /// Full node JSON-RPC listen address.
    pub node_rpc_listen_address: SocketAddr,
    /// Path to the node cookie file. Enables cookie authentication with Some.
    pub node_cookie_path: Option<PathBuf>,
    /// Full node RPC username.
    pub node_user: Option<String>,
    /// Full node RPC password.
    pub node_password: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_rpc_listen_address: "127.0.0.1:18443"
                .parse()
                .expect("hardcoded address parses"),
            node_cookie_path: None,
            node_user: Some("xxxxxx".to_string()),
            node_password: Some("xxxxxx".to_string()),
        }
    }
}
