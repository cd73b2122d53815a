//! JsonRPC client for bitcoind-compatible nodes.

pub mod connector;
pub mod error;
pub mod response;

pub use connector::{connect_to_node, BitcoindConnector, RpcError, RpcRequestError};
