//! Common types and configurations shared across Carmine crates.
//!
//! This crate provides shared configuration types and the network
//! abstraction used across the Carmine blockchain indexer ecosystem.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod network;

pub use config::NodeConfig;
pub use network::Network;
