//! A mempool-fetching, chain-fetching and transaction submission library that
//! uses bitcoind's JsonRPC interface.
//!
//! Also holds the raw wire-format parsers for Bitcoin blocks and
//! transactions, and the script classification used for address indexing.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod jsonrpc;
