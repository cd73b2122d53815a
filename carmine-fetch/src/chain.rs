//! Bitcoin wire-format types and parsers.
//!
//! Blocks and transactions are fetched from the node as raw hex
//! (`getblock`/`getrawtransaction` with verbosity 0) and deserialized
//! here. Only the fields the indexer needs are retained; witness data is
//! parsed past but not stored.

pub mod block;
pub mod error;
pub mod script;
pub mod transaction;
pub mod utils;

pub use block::{BlockHeader, FullBlock};
pub use script::{extract_addresses, ScriptClass};
pub use transaction::{FullTransaction, TxIn, TxOut};
