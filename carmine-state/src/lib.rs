//! Carmine's core chain indexing and mempool synchronization library.
//!
//! Mirrors the canonical chain and unconfirmed-transaction pool of a
//! remote Bitcoin node into a relational store, maintains derived
//! per-address history, handles chain reorganizations, and publishes
//! change events to downstream subscribers. A colored-coin rescanner
//! maintains its own scan frontier on top of the same transaction store.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod color;
pub mod config;
pub mod error;
pub mod events;
pub mod source;
pub mod status;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use color::{ColorDefinition, ColorRescanner, ColorStore, Epobc, MemColorStore};
pub use config::SyncConfig;
pub use error::{BusError, RescanError, StoreError, SyncError};
pub use events::{Event, EventPublisher, MemoryBus, MessageBus, SendTxStatus};
pub use source::{BlockchainSource, NodeEvent, SourceError};
pub use status::{AtomicStatus, StatusType};
pub use store::{
    BlockRow, ColorScanRow, HistoryRow, IndexStore, MemStore, StoreTransaction, TxRow,
};
pub use sync::ChainSync;
pub use types::{Address, BlockHash, ChainTip, Height, Txid};
