//! Holds error types for carmine-state.

use crate::types::Txid;

/// Errors originating from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the statement.
    #[error("storage backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A row the statement requires is missing.
    #[error("missing data: {0}")]
    MissingData(String),

    /// A write violated a row constraint.
    #[error("row constraint violated: {0}")]
    Constraint(String),
}

/// Errors related to the chain synchronizer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Errors originating from the blockchain source in use.
    #[error("blockchain source error: {0}")]
    Source(#[from] crate::source::SourceError),

    /// Errors originating from storage.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A previously known txid could not be fetched from the node.
    #[error("transaction {0} not found on node")]
    TxNotFound(Txid),

    /// The node served data that does not extend or connect to the stored
    /// chain.
    #[error("node data inconsistent with stored chain: {0}")]
    Inconsistent(String),
}

/// Errors related to the colored-coin rescanner.
#[derive(Debug, thiserror::Error)]
pub enum RescanError {
    /// Errors originating from storage.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Wire-format parse error on a stored raw transaction.
    #[error("chain parse error: {0}")]
    Parse(#[from] carmine_fetch::chain::error::ParseError),

    /// A color-definition class failed on an item.
    #[error("color definition error: {0}")]
    Definition(String),

    /// A row the rescanner requires is missing.
    #[error("missing data: {0}")]
    MissingData(String),
}

/// Errors related to the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has no live endpoint.
    #[error("message bus closed")]
    Closed,

    /// The payload failed to serialize.
    #[error("payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
