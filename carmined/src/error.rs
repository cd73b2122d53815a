//! Hold error types for the Indexer and related functionality.

/// Carmine indexer errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Node connector transport errors.
    #[error("Node transport error: {0}")]
    TransportError(#[from] carmine_fetch::jsonrpc::error::TransportError),
    /// Blockchain source errors.
    #[error("Blockchain source error: {0}")]
    SourceError(#[from] carmine_state::SourceError),
    /// Chain synchronizer errors.
    #[error("Sync error: {0}")]
    SyncError(#[from] carmine_state::SyncError),
    /// Returned from tokio join handles.
    #[error("Join handle error: {0}")]
    TokioJoinError(#[from] tokio::task::JoinError),
    /// Misc indexer errors.
    #[error("Misc indexer error: {0}")]
    MiscIndexerError(String),
    /// Carmine restart signal.
    #[error("Restart Carmine")]
    Restart,
}
