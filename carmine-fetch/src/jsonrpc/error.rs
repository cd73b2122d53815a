//! Hold error types for the BitcoindConnector and related functionality.

use std::path::PathBuf;

/// Errors at the HTTP transport layer, below JSON-RPC semantics.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Reqwest based errors.
    #[error("http request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// URL parse errors.
    #[error("invalid node URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// The node answered with an informational or redirect status.
    #[error("unexpected HTTP status {0} from node")]
    UnexpectedStatusCode(u16),

    /// The node answered with an HTTP error status carrying no JSON-RPC
    /// body.
    #[error("HTTP error status {0} with no JSON-RPC body")]
    ErrorStatusCode(u16),

    /// The node returned an envelope with neither result nor error.
    #[error("node returned neither result nor error")]
    EmptyResponseBody,

    /// The node returned bytes that do not decode as the expected
    /// response type.
    #[error("could not decode node response as {1}: {0}")]
    BadNodeData(Box<dyn std::error::Error + Send + Sync + 'static>, &'static str),

    /// The RPC auth cookie file could not be read.
    #[error("could not read RPC cookie {1:?}: {0}")]
    CookieReadError(std::io::Error, PathBuf),

    /// No node answered at the configured address.
    #[error("no node reachable at {0}")]
    NodeUnreachable(String),
}
