//! Hold error types for wire-format parsing.

/// Parser Error Type.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Io Error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid Data Error
    #[error("Invalid Data Error: {0}")]
    InvalidData(String),

    /// Hexadecimal decoding error.
    #[error("Hex Decode Error: {0}")]
    FromHexError(#[from] hex::FromHexError),

    /// Integer conversion error.
    #[error("Integer conversion error: {0}")]
    TryFromIntError(#[from] std::num::TryFromIntError),

    /// Trailing bytes after a structure that must consume its whole input.
    #[error("{0} bytes of trailing data after {1}")]
    TrailingData(usize, &'static str),
}
