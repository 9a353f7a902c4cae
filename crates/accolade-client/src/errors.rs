//! Client error types.

use thiserror::Error;

/// Errors surfaced to client callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client was closed and will not reconnect.
    #[error("client is closed")]
    Closed,

    /// The relay URL has an unsupported scheme or is empty.
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
