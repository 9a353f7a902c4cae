//! Relay URL normalization.

use crate::errors::ClientError;

/// Rewrite `http(s)://` to `ws(s)://`. WebSocket URLs pass through.
///
/// Any other scheme, or an empty string, is rejected.
pub fn normalize_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        return Ok(trimmed.to_string());
    }
    Err(ClientError::InvalidUrl(raw.to_string()))
}
