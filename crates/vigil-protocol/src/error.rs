//! Protocol error types

use thiserror::Error;

/// Errors that can occur while mapping WebSocket frames to messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Text frame was not a valid tagged message
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame kind has no mapping in the protocol
    #[error("Unsupported frame type")]
    UnsupportedFrame,

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
}
