//! vigil-protocol: Browser channel protocol for the Vigil host agent
//!
//! This crate defines the closed message sets exchanged between the agent
//! and a browser client over the persistent WebSocket, and the codec that
//! maps them onto text/binary frames with validation on receipt.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode_client, encode_server, Frame, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{ClientMessage, ErrorCode, ServerMessage, StatsSample, TerminalSize};
