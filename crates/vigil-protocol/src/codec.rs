//! WebSocket frame codec for protocol messages
//!
//! The WebSocket layer already provides message framing, so this codec only
//! decides how messages map onto frames and validates inbound frames:
//!
//! - Binary frames carry raw terminal bytes verbatim (`TerminalInput` /
//!   `TerminalOutput`), preserving byte order and non-UTF-8 output.
//! - Text frames carry JSON control messages tagged with a `type` field.
//!
//! Inbound frames that exceed [`MAX_FRAME_SIZE`], use an unknown tag, or
//! fail to parse are rejected with a [`ProtocolError`]; they are never
//! dispatched by name.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{ClientMessage, ErrorCode, ServerMessage, StatsSample, TerminalSize};

/// Maximum accepted frame payload (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A transport-agnostic WebSocket frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

/// Wire shape of client control frames
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientFrame {
    TerminalSpawn,
    TerminalInput { data: String },
    TerminalResize { cols: u16, rows: u16 },
}

/// Wire shape of server control frames
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ServerFrame {
    Stats(StatsSample),
    TerminalExit { exit_code: Option<i32> },
    Error { code: ErrorCode, message: String },
}

/// Decode an inbound frame into a client message.
///
/// Binary frames are terminal input by definition; text frames must parse
/// as one of the tagged control messages.
pub fn decode_client(frame: Frame) -> Result<ClientMessage, ProtocolError> {
    match frame {
        Frame::Binary(data) => {
            if data.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::PayloadTooLarge {
                    size: data.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            Ok(ClientMessage::TerminalInput(data))
        }
        Frame::Text(text) => {
            if text.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::PayloadTooLarge {
                    size: text.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            let control: ClientFrame = serde_json::from_str(&text)?;
            Ok(match control {
                ClientFrame::TerminalSpawn => ClientMessage::TerminalSpawn,
                ClientFrame::TerminalInput { data } => {
                    ClientMessage::TerminalInput(Bytes::from(data.into_bytes()))
                }
                ClientFrame::TerminalResize { cols, rows } => {
                    ClientMessage::TerminalResize(TerminalSize::new(cols, rows))
                }
            })
        }
    }
}

/// Encode a server message into an outbound frame.
///
/// Terminal output is forwarded as a binary frame untouched; everything
/// else becomes a tagged JSON text frame.
pub fn encode_server(message: &ServerMessage) -> Result<Frame, ProtocolError> {
    let frame = match message {
        ServerMessage::TerminalOutput(data) => Frame::Binary(data.clone()),
        ServerMessage::Stats(sample) => Frame::Text(serde_json::to_string(&ServerFrame::Stats(*sample))?),
        ServerMessage::TerminalExit { exit_code } => Frame::Text(serde_json::to_string(
            &ServerFrame::TerminalExit {
                exit_code: *exit_code,
            },
        )?),
        ServerMessage::Error { code, message } => Frame::Text(serde_json::to_string(
            &ServerFrame::Error {
                code: *code,
                message: message.clone(),
            },
        )?),
    };
    Ok(frame)
}
