//! Message types for the Vigil browser channel
//!
//! This module defines the messages exchanged between the agent and a
//! browser client over the persistent WebSocket. The sets are closed: a
//! frame that does not map onto one of these variants is rejected by the
//! codec rather than dispatched dynamically.
//!
//! # Message Flow
//!
//! Typical sequence for one connection:
//!
//! 1. Client completes the authenticated upgrade (handled outside this crate)
//! 2. Agent emits `Stats` on a fixed cadence for the whole connection life
//! 3. An elevated client sends `TerminalSpawn`; terminal bytes then flow as
//!    `TerminalInput` / `TerminalOutput`
//! 4. Window changes arrive as `TerminalResize`
//! 5. Shell exit is reported with `TerminalExit`; failures with `Error`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Default terminal size (80x30)
    pub fn default_size() -> Self {
        Self { cols: 80, rows: 30 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// One periodic snapshot of host resource usage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    /// CPU load percentage (0-100)
    pub cpu_percent: f32,
    /// Memory in use, bytes
    pub mem_used_bytes: u64,
    /// Total memory, bytes
    pub mem_total_bytes: u64,
    /// Host uptime, seconds
    pub uptime_secs: u64,
    /// Aggregate egress rate across all interfaces, bytes/second
    pub net_tx_bytes_per_sec: f64,
    /// Aggregate ingress rate across all interfaces, bytes/second
    pub net_rx_bytes_per_sec: f64,
}

/// Error codes for `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The connection's role does not permit the requested operation
    Unauthorized,
    /// The OS refused to create the shell subprocess
    SpawnFailed,
    /// The client sent a frame the protocol does not recognize
    InvalidMessage,
}

/// Client → server messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Start (or replace) the interactive shell for this connection
    TerminalSpawn,
    /// Raw keystrokes for the shell's input
    TerminalInput(Bytes),
    /// Terminal window changed size
    TerminalResize(TerminalSize),
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Periodic telemetry sample
    Stats(StatsSample),
    /// Raw bytes the shell wrote, forwarded verbatim and in order
    TerminalOutput(Bytes),
    /// The shell subprocess exited
    TerminalExit {
        /// Exit code if the process exited normally
        exit_code: Option<i32>,
    },
    /// A failure the client should present to the user
    Error {
        /// Machine-readable code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 30);
    }

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::SpawnFailed).unwrap();
        assert_eq!(json, "\"spawn-failed\"");
    }
}
