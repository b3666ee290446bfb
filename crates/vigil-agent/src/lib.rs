//! vigil-agent: Remote administration agent for a single host
//!
//! The agent serves an authenticated browser client: a per-connection
//! WebSocket carries live host telemetry and an interactive PTY-backed
//! shell, while the HTTP API carries managed-process control and the
//! privilege-escalated configuration-mutation workflow.

pub mod connection;
pub mod logs;
pub mod mutator;
pub mod procs;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod terminal;

pub use state::AgentState;
