//! Core error types for Vigil

use std::path::PathBuf;
use thiserror::Error;

use vigil_protocol::ProtocolError;

/// Top-level error type for the Vigil agent
#[derive(Error, Debug)]
pub enum VigilError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Capability gate failure
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    /// Terminal session error
    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),

    /// Configuration mutation error
    #[error("Mutation error: {0}")]
    Mutate(#[from] MutateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability gate failures
///
/// `Unauthenticated` covers a missing or structurally malformed credential;
/// `Unauthorized` covers a credential that parsed but failed verification
/// (bad signature, expired, unknown role).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    /// No credential, or not even token-shaped
    #[error("Authentication required")]
    Unauthenticated,

    /// Credential failed verification
    #[error("Invalid or expired credential")]
    Unauthorized,
}

/// Terminal-session errors
#[derive(Error, Debug)]
pub enum TerminalError {
    /// The OS refused to allocate the PTY or spawn the shell
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),

    /// PTY write or resize failed
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Privileged configuration-mutation errors
#[derive(Error, Debug)]
pub enum MutateError {
    /// Malformed client input, rejected before any work
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No protected target with that name is configured
    #[error("Unknown configuration target: {0}")]
    UnknownTarget(String),

    /// Writing the staged copy failed; nothing further was attempted
    #[error("Failed to stage configuration: {0}")]
    Stage(String),

    /// The escalation tool rejected the supplied secret
    #[error("Escalation secret rejected")]
    IncorrectSecret,

    /// A chain step failed; `details` carries the tool's own diagnostics
    #[error("Configuration apply failed: {details}")]
    Apply { details: String },

    /// Privileged read failed
    #[error("Failed to read configuration: {0}")]
    Read(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment variable referenced by the config is missing or empty
    #[error("Environment variable not usable: {0}")]
    EnvVar(String),
}
