//! vigil-core: Core types, capability gate, and configuration for Vigil
//!
//! This crate provides the identity model, the signed-token capability
//! gate, the error taxonomy, and configuration structures shared by the
//! agent daemon.

pub mod auth;
pub mod config;
pub mod error;
pub mod identity;

pub use auth::TokenVerifier;
pub use error::{GateError, MutateError, TerminalError, VigilError};
pub use identity::{Identity, Role};
