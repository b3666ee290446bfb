//! Agent state management

use std::sync::Arc;

use vigil_core::config::AgentConfig;
use vigil_core::error::ConfigError;
use vigil_core::TokenVerifier;

use crate::mutator::ConfigMutator;
use crate::procs::{Pm2Control, ProcessControl};

/// Global state for the agent daemon
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Capability gate
    pub verifier: TokenVerifier,
    /// Privileged configuration mutator
    pub mutator: ConfigMutator,
    /// Managed-process control plane
    pub processes: Arc<dyn ProcessControl>,
}

impl AgentState {
    /// Create new agent state, resolving the token secret
    pub fn new(config: AgentConfig) -> Result<Self, ConfigError> {
        let secret = config.auth.resolve_token_secret()?;
        let verifier = TokenVerifier::new(&secret);
        let mutator = ConfigMutator::new(config.mutation.clone());
        let processes = Arc::new(Pm2Control::new(config.processes.pm2_bin.clone()));

        Ok(Self {
            config,
            verifier,
            mutator,
            processes,
        })
    }

    /// Create state with a custom process control plane (tests)
    #[cfg(test)]
    pub fn with_processes(config: AgentConfig, processes: Arc<dyn ProcessControl>) -> Result<Self, ConfigError> {
        let secret = config.auth.resolve_token_secret()?;
        Ok(Self {
            verifier: TokenVerifier::new(&secret),
            mutator: ConfigMutator::new(config.mutation.clone()),
            processes,
            config,
        })
    }
}
