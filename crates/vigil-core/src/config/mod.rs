//! Configuration management for the Vigil agent

pub mod serde_utils;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use serde_utils::duration_secs;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Configuration for the agent daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address to serve the HTTP API and WebSocket channel on
    pub bind_addr: String,

    /// Capability-gate settings
    pub auth: AuthConfig,

    /// Telemetry sampling settings
    pub telemetry: TelemetryConfig,

    /// Terminal session defaults
    pub terminal: TerminalConfig,

    /// Privileged configuration-mutation settings
    pub mutation: MutationConfig,

    /// Managed-process control plane settings
    pub processes: ProcessConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9600".to_string(),
            auth: AuthConfig::default(),
            telemetry: TelemetryConfig::default(),
            terminal: TerminalConfig::default(),
            mutation: MutationConfig::default(),
            processes: ProcessConfig::default(),
        }
    }
}

/// Capability-gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for token verification.
    ///
    /// Supports `env:VAR_NAME` indirection so the secret itself never
    /// lives in the config file.
    pub token_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: "env:VIGIL_TOKEN_SECRET".to_string(),
        }
    }
}

impl AuthConfig {
    /// Resolve the token secret, expanding `env:VAR_NAME` syntax
    pub fn resolve_token_secret(&self) -> Result<String, ConfigError> {
        if let Some(var_name) = self.token_secret.strip_prefix("env:") {
            match std::env::var(var_name) {
                Ok(secret) if !secret.is_empty() => Ok(secret),
                Ok(_) => Err(ConfigError::EnvVar(format!("{} is empty", var_name))),
                Err(_) => Err(ConfigError::EnvVar(format!("{} is not set", var_name))),
            }
        } else if self.token_secret.is_empty() {
            Err(ConfigError::Invalid("token_secret is empty".to_string()))
        } else {
            Ok(self.token_secret.clone())
        }
    }
}

/// Telemetry sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampling cadence
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Terminal session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell to spawn (None = `$SHELL`, then `/bin/sh`)
    pub shell: Option<String>,

    /// Environment variables for spawned shells
    pub env: Vec<(String, String)>,

    /// Initial terminal columns
    pub cols: u16,

    /// Initial terminal rows
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            cols: 80,
            rows: 30,
        }
    }
}

/// A protected configuration target the mutator may replace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationTarget {
    /// Protected file path
    pub path: PathBuf,

    /// Validator command; `{file}` is replaced with the staged file path.
    /// Runs before the move so a rejection leaves the protected file
    /// untouched.
    pub validate_cmd: Vec<String>,

    /// Reload command for the consuming service
    pub reload_cmd: Vec<String>,
}

/// Privileged-mutation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Directory for staged content, writable by the unprivileged agent
    pub staging_dir: PathBuf,

    /// Escalation tool invoked for each chain step
    pub sudo_path: PathBuf,

    /// Named protected targets
    pub targets: HashMap<String, MutationTarget>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        let mut targets = HashMap::new();
        targets.insert(
            "nginx".to_string(),
            MutationTarget {
                path: PathBuf::from("/etc/nginx/nginx.conf"),
                validate_cmd: vec![
                    "nginx".to_string(),
                    "-t".to_string(),
                    "-c".to_string(),
                    "{file}".to_string(),
                ],
                reload_cmd: vec![
                    "systemctl".to_string(),
                    "reload".to_string(),
                    "nginx".to_string(),
                ],
            },
        );

        Self {
            staging_dir: std::env::temp_dir(),
            sudo_path: PathBuf::from("sudo"),
            targets,
        }
    }
}

/// Managed-process control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Process-manager binary the adapter shells out to
    pub pm2_bin: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            pm2_bin: "pm2".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrip() {
        let config = AgentConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.bind_addr, config.bind_addr);
        assert_eq!(parsed.telemetry.interval, Duration::from_secs(2));
        assert!(parsed.mutation.targets.contains_key("nginx"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AgentConfig = toml::from_str("bind_addr = \"0.0.0.0:8080\"\n").unwrap();
        assert_eq!(parsed.bind_addr, "0.0.0.0:8080");
        assert_eq!(parsed.telemetry.interval, Duration::from_secs(2));
        assert_eq!(parsed.terminal.cols, 80);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result: Result<AgentConfig, _> = load_config(Path::new("/nonexistent/agent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");

        let mut config = AgentConfig::default();
        config.bind_addr = "127.0.0.1:7777".to_string();
        save_config(&path, &config).unwrap();

        let loaded: AgentConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bind_addr, "127.0.0.1:7777");
    }

    #[test]
    fn test_resolve_token_secret_literal() {
        let auth = AuthConfig {
            token_secret: "literal-secret".to_string(),
        };
        assert_eq!(auth.resolve_token_secret().unwrap(), "literal-secret");
    }

    #[test]
    fn test_resolve_token_secret_env() {
        std::env::set_var("VIGIL_TEST_SECRET_VAR", "from-env");
        let auth = AuthConfig {
            token_secret: "env:VIGIL_TEST_SECRET_VAR".to_string(),
        };
        assert_eq!(auth.resolve_token_secret().unwrap(), "from-env");

        let missing = AuthConfig {
            token_secret: "env:VIGIL_TEST_SECRET_UNSET".to_string(),
        };
        assert!(matches!(
            missing.resolve_token_secret(),
            Err(ConfigError::EnvVar(_))
        ));
    }
}
