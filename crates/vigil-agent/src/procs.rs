//! Managed-process control plane adapter
//!
//! The agent reaches the process manager through a narrow command
//! interface: list the managed processes, or apply one action to one
//! process. Retry and backoff are the manager's own business; a failed
//! call surfaces on the request that made it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use anyhow::{Context, Result};

/// One managed process as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    /// Manager-assigned process id
    pub id: u32,
    /// Process name
    pub name: String,
    /// Manager status string (e.g. "online", "stopped")
    pub status: String,
    /// CPU usage percentage
    pub cpu_percent: f32,
    /// Resident memory, bytes
    pub memory_bytes: u64,
}

/// Actions the control plane accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAction {
    Restart,
    Stop,
    Delete,
}

impl ProcessAction {
    /// Parse an action from its wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restart" => Some(Self::Restart),
            "stop" => Some(Self::Stop),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    fn as_arg(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Delete => "delete",
        }
    }
}

/// Narrow interface to the managed-process control plane
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// List managed processes
    async fn list(&self) -> Result<Vec<ManagedProcess>>;

    /// Apply one action to one process
    async fn act(&self, id: u32, action: ProcessAction) -> Result<()>;
}

/// pm2-backed control plane
pub struct Pm2Control {
    bin: String,
}

impl Pm2Control {
    /// Create an adapter shelling out to the given pm2 binary
    pub fn new(bin: String) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl ProcessControl for Pm2Control {
    async fn list(&self) -> Result<Vec<ManagedProcess>> {
        let output = Command::new(&self.bin)
            .arg("jlist")
            .output()
            .await
            .with_context(|| format!("Failed to run {} jlist", self.bin))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} jlist failed: {}",
                self.bin,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_jlist(&output.stdout)
    }

    async fn act(&self, id: u32, action: ProcessAction) -> Result<()> {
        let status = Command::new(&self.bin)
            .arg(action.as_arg())
            .arg(id.to_string())
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.bin, action.as_arg()))?;

        if !status.status.success() {
            anyhow::bail!(
                "{} {} {} failed: {}",
                self.bin,
                action.as_arg(),
                id,
                String::from_utf8_lossy(&status.stderr).trim()
            );
        }

        Ok(())
    }
}

/// Wire shape of `pm2 jlist` entries (only the fields we consume)
#[derive(Debug, Deserialize)]
struct Pm2Process {
    pm_id: u32,
    name: String,
    pm2_env: Pm2Env,
    monit: Option<Pm2Monit>,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Pm2Monit {
    cpu: f32,
    memory: u64,
}

fn parse_jlist(stdout: &[u8]) -> Result<Vec<ManagedProcess>> {
    let raw: Vec<Pm2Process> =
        serde_json::from_slice(stdout).context("Failed to parse pm2 jlist JSON")?;

    Ok(raw
        .into_iter()
        .map(|p| ManagedProcess {
            id: p.pm_id,
            name: p.name,
            status: p.pm2_env.status,
            cpu_percent: p.monit.as_ref().map(|m| m.cpu).unwrap_or(0.0),
            memory_bytes: p.monit.as_ref().map(|m| m.memory).unwrap_or(0),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jlist() {
        let json = r#"[
            {
                "pm_id": 0,
                "name": "web",
                "pm2_env": { "status": "online", "pm_uptime": 123 },
                "monit": { "cpu": 1.5, "memory": 52428800 }
            },
            {
                "pm_id": 3,
                "name": "worker",
                "pm2_env": { "status": "stopped" },
                "monit": null
            }
        ]"#;

        let procs = parse_jlist(json.as_bytes()).unwrap();
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].id, 0);
        assert_eq!(procs[0].name, "web");
        assert_eq!(procs[0].status, "online");
        assert_eq!(procs[0].memory_bytes, 52428800);
        assert_eq!(procs[1].cpu_percent, 0.0);
        assert_eq!(procs[1].memory_bytes, 0);
    }

    #[test]
    fn test_parse_jlist_garbage() {
        assert!(parse_jlist(b"not json").is_err());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(ProcessAction::parse("restart"), Some(ProcessAction::Restart));
        assert_eq!(ProcessAction::parse("stop"), Some(ProcessAction::Stop));
        assert_eq!(ProcessAction::parse("delete"), Some(ProcessAction::Delete));
        assert_eq!(ProcessAction::parse("reboot"), None);
    }
}
