//! Privileged configuration mutation
//!
//! Replaces a protected configuration file and reloads its consuming
//! service through a fail-fast chain of discrete escalated commands. The
//! interactive escalation secret is supplied per request, fed to the
//! escalation tool on stdin, and never cached, logged, or persisted.
//!
//! Chain order is validate → move → reload: the validator runs against
//! the staged copy, so a rejected configuration provably leaves the
//! protected file untouched. A reload failure after the move leaves the
//! file already replaced; that outcome is surfaced as an apply failure,
//! never swallowed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use vigil_core::config::{MutationConfig, MutationTarget};
use vigil_core::error::MutateError;

/// Rejection phrase in the escalation tool's stderr.
///
/// This is sudo's own wording; matching it is how a credential rejection
/// is told apart from an ordinary step failure, so the phrase is an
/// external contract with the tool, not an internal choice.
const INCORRECT_PASSWORD_MARKER: &str = "incorrect password";

/// Placeholder replaced with the staged file path in target commands
const FILE_PLACEHOLDER: &str = "{file}";

/// Interactive privilege-escalation secret.
///
/// Scoped to one request and zeroed on drop. Deliberately has no
/// `Display`/`Serialize`; the redacted `Debug` keeps it out of logs.
pub struct EscalationSecret(Vec<u8>);

impl EscalationSecret {
    /// Wrap a secret received from the client
    pub fn new(secret: String) -> Self {
        Self(secret.into_bytes())
    }

    /// Whether the client actually supplied a secret
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for EscalationSecret {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            *byte = 0;
        }
    }
}

impl std::fmt::Debug for EscalationSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EscalationSecret(***)")
    }
}

/// Deletes the staged artifact when the request resolves, success or
/// failure. A successful chain moves the file away first; the missing
/// file is then not an error.
struct StagedFile {
    path: PathBuf,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staged file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Applies privileged configuration changes, one in flight per target path
pub struct ConfigMutator {
    config: MutationConfig,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ConfigMutator {
    /// Create a mutator over the configured protected targets
    pub fn new(config: MutationConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    /// Read a protected target's current content.
    ///
    /// Runs under the agent's own privileges and carries no secret; the
    /// path is read-only.
    pub async fn read(&self, target_name: &str) -> Result<String, MutateError> {
        let target = self.target(target_name)?;
        tokio::fs::read_to_string(&target.path)
            .await
            .map_err(|e| MutateError::Read(format!("{:?}: {}", target.path, e)))
    }

    /// Stage, validate, commit, and reload a protected target.
    ///
    /// All-or-nothing from the client's view: any step failure aborts the
    /// rest of the chain and surfaces as one classified error. Concurrent
    /// requests for the same protected path serialize behind a per-path
    /// lock so the staged artifact is never shared.
    pub async fn apply(
        &self,
        target_name: &str,
        content: &str,
        secret: &EscalationSecret,
    ) -> Result<(), MutateError> {
        if content.is_empty() {
            return Err(MutateError::BadRequest("content is required".to_string()));
        }
        if secret.is_empty() {
            return Err(MutateError::BadRequest(
                "escalation secret is required".to_string(),
            ));
        }

        let target = self.target(target_name)?.clone();

        let lock = self
            .locks
            .entry(target.path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let staged_path = self
            .config
            .staging_dir
            .join(format!("vigil-{}.staged", target_name));

        tokio::fs::write(&staged_path, content)
            .await
            .map_err(|e| MutateError::Stage(format!("{:?}: {}", staged_path, e)))?;
        let _staged = StagedFile {
            path: staged_path.clone(),
        };

        tracing::info!(
            "Applying configuration change to {:?} (staged at {:?})",
            target.path,
            staged_path
        );

        // Fail-fast chain; each step runs only if the previous succeeded
        let validate = substitute(&target.validate_cmd, &staged_path);
        self.run_escalated(&validate, secret).await?;

        let move_cmd = vec![
            "mv".to_string(),
            staged_path.to_string_lossy().into_owned(),
            target.path.to_string_lossy().into_owned(),
        ];
        self.run_escalated(&move_cmd, secret).await?;

        let reload = substitute(&target.reload_cmd, &target.path);
        self.run_escalated(&reload, secret).await?;

        tracing::info!("Configuration applied and service reloaded for {:?}", target.path);
        Ok(())
    }

    fn target(&self, name: &str) -> Result<&MutationTarget, MutateError> {
        self.config
            .targets
            .get(name)
            .ok_or_else(|| MutateError::UnknownTarget(name.to_string()))
    }

    /// Run one chain step under the escalation tool.
    ///
    /// The secret goes to stdin (`sudo -S`), never onto the command line;
    /// `-k` forces revalidation so a cached timestamp cannot stand in for
    /// the secret.
    async fn run_escalated(
        &self,
        argv: &[String],
        secret: &EscalationSecret,
    ) -> Result<(), MutateError> {
        let mut child = Command::new(&self.config.sudo_path)
            .arg("-S")
            .arg("-k")
            .arg("-p")
            .arg("")
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MutateError::Apply {
                details: format!(
                    "failed to invoke {:?}: {}",
                    self.config.sudo_path, e
                ),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The tool may exit before reading the secret; classification
            // below still sees its diagnostics.
            let _ = stdin.write_all(secret.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
        }

        let output = child.wait_with_output().await.map_err(|e| MutateError::Apply {
            details: format!("failed to collect command output: {}", e),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(INCORRECT_PASSWORD_MARKER) {
            tracing::warn!("Escalation secret rejected for chain step {:?}", argv.first());
            return Err(MutateError::IncorrectSecret);
        }

        let details = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        tracing::warn!("Chain step {:?} failed: {}", argv.first(), details);
        Err(MutateError::Apply { details })
    }
}

/// Replace the `{file}` placeholder in a command template
fn substitute(template: &[String], file: &Path) -> Vec<String> {
    let file = file.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
        .collect()
}
