//! Terminal session management
//!
//! One interactive shell subprocess per elevated connection, backed by a
//! pseudo-terminal from the portable-pty crate. A session moves through
//! `Unstarted → Running → Terminated`; spawning over a running session
//! kills and replaces it, so a connection never owns two shells.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtyPair, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vigil_core::config::TerminalConfig;
use vigil_core::error::TerminalError;
use vigil_protocol::TerminalSize;

/// Allowed shell paths (prevents arbitrary command execution)
const ALLOWED_SHELLS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/fish",
    "/bin/dash",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/fish",
    "/usr/bin/dash",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/opt/homebrew/bin/bash",
    "/opt/homebrew/bin/zsh",
];

/// Validate that a shell path is allowed and exists
fn validate_shell_path(shell: &str) -> Result<String> {
    let is_allowed = ALLOWED_SHELLS.contains(&shell);

    if !is_allowed {
        // Not on the static list; accept anything listed in /etc/shells
        if let Ok(shells) = std::fs::read_to_string("/etc/shells") {
            if shells.lines().any(|line| {
                let line = line.trim();
                !line.starts_with('#') && line == shell
            }) && Path::new(shell).exists()
            {
                return Ok(shell.to_string());
            }
        }

        anyhow::bail!("Shell '{}' is not in the allowed shell list", shell);
    }

    if !Path::new(shell).exists() {
        anyhow::bail!("Shell '{}' does not exist", shell);
    }

    Ok(shell.to_string())
}

/// Events produced by a session's output pump
#[derive(Debug)]
pub enum TerminalEvent {
    /// Chunk read from the PTY master, verbatim and in order
    Output(Bytes),
    /// The shell reached EOF; the subprocess has exited.
    ///
    /// Carries the spawn generation so an event queued from a replaced
    /// shell cannot be mistaken for the current one.
    Exited { generation: u64 },
}

/// Observable lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No shell has been spawned yet
    Unstarted,
    /// Shell subprocess is live
    Running,
    /// Shell was killed or exited; a new spawn may follow
    Terminated,
}

enum SessionState {
    Unstarted,
    Running(Running),
    Terminated,
}

struct Running {
    pair: PtyPair,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader_cancel: CancellationToken,
    // Held so the pump is tied to the session's lifetime; the task exits
    // on PTY EOF after kill.
    _reader_task: JoinHandle<()>,
    size: TerminalSize,
}

/// One PTY-backed shell session owned by a connection
pub struct TerminalSession {
    state: SessionState,
    config: TerminalConfig,
    events_tx: mpsc::Sender<TerminalEvent>,
    generation: u64,
}

impl TerminalSession {
    /// Create an unstarted session that will emit events on `events_tx`
    pub fn new(config: TerminalConfig, events_tx: mpsc::Sender<TerminalEvent>) -> Self {
        Self {
            state: SessionState::Unstarted,
            config,
            events_tx,
            generation: 0,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Unstarted => SessionPhase::Unstarted,
            SessionState::Running(_) => SessionPhase::Running,
            SessionState::Terminated => SessionPhase::Terminated,
        }
    }

    /// Process ID of the running shell, if any
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            SessionState::Running(running) => running.child.process_id(),
            _ => None,
        }
    }

    /// Current terminal size while running
    pub fn size(&self) -> Option<TerminalSize> {
        match &self.state {
            SessionState::Running(running) => Some(running.size),
            _ => None,
        }
    }

    /// Spawn the shell subprocess, replacing a running one.
    ///
    /// On failure the session is left `Terminated` and the error is
    /// reported to the caller for propagation to the client.
    pub fn spawn(&mut self) -> Result<(), TerminalError> {
        // No concurrent shells: a running session is killed first
        if matches!(self.state, SessionState::Running(_)) {
            tracing::info!("Respawn requested, replacing running shell");
            self.terminate();
        }

        self.generation += 1;
        let size = TerminalSize::new(self.config.cols, self.config.rows);
        match self.spawn_inner(size) {
            Ok(running) => {
                tracing::info!(
                    "Spawned shell (pid {:?}) at {}x{}",
                    running.child.process_id(),
                    size.cols,
                    size.rows
                );
                self.state = SessionState::Running(running);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Terminated;
                tracing::error!("Failed to spawn shell: {:#}", e);
                Err(TerminalError::Spawn(format!("{:#}", e)))
            }
        }
    }

    fn spawn_inner(&self, size: TerminalSize) -> Result<Running> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .with_context(|| "Failed to open PTY")?;

        let requested_shell = self
            .config
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string());

        let shell_path = validate_shell_path(&requested_shell)
            .with_context(|| format!("Invalid shell requested: {}", requested_shell))?;

        let mut cmd = CommandBuilder::new(&shell_path);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn shell: {}", shell_path))?;

        let reader = pair
            .master
            .try_clone_reader()
            .with_context(|| "Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .with_context(|| "Failed to take PTY writer")?;

        let reader_cancel = CancellationToken::new();
        let reader_task = spawn_output_pump(
            reader,
            self.generation,
            self.events_tx.clone(),
            reader_cancel.clone(),
        );

        Ok(Running {
            pair,
            child,
            writer,
            reader_cancel,
            _reader_task: reader_task,
            size,
        })
    }

    /// Forward raw bytes to the shell's input.
    ///
    /// A write against a session that is not running is a silent no-op:
    /// the client may race input against a not-yet-spawned shell.
    pub fn write(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        match &mut self.state {
            SessionState::Running(running) => {
                running.writer.write_all(data)?;
                running.writer.flush()?;
                Ok(())
            }
            _ => {
                tracing::trace!("Dropping {} input bytes for inactive session", data.len());
                Ok(())
            }
        }
    }

    /// Update the pseudo-terminal's dimensions; no-op unless running
    pub fn resize(&mut self, size: TerminalSize) -> Result<(), TerminalError> {
        match &mut self.state {
            SessionState::Running(running) => {
                running
                    .pair
                    .master
                    .resize(PtySize {
                        rows: size.rows,
                        cols: size.cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    })
                    .map_err(|e| {
                        TerminalError::Io(std::io::Error::other(format!("resize failed: {}", e)))
                    })?;
                running.size = size;
                tracing::debug!("Resized terminal to {}x{}", size.cols, size.rows);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Collect the exit code after the pump reported EOF.
    ///
    /// `None` means the event was stale: the client respawned before it
    /// was processed and the current shell is untouched. Otherwise the
    /// session transitions to `Terminated` and the exit code (when the
    /// process could be reaped) is returned.
    pub fn reap(&mut self, generation: u64) -> Option<Option<i32>> {
        if generation != self.generation || !matches!(self.state, SessionState::Running(_)) {
            tracing::debug!("Ignoring stale exit event for generation {}", generation);
            return None;
        }

        match std::mem::replace(&mut self.state, SessionState::Terminated) {
            SessionState::Running(mut running) => {
                running.reader_cancel.cancel();
                let exit_code = match running.child.wait() {
                    Ok(status) => Some(status.exit_code() as i32),
                    Err(e) => {
                        tracing::warn!("Failed to reap shell: {}", e);
                        None
                    }
                };
                tracing::info!("Shell exited with code {:?}", exit_code);
                Some(exit_code)
            }
            _ => None,
        }
    }

    /// Kill the shell if running and transition to `Terminated`.
    ///
    /// Idempotent. Sends the kill signal without waiting for the process
    /// to fully exit; reaping happens off the caller's path so no handle
    /// is leaked.
    pub fn terminate(&mut self) {
        if let SessionState::Running(mut running) =
            std::mem::replace(&mut self.state, SessionState::Terminated)
        {
            running.reader_cancel.cancel();
            if let Err(e) = running.child.kill() {
                tracing::debug!("Kill failed (process may have exited): {}", e);
            }
            tracing::info!("Terminal session terminated");
            tokio::task::spawn_blocking(move || {
                let _ = running.child.wait();
            });
        }
    }
}

/// Spawn a blocking task that pumps PTY output into the event channel.
///
/// The cancellation token is checked between reads so a deliberate
/// terminate does not surface as a shell exit.
fn spawn_output_pump(
    mut reader: Box<dyn Read + Send>,
    generation: u64,
    tx: mpsc::Sender<TerminalEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("Output pump cancelled");
                return;
            }

            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("PTY reached EOF");
                    break;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if tx.blocking_send(TerminalEvent::Output(chunk)).is_err() {
                        tracing::debug!("Terminal event channel closed");
                        return;
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        tracing::debug!("Output pump stopped (cancelled)");
                        return;
                    }
                    // On Linux the master read fails with EIO once the
                    // child side closes; treat it like EOF.
                    tracing::debug!("PTY read ended: {}", e);
                    break;
                }
            }
        }

        if !cancel.is_cancelled() {
            let _ = tx.blocking_send(TerminalEvent::Exited { generation });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config() -> TerminalConfig {
        TerminalConfig {
            shell: Some("/bin/sh".to_string()),
            ..TerminalConfig::default()
        }
    }

    async fn collect_output_until(
        rx: &mut mpsc::Receiver<TerminalEvent>,
        needle: &str,
        window: Duration,
    ) -> String {
        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, rx.recv()).await {
                Ok(Some(TerminalEvent::Output(chunk))) => {
                    collected.extend_from_slice(&chunk);
                    if String::from_utf8_lossy(&collected).contains(needle) {
                        break;
                    }
                }
                Ok(Some(TerminalEvent::Exited { .. })) | Ok(None) => break,
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (tx, mut rx) = mpsc::channel(256);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        assert_eq!(session.phase(), SessionPhase::Running);

        session.write(b"echo hi\n").unwrap();
        let output = collect_output_until(&mut rx, "hi", Duration::from_secs(5)).await;
        assert!(output.contains("hi"), "shell output was: {:?}", output);

        session.terminate();
        assert_eq!(session.phase(), SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn test_write_before_spawn_is_noop() {
        let (tx, _rx) = mpsc::channel(16);
        let mut session = TerminalSession::new(test_config(), tx);

        assert_eq!(session.phase(), SessionPhase::Unstarted);
        session.write(b"racing input").unwrap();
        session.resize(TerminalSize::new(100, 40)).unwrap();
        assert_eq!(session.phase(), SessionPhase::Unstarted);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (tx, _rx) = mpsc::channel(16);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        session.terminate();
        session.terminate();
        session.terminate();
        assert_eq!(session.phase(), SessionPhase::Terminated);

        // Writes after terminate stay silent no-ops
        session.write(b"late input").unwrap();
    }

    #[tokio::test]
    async fn test_respawn_replaces_running_shell() {
        let (tx, _rx) = mpsc::channel(256);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        let first_pid = session.pid().unwrap();

        session.spawn().unwrap();
        let second_pid = session.pid().unwrap();

        assert_ne!(first_pid, second_pid);
        assert_eq!(session.phase(), SessionPhase::Running);

        session.terminate();
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_terminated() {
        let (tx, _rx) = mpsc::channel(16);
        let config = TerminalConfig {
            shell: Some("/definitely/not/a/shell".to_string()),
            ..TerminalConfig::default()
        };
        let mut session = TerminalSession::new(config, tx);

        let result = session.spawn();
        assert!(matches!(result, Err(TerminalError::Spawn(_))));
        assert_eq!(session.phase(), SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn test_resize_while_running() {
        let (tx, _rx) = mpsc::channel(256);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        assert_eq!(session.size(), Some(TerminalSize::new(80, 30)));

        session.resize(TerminalSize::new(132, 50)).unwrap();
        assert_eq!(session.size(), Some(TerminalSize::new(132, 50)));

        session.terminate();
        assert_eq!(session.size(), None);
    }

    #[tokio::test]
    async fn test_natural_exit_reports_exit_code() {
        let (tx, mut rx) = mpsc::channel(256);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        session.write(b"exit 0\n").unwrap();

        let generation = loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(TerminalEvent::Exited { generation })) => break generation,
                Ok(Some(TerminalEvent::Output(_))) => continue,
                other => panic!("Shell did not exit: {:?}", other),
            }
        };

        let exit_code = session.reap(generation);
        assert_eq!(exit_code, Some(Some(0)));
        assert_eq!(session.phase(), SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn test_stale_exit_event_does_not_touch_respawned_shell() {
        let (tx, _rx) = mpsc::channel(256);
        let mut session = TerminalSession::new(test_config(), tx);

        session.spawn().unwrap();
        let old_generation = 1;
        session.spawn().unwrap();

        // An exit event queued from the first shell must not reap the second
        assert_eq!(session.reap(old_generation), None);
        assert_eq!(session.phase(), SessionPhase::Running);

        session.terminate();
    }

    #[test]
    fn test_validate_shell_path() {
        assert!(validate_shell_path("/bin/sh").is_ok());
        assert!(validate_shell_path("/usr/bin/python3").is_err());
        assert!(validate_shell_path("rm -rf /").is_err());
    }
}
