//! System log retrieval
//!
//! A closed set of log categories mapped to fixed file paths. The tail is
//! bounded on both axes: at most the final 256 KiB of the file is read,
//! and at most the last 100 lines are returned.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Lines returned per fetch
pub const TAIL_LINES: usize = 100;

/// Bytes read from the end of the file before line-splitting
const TAIL_WINDOW_BYTES: u64 = 256 * 1024;

/// Log categories the agent serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Syslog,
    Auth,
    Dpkg,
}

impl LogCategory {
    /// Parse a category from its wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "syslog" => Some(Self::Syslog),
            "auth" => Some(Self::Auth),
            "dpkg" => Some(Self::Dpkg),
            _ => None,
        }
    }

    /// Fixed file path for this category
    pub fn path(&self) -> &'static Path {
        Path::new(match self {
            Self::Syslog => "/var/log/syslog",
            Self::Auth => "/var/log/auth.log",
            Self::Dpkg => "/var/log/dpkg.log",
        })
    }
}

/// Fetch the tail of a category's log file
pub async fn tail(category: LogCategory) -> Result<String> {
    tail_file(category.path(), TAIL_LINES).await
}

async fn tail_file(path: &Path, lines: usize) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open log file {:?}", path))?;

    let len = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat log file {:?}", path))?
        .len();

    file.seek(SeekFrom::Start(len.saturating_sub(TAIL_WINDOW_BYTES)))
        .await
        .with_context(|| format!("Failed to seek in log file {:?}", path))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .with_context(|| format!("Failed to read log file {:?}", path))?;

    let text = String::from_utf8_lossy(&buf);
    let mut tail: Vec<&str> = text.lines().rev().take(lines).collect();
    tail.reverse();
    Ok(tail.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let content: String = (1..=150).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&path, content).unwrap();

        let tail = tail_file(&path, 100).await.unwrap();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line 51");
        assert_eq!(lines[99], "line 150");
    }

    #[tokio::test]
    async fn test_tail_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.log");
        std::fs::write(&path, "only\ntwo\n").unwrap();

        let tail = tail_file(&path, 100).await.unwrap();
        assert_eq!(tail, "only\ntwo");
    }

    #[tokio::test]
    async fn test_tail_missing_file() {
        let result = tail_file(Path::new("/nonexistent/file.log"), 100).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(LogCategory::parse("syslog"), Some(LogCategory::Syslog));
        assert_eq!(LogCategory::parse("auth"), Some(LogCategory::Auth));
        assert_eq!(LogCategory::parse("dpkg"), Some(LogCategory::Dpkg));
        assert_eq!(LogCategory::parse("kernel"), None);
    }
}
