//! Turn logging for markctl
//!
//! One JSONL entry per chat turn, with an XDG fallback chain for the
//! log location.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;

/// Log entry for one processed utterance
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnEntry {
    /// ISO 8601 timestamp
    pub ts: String,

    /// Turn ID (UUID)
    pub turn_id: String,

    /// Classified intent label
    pub intent: String,

    /// Whether the turn produced a normal reply
    pub ok: bool,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Session error counter after the turn
    pub error_count: u32,

    /// Error details if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnEntry {
    pub fn new(intent: &str, ok: bool, duration_ms: u64, error_count: u32, error: Option<String>) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            turn_id: uuid::Uuid::new_v4().to_string(),
            intent: intent.to_string(),
            ok,
            duration_ms,
            error_count,
            error,
        }
    }

    /// Discover log file path with fallback chain.
    ///
    /// Priority:
    /// 1. $MARKCTL_LOG_FILE environment variable (explicit override)
    /// 2. $XDG_STATE_HOME/mark/turns.jsonl
    /// 3. ~/.local/state/mark/turns.jsonl
    fn discover_log_path() -> Option<String> {
        if let Ok(path) = std::env::var("MARKCTL_LOG_FILE") {
            return Some(path);
        }

        if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
            return Some(format!("{}/mark/turns.jsonl", xdg_state));
        }

        if let Ok(home) = std::env::var("HOME") {
            return Some(format!("{}/.local/state/mark/turns.jsonl", home));
        }

        None
    }

    /// Append the entry to the turn log. Logging must never break the
    /// conversation, so failures are only traced.
    pub fn write(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!("could not serialize turn entry: {}", e);
                return;
            }
        };

        let Some(path) = Self::discover_log_path() else {
            return;
        };

        if let Err(e) = Self::write_to_file(&json, &path) {
            tracing::debug!("could not write turn log {}: {}", path, e);
        }
    }

    fn write_to_file(json: &str, path: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_without_null_error() {
        let entry = TurnEntry::new("view_rubric", true, 12, 0, None);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"intent\":\"view_rubric\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_write_to_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/turns.jsonl");
        let path_str = path.to_str().unwrap();

        TurnEntry::write_to_file("{}", path_str).unwrap();
        TurnEntry::write_to_file("{}", path_str).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
