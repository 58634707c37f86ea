//! Configuration for the grading assistant
//!
//! Lives in ~/.config/mark/config.toml, overridable with MARK_CONFIG.
//! The Canvas token can also come from CANVAS_API_TOKEN so it never has
//! to be written to disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::llm::LlmConfig;

const CONFIG_DIR: &str = "mark";
const CONFIG_FILE: &str = "config.toml";

/// Canvas LMS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSettings {
    /// Base API URL, e.g. https://canvas.example.edu/api/v1
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the Canvas REST API
    #[serde(default)]
    pub access_token: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://canvas.instructure.com/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkConfig {
    #[serde(default)]
    pub canvas: CanvasSettings,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl MarkConfig {
    /// Config path discovery.
    ///
    /// Priority:
    /// 1. $MARK_CONFIG (explicit override)
    /// 2. XDG config dir (~/.config/mark/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MARK_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from an explicit path, or the default path when `None`.
    /// A missing file yields defaults; a malformed file is an error.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default().with_env_overrides()),
            },
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid config at {}: {}", path.display(), e))?
        } else {
            tracing::debug!("no config file at {}, using defaults", path.display());
            Self::default()
        };

        config = config.with_env_overrides();
        Ok(config)
    }

    /// Environment variables win over the file for credentials.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("CANVAS_API_TOKEN") {
            self.canvas.access_token = token;
        }
        if let Ok(key) = std::env::var("MARK_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MarkConfig::default();
        assert_eq!(config.canvas.timeout_secs, 30);
        assert!(config.canvas.access_token.is_empty());
        assert!(config.llm.enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[canvas]\nbase_url = \"https://lms.test/api/v1\"\naccess_token = \"tok\""
        )
        .unwrap();

        let config = MarkConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.canvas.base_url, "https://lms.test/api/v1");
        assert_eq!(config.canvas.timeout_secs, 30);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "canvas = 42").unwrap();
        assert!(MarkConfig::load(Some(file.path())).is_err());
    }
}
