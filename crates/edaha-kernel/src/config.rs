//! Engine configuration, loaded from RON.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```ron
//! (
//!     ancestor_limit: 30,
//!     llm: (model: "claude-sonnet", attempts: 3),
//!     placement: (spacing: 24.0),
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use edaha_graph::{DEFAULT_ANCESTOR_LIMIT, PlacementConfig};

use crate::positions::FlushConfig;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Settings for AI calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Total attempts per exchange, first call included.
    pub attempts: u32,
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: 4096,
            attempts: 2,
            temperature: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Messages of history sent with each AI call.
    pub ancestor_limit: usize,
    pub llm: LlmConfig,
    pub placement: PlacementConfig,
    pub positions: FlushConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ancestor_limit: DEFAULT_ANCESTOR_LIMIT,
            llm: LlmConfig::default(),
            placement: PlacementConfig::default(),
            positions: FlushConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron_str(&text)?;
        tracing::debug!(?config, "loaded engine config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ancestor_limit, 20);
        assert_eq!(config.llm.attempts, 2);
        assert_eq!(config.placement.spacing, 40.0);
        assert_eq!(config.placement.default_width, 320.0);
        assert_eq!(config.placement.default_height, 180.0);
        assert_eq!(config.positions.max_pending, 64);
        assert_eq!(config.positions.max_age(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = EngineConfig::from_ron_str(
            "(ancestor_limit: 30, llm: (model: \"local\", attempts: 3), placement: (spacing: 24.0))",
        )
        .unwrap();
        assert_eq!(config.ancestor_limit, 30);
        assert_eq!(config.llm.model, "local");
        assert_eq!(config.llm.attempts, 3);
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.placement.spacing, 24.0);
        assert_eq!(config.placement.default_width, 320.0);
    }

    #[test]
    fn test_bad_ron_is_error() {
        assert!(matches!(EngineConfig::from_ron_str("(ancestor_limit: \"x\")"), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        std::fs::write(&path, "(positions: (max_pending: 8, max_age_ms: 50))").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.positions.max_pending, 8);
        assert_eq!(config.positions.max_age(), Duration::from_millis(50));

        assert!(matches!(EngineConfig::load(dir.path().join("missing.ron")), Err(ConfigError::Io(_))));
    }
}
