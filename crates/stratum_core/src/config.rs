//! World configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecs::{ChunkDispatcher, InlineDispatcher, RayonDispatcher};

/// Default byte budget of one chunk.
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 16 * 1024;

/// Smallest byte budget a world accepts; smaller values are raised to it.
pub const MIN_CHUNK_SIZE_BYTES: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse world config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read world config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid world config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// How `parallel_query` spreads chunks over threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Rayon,
    Inline,
}

impl DispatchMode {
    pub fn dispatcher(self) -> Box<dyn ChunkDispatcher> {
        match self {
            DispatchMode::Rayon => Box::new(RayonDispatcher),
            DispatchMode::Inline => Box::new(InlineDispatcher),
        }
    }
}

/// World settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Byte budget of one chunk; sets how many rows each chunk holds.
    pub chunk_size_bytes: usize,
    pub dispatcher: DispatchMode,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            dispatcher: DispatchMode::default(),
        }
    }
}

impl WorldConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with out-of-range values clamped.
    pub fn normalized(mut self) -> Self {
        if self.chunk_size_bytes < MIN_CHUNK_SIZE_BYTES {
            tracing::warn!(
                requested = self.chunk_size_bytes,
                clamped = MIN_CHUNK_SIZE_BYTES,
                "chunk_size_bytes below minimum, clamping"
            );
            self.chunk_size_bytes = MIN_CHUNK_SIZE_BYTES;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorldConfig::default();
        assert_eq!(config.chunk_size_bytes, 16 * 1024);
        assert_eq!(config.dispatcher, DispatchMode::Rayon);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WorldConfig::from_json_str(r#"{ "dispatcher": "inline" }"#).unwrap();
        assert_eq!(config.dispatcher, DispatchMode::Inline);
        assert_eq!(config.chunk_size_bytes, DEFAULT_CHUNK_SIZE_BYTES);
        assert_eq!(config.dispatcher.dispatcher().name(), "inline");
    }

    #[test]
    fn test_small_chunk_size_is_clamped() {
        let config = WorldConfig::from_json_str(r#"{ "chunk_size_bytes": 64 }"#).unwrap();
        assert_eq!(config.chunk_size_bytes, MIN_CHUNK_SIZE_BYTES);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let err = WorldConfig::from_json_str(r#"{ "chunk_size_bytes": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "chunk_size_bytes",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = WorldConfig::from_json_str("{ chunk_size_bytes: }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorldConfig::load("/definitely/not/here/world.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = WorldConfig {
            chunk_size_bytes: 4096,
            dispatcher: DispatchMode::Inline,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(WorldConfig::from_json_str(&json).unwrap(), config);
    }
}
