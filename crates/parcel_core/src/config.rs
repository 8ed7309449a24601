//! Container configuration

use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How `create_virtual_particles` condenses fine-level particles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    /// One virtual particle per fine particle.
    #[default]
    None,
    /// One mass-weighted virtual particle per occupied fine cell.
    Cell,
}

/// Tunables shared by every container instance built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    /// Split each box into tiles of `tile_size` cells.
    pub do_tiling: bool,
    pub tile_size: [i32; 3],
    pub aggregation: AggregationType,
    /// Log per-call summaries at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            do_tiling: false,
            tile_size: [1_024_000, 8, 8],
            aggregation: AggregationType::None,
            verbose: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid particle configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tile size must be positive in every dimension when tiling, got {0:?}")]
    InvalidTileSize([i32; 3]),
}

impl ParticleConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.do_tiling && self.tile_size.iter().any(|&n| n <= 0) {
            return Err(ConfigError::InvalidTileSize(self.tile_size));
        }
        Ok(())
    }

    /// Tile size handed to the tiling; zero means one tile per box.
    pub fn effective_tile_size(&self) -> IVec3 {
        if self.do_tiling {
            IVec3::from_array(self.tile_size)
        } else {
            IVec3::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ParticleConfig::from_json(r#"{ "do_tiling": true }"#).unwrap();
        assert!(config.do_tiling);
        assert_eq!(config.tile_size, [1_024_000, 8, 8]);
        assert_eq!(config.aggregation, AggregationType::None);
        assert_eq!(config.effective_tile_size(), IVec3::new(1_024_000, 8, 8));
    }

    #[test]
    fn aggregation_is_snake_case() {
        let config = ParticleConfig::from_json(r#"{ "aggregation": "cell" }"#).unwrap();
        assert_eq!(config.aggregation, AggregationType::Cell);
        assert_eq!(config.effective_tile_size(), IVec3::ZERO);
    }

    #[test]
    fn rejects_non_positive_tiles() {
        let err = ParticleConfig::from_json(r#"{ "do_tiling": true, "tile_size": [4, 0, 4] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTileSize([4, 0, 4])));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ParticleConfig::load("/nonexistent/particles.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
