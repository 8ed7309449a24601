//! Run settings

use anyhow::{ensure, Context, Result};
use parcel_comm::LocalCommConfig;
use parcel_core::ParticleConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Demo run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Rank threads to spawn.
    pub ranks: usize,
    /// Cells per side of the level-0 domain (unit cube).
    pub cells: i32,
    pub max_grid_size: i32,
    pub periodic: bool,
    /// Add a level refining the lower octant by two.
    pub refine: bool,
    pub particles: u64,
    pub seed: u64,
    pub steps: usize,
    pub dt: f64,
    /// Largest speed along each axis.
    pub max_speed: f64,
    /// Log counts every this many steps.
    pub report_every: usize,
    pub particle: ParticleConfig,
    pub comm: LocalCommConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ranks: 4,
            cells: 32,
            max_grid_size: 8,
            periodic: true,
            refine: false,
            particles: 100_000,
            seed: 1,
            steps: 20,
            dt: 0.01,
            max_speed: 1.0,
            report_every: 5,
            particle: ParticleConfig::default(),
            comm: LocalCommConfig::default(),
        }
    }
}

impl RunSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.ranks > 0, "ranks must be positive");
        ensure!(self.cells > 0 && self.max_grid_size > 0, "cells and max_grid_size must be positive");
        ensure!(self.dt.is_finite() && self.max_speed.is_finite(), "dt and max_speed must be finite");
        self.particle.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: RunSettings = serde_json::from_str(r#"{ "ranks": 2, "particle": { "do_tiling": true } }"#).unwrap();
        assert_eq!(s.ranks, 2);
        assert!(s.particle.do_tiling);
        assert_eq!(s.steps, RunSettings::default().steps);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_ranks_is_rejected() {
        let s = RunSettings {
            ranks: 0,
            ..RunSettings::default()
        };
        assert!(s.validate().is_err());
    }
}
