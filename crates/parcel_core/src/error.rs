use crate::particle::ParticleSchema;
use parcel_mesh::MeshError;
use thiserror::Error;

/// Errors returned by container operations.
///
/// A failed call leaves the container exactly as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContainerError {
    #[error("a particle hierarchy needs at least one level")]
    NoLevels,

    #[error("{geoms} geometries, {dmaps} distribution maps and {box_arrays} box arrays do not describe the same levels")]
    LevelCountMismatch {
        geoms: usize,
        dmaps: usize,
        box_arrays: usize,
    },

    #[error("{levels} levels need {expected} refinement ratios, got {actual}")]
    RefRatioCountMismatch {
        levels: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("level {level} domain is not the level {coarser} domain refined by {ratio:?}", coarser = .level - 1)]
    InconsistentRefinement { level: usize, ratio: [i32; 3] },

    #[error("grid {grid} on level {level} lies outside the level domain")]
    BoxOutsideDomain { level: usize, grid: usize },

    #[error("level {level} is not defined ({num_levels} levels)")]
    LevelOutOfRange { level: usize, num_levels: usize },

    #[error("grid {grid} does not exist on level {level}")]
    GridOutOfRange { level: usize, grid: usize },

    #[error("tile {tile} does not exist in grid {grid} on level {level}")]
    TileOutOfRange {
        level: usize,
        grid: usize,
        tile: usize,
    },

    #[error("grid {grid} on level {level} is owned by rank {owner}, not rank {rank}")]
    TileNotLocal {
        level: usize,
        grid: usize,
        owner: usize,
        rank: usize,
    },

    #[error("particle schema mismatch: container has {expected:?}, data has {found:?}")]
    SchemaMismatch {
        expected: ParticleSchema,
        found: ParticleSchema,
    },

    #[error("tile data is inconsistent: {0}")]
    MalformedTile(String),

    #[error("particle ids exhausted on rank {rank}")]
    IdSpaceExhausted { rank: usize },

    #[error("ghost particles are built from the next coarser level; level 0 has none")]
    GhostLevelZero,
}
