//! Parcel Core
//!
//! Distributed storage for particles living on an AMR hierarchy:
//! - Particle records split into an array-of-structs and a struct-of-arrays part
//! - Arena allocators deciding where tile buffers live
//! - Tiles keyed by (level, grid, tile)
//! - The container: initialization, redistribution, counting, sorting
//! - Tile iterators

pub mod arena;
pub mod config;
pub mod container;
pub mod error;
pub mod iter;
pub mod particle;
pub mod tile;

pub use arena::{
    AllocError, ArenaAllocator, ArenaKind, ArenaUsage, ArenaVec, AsyncArena, DeviceArena,
    ManagedArena, PinnedArena, StdArena,
};
pub use config::{AggregationType, ConfigError, ParticleConfig};
pub use container::{
    ContainerSnapshot, GridCellCounts, ParticleContainer, RedistributeOptions,
    RedistributeSummary, TileKey, TileSnapshot,
};
pub use error::ContainerError;
pub use iter::{IterInfo, ParConstIter, ParIter, TileView};
pub use particle::{
    Particle, ParticleInitData, ParticleRecord, ParticleSchema, GHOST_PARTICLE_ID,
    LAST_PARTICLE_ID, VIRTUAL_PARTICLE_ID,
};
pub use tile::{ParticleTile, StructOfArrays};

pub use parcel_comm;
pub use parcel_mesh;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
