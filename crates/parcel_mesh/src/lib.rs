//! Parcel Mesh Description
//!
//! Index-space and physical-space description of an AMR hierarchy as consumed
//! by the particle container:
//! - Index boxes and box arrays (spatial decomposition of one level)
//! - Distribution mappings (box -> owning rank)
//! - Geometry (physical extent, periodicity, cell size)
//! - Tiling of a box into sub-tiles
//!
//! The container never mutates any of these once defined.

mod box_array;
mod distribution;
mod error;
mod geometry;
mod index_box;
mod locator;
mod tiling;

pub use box_array::BoxArray;
pub use distribution::DistributionMapping;
pub use error::MeshError;
pub use geometry::{Geometry, RealBox};
pub use index_box::IndexBox;
pub use locator::BoxLocator;
pub use tiling::TileLayout;

pub use glam::{DVec3, IVec3};

/// Number of spatial dimensions of every mesh and particle.
pub const SPACEDIM: usize = 3;
