//! Read-only view of the AMR hierarchy a container is defined on

use super::TileKey;
use crate::error::ContainerError;
use glam::{DVec3, IVec3};
use parcel_mesh::{BoxArray, BoxLocator, DistributionMapping, Geometry, IndexBox, TileLayout};

pub(crate) struct MeshLevel {
    pub geom: Geometry,
    pub ba: BoxArray,
    pub dmap: DistributionMapping,
    pub locator: BoxLocator,
    pub layouts: Vec<TileLayout>,
}

impl MeshLevel {
    fn new(geom: Geometry, ba: BoxArray, dmap: DistributionMapping, tile_size: IVec3) -> Self {
        let layouts = ba.iter().map(|b| TileLayout::new(b, tile_size)).collect();
        Self {
            locator: ba.locator(),
            geom,
            ba,
            dmap,
            layouts,
        }
    }

    /// Same boxes, owners, geometry and tiling; tiles built for one fit the other.
    pub fn compatible_with(&self, other: &MeshLevel) -> bool {
        self.geom == other.geom && self.ba == other.ba && self.dmap == other.dmap && self.layouts == other.layouts
    }

    pub fn owner(&self, grid: usize) -> Option<usize> {
        self.dmap.owner(grid)
    }

    pub fn tilebox(&self, grid: usize, tile: usize) -> Option<IndexBox> {
        self.layouts.get(grid)?.tilebox(tile)
    }

    pub fn validbox(&self, grid: usize) -> Option<IndexBox> {
        self.ba.get(grid).copied()
    }

    /// Grid and tile holding `cell`, if any box contains it.
    pub fn place_cell(&self, cell: IVec3) -> Option<(usize, usize)> {
        let grid = self.locator.find(cell)?;
        Some((grid, self.layouts[grid].tile_index_of(cell)))
    }
}

pub(crate) struct ParticleMesh {
    pub levels: Vec<MeshLevel>,
    pub ref_ratios: Vec<IVec3>,
}

impl ParticleMesh {
    pub fn empty() -> Self {
        Self {
            levels: Vec::new(),
            ref_ratios: Vec::new(),
        }
    }

    /// Validate a hierarchy description and build the lookup structures.
    pub fn build(
        geoms: Vec<Geometry>,
        dmaps: Vec<DistributionMapping>,
        box_arrays: Vec<BoxArray>,
        ref_ratios: Vec<IVec3>,
        nprocs: usize,
        tile_size: IVec3,
    ) -> Result<Self, ContainerError> {
        let levels = geoms.len();
        if dmaps.len() != levels || box_arrays.len() != levels {
            return Err(ContainerError::LevelCountMismatch {
                geoms: levels,
                dmaps: dmaps.len(),
                box_arrays: box_arrays.len(),
            });
        }
        if levels == 0 {
            return Err(ContainerError::NoLevels);
        }
        if ref_ratios.len() != levels - 1 {
            return Err(ContainerError::RefRatioCountMismatch {
                levels,
                expected: levels - 1,
                actual: ref_ratios.len(),
            });
        }

        for (lev, (geom, (ba, dmap))) in geoms.iter().zip(box_arrays.iter().zip(&dmaps)).enumerate() {
            dmap.validate(ba, nprocs)?;
            ba.validate_disjoint()?;
            if let Some(grid) = ba.iter().position(|b| !geom.domain().contains_box(b)) {
                return Err(ContainerError::BoxOutsideDomain { level: lev, grid });
            }
            if lev > 0 {
                let ratio = ref_ratios[lev - 1];
                let refined = geoms[lev - 1].refine(ratio)?;
                if refined.domain() != geom.domain() {
                    return Err(ContainerError::InconsistentRefinement {
                        level: lev,
                        ratio: ratio.to_array(),
                    });
                }
            }
        }

        let levels = geoms
            .into_iter()
            .zip(box_arrays.into_iter().zip(dmaps))
            .map(|(geom, (ba, dmap))| MeshLevel::new(geom, ba, dmap, tile_size))
            .collect();
        Ok(Self { levels, ref_ratios })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Finest level at or below `lev_max` whose boxes contain `pos`, searched
    /// down to `lev_min`. Positions outside a non-periodic domain edge have no
    /// home.
    pub fn locate(&self, pos: DVec3, lev_min: usize, lev_max: usize) -> Option<TileKey> {
        let geom = &self.levels.first()?.geom;
        if !geom.inside_domain(pos) {
            return None;
        }
        let top = lev_max.min(self.levels.len().checked_sub(1)?);
        (lev_min..=top).rev().find_map(|level| {
            let mesh = &self.levels[level];
            let (grid, tile) = mesh.place_cell(mesh.geom.cell_of(pos))?;
            Some(TileKey { level, grid, tile })
        })
    }

    /// Whether a level in `level+1..=lev_max` has a box containing `pos`.
    pub fn covered_by_finer(&self, pos: DVec3, level: usize, lev_max: usize) -> bool {
        let top = lev_max.min(self.levels.len().saturating_sub(1));
        (level + 1..=top).any(|l| {
            let mesh = &self.levels[l];
            mesh.locator.covers(mesh.geom.cell_of(pos))
        })
    }
}
