//! Particle container
//!
//! Per level, the container owns the tiles of every locally owned
//! (grid, tile) pair that has been touched: a dense `Vec` of tiles plus an
//! ordered `(grid, tile) -> slot` index. Slots never move while the level
//! exists, so the index stays valid across redistributions.
//!
//! Operations are split by concern:
//! - `lifecycle`: structural changes (adding, removing, copying, components)
//! - `init`: random and per-cell population
//! - `redistribute`: restoring the ownership invariant
//! - `counts`: particle counts, per-cell histograms and consistency checks
//! - `sort`: in-tile ordering
//! - `capacity`: buffer sizing and memory diagnostics
//! - `snapshot`: serde image of the local tiles

mod capacity;
mod counts;
mod init;
mod lifecycle;
mod mesh;
mod redistribute;
mod snapshot;
mod sort;

#[cfg(test)]
mod tests;

pub use counts::GridCellCounts;
pub use redistribute::{RedistributeOptions, RedistributeSummary};
pub use snapshot::{ContainerSnapshot, TileSnapshot};

pub(crate) use mesh::{MeshLevel, ParticleMesh};

use crate::arena::{ArenaAllocator, StdArena};
use crate::config::ParticleConfig;
use crate::error::ContainerError;
use crate::particle::{ParticleRecord, ParticleSchema};
use crate::tile::ParticleTile;
use glam::IVec3;
use parcel_comm::{CommError, Communicator};
use parcel_metrics::{Counter, PhaseProfiler};
use parcel_mesh::{BoxArray, DistributionMapping, Geometry, IndexBox};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Log at `info` when the container is verbose, `debug` otherwise.
macro_rules! report {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}
pub(crate) use report;

/// Address of one tile: level, grid (box index) and local tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub level: usize,
    pub grid: usize,
    pub tile: usize,
}

impl TileKey {
    pub fn new(level: usize, grid: usize, tile: usize) -> Self {
        Self { level, grid, tile }
    }

    /// `(grid, tile)`
    pub fn pair_index(&self) -> (usize, usize) {
        (self.grid, self.tile)
    }
}

/// Abort the run on a failed collective. Losing particles silently is worse.
pub(crate) fn fatal_comm<T>(rank: usize, what: &str, result: Result<T, CommError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(rank, %err, "{what}: communication failed");
            panic!("{what}: communication failed on rank {rank}: {err}");
        }
    }
}

/// Tiles of one level.
pub(crate) struct ParticleLevel<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator> {
    pub tiles: Vec<ParticleTile<NSR, NSI, NAR, NAI, A>>,
    pub keys: Vec<(usize, usize)>,
    pub index: BTreeMap<(usize, usize), usize>,
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleLevel<NSR, NSI, NAR, NAI, A>
{
    pub fn new() -> Self {
        Self {
            tiles: Vec::new(),
            keys: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn get(&self, pair: (usize, usize)) -> Option<&ParticleTile<NSR, NSI, NAR, NAI, A>> {
        self.index.get(&pair).map(|&slot| &self.tiles[slot])
    }

    pub fn get_mut(&mut self, pair: (usize, usize)) -> Option<&mut ParticleTile<NSR, NSI, NAR, NAI, A>> {
        self.index.get(&pair).map(|&slot| &mut self.tiles[slot])
    }

    pub fn get_or_insert_with(
        &mut self,
        pair: (usize, usize),
        make: impl FnOnce() -> ParticleTile<NSR, NSI, NAR, NAI, A>,
    ) -> &mut ParticleTile<NSR, NSI, NAR, NAI, A> {
        let slot = match self.index.get(&pair) {
            Some(&slot) => slot,
            None => {
                let slot = self.tiles.len();
                self.tiles.push(make());
                self.keys.push(pair);
                self.index.insert(pair, slot);
                slot
            }
        };
        &mut self.tiles[slot]
    }

    /// Tiles in ascending `(grid, tile)` order.
    pub fn ordered(&self) -> impl Iterator<Item = ((usize, usize), &ParticleTile<NSR, NSI, NAR, NAI, A>)> + '_ {
        self.index.iter().map(|(&pair, &slot)| (pair, &self.tiles[slot]))
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Move every real particle out, dropping neighbor slots and the tiles.
    pub fn drain_into(self, out: &mut Vec<ParticleRecord<NSR, NSI, NAR, NAI>>) -> usize {
        let mut moved = 0;
        for (_, slot) in self.index {
            let tile = &self.tiles[slot];
            for i in 0..tile.num_real_particles() {
                out.push(tile.record(i));
                moved += 1;
            }
        }
        moved
    }
}

/// Distributed container of particles with schema `(NSR, NSI, NAR, NAI)`
/// whose buffers come from arena `A`.
pub struct ParticleContainer<
    const NSR: usize,
    const NSI: usize,
    const NAR: usize,
    const NAI: usize,
    A: ArenaAllocator = StdArena,
> {
    config: ParticleConfig,
    comm: Arc<dyn Communicator>,
    alloc: A,
    mesh: ParticleMesh,
    levels: Vec<ParticleLevel<NSR, NSI, NAR, NAI, A>>,
    /// Particles waiting for a home: drained by a regrid or added off-level.
    staged: Vec<ParticleRecord<NSR, NSI, NAR, NAI>>,
    next_id: i64,
    n_runtime_real: usize,
    n_runtime_int: usize,
    counters: Counter,
    profiler: PhaseProfiler,
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> ParticleContainer<NSR, NSI, NAR, NAI, StdArena> {
    /// Empty, undefined container in host memory.
    pub fn new(config: ParticleConfig, comm: Arc<dyn Communicator>) -> Self {
        Self::new_in(config, comm, StdArena)
    }
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    pub const N_STRUCT_REAL: usize = NSR;
    pub const N_STRUCT_INT: usize = NSI;
    pub const N_ARRAY_REAL: usize = NAR;
    pub const N_ARRAY_INT: usize = NAI;

    /// Empty, undefined container whose tiles allocate from `alloc`.
    pub fn new_in(config: ParticleConfig, comm: Arc<dyn Communicator>, alloc: A) -> Self {
        Self {
            config,
            comm,
            alloc,
            mesh: ParticleMesh::empty(),
            levels: Vec::new(),
            staged: Vec::new(),
            next_id: 1,
            n_runtime_real: 0,
            n_runtime_int: 0,
            counters: Counter::new(),
            profiler: PhaseProfiler::new(),
        }
    }

    /// Bind the container to a hierarchy.
    ///
    /// `ref_ratios[l]` is the ratio between levels `l` and `l + 1`. On error
    /// nothing changes. Levels whose geometry, boxes or owners changed give
    /// up their particles to the staging area; the next `redistribute`
    /// routes them.
    pub fn define(
        &mut self,
        geoms: Vec<Geometry>,
        dmaps: Vec<DistributionMapping>,
        box_arrays: Vec<BoxArray>,
        ref_ratios: Vec<IVec3>,
    ) -> Result<(), ContainerError> {
        let mesh = ParticleMesh::build(
            geoms,
            dmaps,
            box_arrays,
            ref_ratios,
            self.comm.size(),
            self.config.effective_tile_size(),
        )?;
        let old_mesh = std::mem::replace(&mut self.mesh, mesh);
        let old_levels = std::mem::take(&mut self.levels);

        let num_levels = self.mesh.num_levels();
        let mut levels: Vec<_> = (0..num_levels).map(|_| ParticleLevel::new()).collect();
        let mut staged = 0;
        for (lev, old) in old_levels.into_iter().enumerate() {
            let keep = lev < num_levels
                && old_mesh
                    .levels
                    .get(lev)
                    .is_some_and(|m| m.compatible_with(&self.mesh.levels[lev]));
            if keep {
                levels[lev] = old;
            } else {
                staged += old.drain_into(&mut self.staged);
            }
        }
        self.levels = levels;

        report!(
            self.config.verbose,
            rank = self.comm.rank(),
            levels = num_levels,
            staged,
            "particle container defined"
        );
        Ok(())
    }

    /// Single-level shorthand for [`define`](Self::define).
    pub fn define_single_level(
        &mut self,
        geom: Geometry,
        dmap: DistributionMapping,
        box_array: BoxArray,
    ) -> Result<(), ContainerError> {
        self.define(vec![geom], vec![dmap], vec![box_array], Vec::new())
    }

    pub fn is_defined(&self) -> bool {
        self.mesh.num_levels() > 0
    }

    pub fn num_levels(&self) -> usize {
        self.mesh.num_levels()
    }

    pub fn finest_level(&self) -> usize {
        self.mesh.num_levels().saturating_sub(1)
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// # Panics
    /// If `level` is not defined.
    pub fn geom(&self, level: usize) -> &Geometry {
        &self.mesh.levels[level].geom
    }

    /// # Panics
    /// If `level` is not defined.
    pub fn box_array(&self, level: usize) -> &BoxArray {
        &self.mesh.levels[level].ba
    }

    /// # Panics
    /// If `level` is not defined.
    pub fn distribution_map(&self, level: usize) -> &DistributionMapping {
        &self.mesh.levels[level].dmap
    }

    /// Cells covered by the tile at `key`.
    pub fn tile_box(&self, key: TileKey) -> Option<IndexBox> {
        self.mesh.levels.get(key.level)?.tilebox(key.grid, key.tile)
    }

    /// Ratio between `level` and `level + 1`.
    pub fn ref_ratio(&self, level: usize) -> Option<IVec3> {
        self.mesh.ref_ratios.get(level).copied()
    }

    pub fn schema(&self) -> ParticleSchema {
        ParticleSchema {
            n_struct_real: NSR,
            n_struct_int: NSI,
            n_array_real: NAR,
            n_array_int: NAI,
            n_runtime_real: self.n_runtime_real,
            n_runtime_int: self.n_runtime_int,
        }
    }

    pub fn num_runtime_real_comps(&self) -> usize {
        self.n_runtime_real
    }

    pub fn num_runtime_int_comps(&self) -> usize {
        self.n_runtime_int
    }

    /// Particles waiting for the next `redistribute`.
    pub fn num_staged(&self) -> usize {
        self.staged.len()
    }

    pub fn counters(&self) -> &Counter {
        &self.counters
    }

    pub fn profiler(&self) -> &PhaseProfiler {
        &self.profiler
    }

    /// Detached tile with this container's arena and component layout, for
    /// `add_particles_at_level` and the virtual/ghost builders.
    pub fn new_tile(&self) -> ParticleTile<NSR, NSI, NAR, NAI, A> {
        ParticleTile::new_in(self.alloc.clone(), self.n_runtime_real, self.n_runtime_int)
    }

    pub(crate) fn mesh_level(&self, level: usize) -> Result<&MeshLevel, ContainerError> {
        self.mesh.levels.get(level).ok_or(ContainerError::LevelOutOfRange {
            level,
            num_levels: self.mesh.num_levels(),
        })
    }

    /// Check that `key` names a tile this rank may hold.
    pub(crate) fn check_tile(&self, key: TileKey) -> Result<(), ContainerError> {
        let mesh = self.mesh_level(key.level)?;
        let owner = mesh.owner(key.grid).ok_or(ContainerError::GridOutOfRange {
            level: key.level,
            grid: key.grid,
        })?;
        let rank = self.comm.rank();
        if owner != rank {
            return Err(ContainerError::TileNotLocal {
                level: key.level,
                grid: key.grid,
                owner,
                rank,
            });
        }
        if key.tile >= mesh.layouts[key.grid].num_tiles() {
            return Err(ContainerError::TileOutOfRange {
                level: key.level,
                grid: key.grid,
                tile: key.tile,
            });
        }
        Ok(())
    }

    /// Tile for an already validated key, created on first use.
    pub(crate) fn tile_entry(&mut self, key: TileKey) -> &mut ParticleTile<NSR, NSI, NAR, NAI, A> {
        let alloc = self.alloc.clone();
        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);
        self.levels[key.level].get_or_insert_with(key.pair_index(), || ParticleTile::new_in(alloc, n_real, n_int))
    }

    /// Tile `(level, grid, tile)`, created empty if it does not exist yet.
    pub fn define_and_return_particle_tile(
        &mut self,
        level: usize,
        grid: usize,
        tile: usize,
    ) -> Result<&mut ParticleTile<NSR, NSI, NAR, NAI, A>, ContainerError> {
        let key = TileKey::new(level, grid, tile);
        self.check_tile(key)?;
        Ok(self.tile_entry(key))
    }

    /// # Panics
    /// If the tile has not been defined on this rank.
    pub fn particles_at(&self, level: usize, grid: usize, tile: usize) -> &ParticleTile<NSR, NSI, NAR, NAI, A> {
        match self.try_particles_at(level, grid, tile) {
            Some(t) => t,
            None => panic!("no particle tile at level {level}, grid {grid}, tile {tile} on this rank"),
        }
    }

    /// # Panics
    /// If the tile has not been defined on this rank.
    pub fn particles_at_mut(
        &mut self,
        level: usize,
        grid: usize,
        tile: usize,
    ) -> &mut ParticleTile<NSR, NSI, NAR, NAI, A> {
        match self.levels.get_mut(level).and_then(|l| l.get_mut((grid, tile))) {
            Some(t) => t,
            None => panic!("no particle tile at level {level}, grid {grid}, tile {tile} on this rank"),
        }
    }

    pub fn try_particles_at(&self, level: usize, grid: usize, tile: usize) -> Option<&ParticleTile<NSR, NSI, NAR, NAI, A>> {
        self.levels.get(level)?.get((grid, tile))
    }

    /// Every defined tile of `level`, ascending `(grid, tile)`.
    pub fn get_particles(
        &self,
        level: usize,
    ) -> impl Iterator<Item = (TileKey, &ParticleTile<NSR, NSI, NAR, NAI, A>)> + '_ {
        self.levels
            .get(level)
            .into_iter()
            .flat_map(move |l| l.ordered().map(move |((grid, tile), t)| (TileKey { level, grid, tile }, t)))
    }

    pub fn num_local_tiles_at_level(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.num_tiles())
    }

    /// Run `f` on every tile of `level`, tiles spread over the rayon pool.
    pub fn par_for_each_tile_mut<F>(&mut self, level: usize, f: F)
    where
        F: Fn(TileKey, &mut ParticleTile<NSR, NSI, NAR, NAI, A>) + Sync + Send,
    {
        let Some(lev) = self.levels.get_mut(level) else {
            return;
        };
        let keys = &lev.keys;
        lev.tiles.par_iter_mut().enumerate().for_each(|(slot, tile)| {
            let (grid, t) = keys[slot];
            f(TileKey { level, grid, tile: t }, tile);
        });
    }

    /// `(key, slot)` of the tiles of `level` whose tilebox meets `region`,
    /// ascending by key. Empty tiles are left out unless `include_empty`.
    pub(crate) fn tile_cursor(
        &self,
        level: usize,
        region: Option<IndexBox>,
        include_empty: bool,
    ) -> Vec<(TileKey, usize)> {
        let (Some(lev), Some(mesh)) = (self.levels.get(level), self.mesh.levels.get(level)) else {
            return Vec::new();
        };
        lev.index
            .iter()
            .filter(|&(_, &slot)| include_empty || !lev.tiles[slot].is_empty())
            .filter(|&(&(grid, tile), _)| match (region, mesh.tilebox(grid, tile)) {
                (Some(r), Some(tb)) => tb.intersects(&r),
                _ => true,
            })
            .map(|(&(grid, tile), &slot)| (TileKey { level, grid, tile }, slot))
            .collect()
    }

    pub(crate) fn tile_at_slot(&self, level: usize, slot: usize) -> &ParticleTile<NSR, NSI, NAR, NAI, A> {
        &self.levels[level].tiles[slot]
    }

    pub(crate) fn tile_at_slot_mut(&mut self, level: usize, slot: usize) -> &mut ParticleTile<NSR, NSI, NAR, NAI, A> {
        &mut self.levels[level].tiles[slot]
    }

    /// Create every tile this rank owns on `level` whose tilebox meets
    /// `region` (all of them when `None`).
    pub(crate) fn define_local_tiles(&mut self, level: usize, region: Option<IndexBox>) {
        let Some(mesh) = self.mesh.levels.get(level) else {
            return;
        };
        let rank = self.comm.rank();
        let mut keys = Vec::new();
        for grid in mesh.dmap.local_boxes(rank) {
            let layout = &mesh.layouts[grid];
            for tile in 0..layout.num_tiles() {
                let hit = match (region, layout.tilebox(tile)) {
                    (Some(r), Some(tb)) => tb.intersects(&r),
                    _ => true,
                };
                if hit {
                    keys.push(TileKey { level, grid, tile });
                }
            }
        }
        for key in keys {
            self.tile_entry(key);
        }
    }

    pub(crate) fn next_particle_id(&mut self) -> Result<i64, ContainerError> {
        if self.next_id >= crate::particle::VIRTUAL_PARTICLE_ID {
            return Err(ContainerError::IdSpaceExhausted { rank: self.comm.rank() });
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }
}
