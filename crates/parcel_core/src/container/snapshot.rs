//! Serde image of a rank's particles
//!
//! A snapshot holds every local tile column by column (neighbor slots
//! included) plus the per-level counts. Restoring validates the whole
//! snapshot before touching the container.

use super::{report, ParticleContainer, TileKey};
use crate::arena::ArenaAllocator;
use crate::error::ContainerError;
use crate::particle::{Particle, ParticleRecord, ParticleSchema};
use serde::{Deserialize, Serialize};

/// Columns of one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSnapshot {
    pub key: TileKey,
    pub num_neighbors: usize,
    /// `[x, y, z]` per particle.
    pub positions: Vec<[f64; 3]>,
    /// `NSR` values per particle, particle-major.
    pub struct_real: Vec<f64>,
    pub ids: Vec<i64>,
    pub cpus: Vec<i32>,
    /// `NSI` values per particle, particle-major.
    pub struct_int: Vec<i32>,
    /// One column per array real, runtime columns last.
    pub array_real: Vec<Vec<f64>>,
    /// One column per array int, runtime columns last.
    pub array_int: Vec<Vec<i32>>,
}

impl TileSnapshot {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn check(&self, schema: &ParticleSchema) -> Result<(), String> {
        let n = self.len();
        if self.positions.len() != n || self.cpus.len() != n {
            return Err(format!("{:?}: position/cpu columns do not match {n} ids", self.key));
        }
        if self.struct_real.len() != n * schema.n_struct_real || self.struct_int.len() != n * schema.n_struct_int {
            return Err(format!("{:?}: struct data does not match {n} particles", self.key));
        }
        if self.array_real.len() != schema.n_array_real + schema.n_runtime_real
            || self.array_int.len() != schema.n_array_int + schema.n_runtime_int
        {
            return Err(format!("{:?}: wrong number of array columns", self.key));
        }
        if self.array_real.iter().any(|c| c.len() != n) || self.array_int.iter().any(|c| c.len() != n) {
            return Err(format!("{:?}: array column length differs from {n}", self.key));
        }
        if self.num_neighbors > n {
            return Err(format!("{:?}: {} neighbors in a tile of {n}", self.key, self.num_neighbors));
        }
        Ok(())
    }
}

/// Every local tile of one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub schema: ParticleSchema,
    pub rank: usize,
    /// Real particles per level on this rank.
    pub level_counts: Vec<u64>,
    pub tiles: Vec<TileSnapshot>,
}

impl ContainerSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    /// Copy this rank's tiles out, ascending by key. Staged particles are
    /// not included.
    pub fn snapshot(&self) -> ContainerSnapshot {
        self.alloc.synchronize();
        let mut tiles = Vec::new();
        let mut level_counts = Vec::with_capacity(self.levels.len());
        for level in 0..self.levels.len() {
            let mut count = 0u64;
            for (key, tile) in self.get_particles(level) {
                count += tile.num_real_particles() as u64;
                let aos = tile.aos();
                let soa = tile.soa();
                tiles.push(TileSnapshot {
                    key,
                    num_neighbors: tile.num_neighbor_particles(),
                    positions: aos.iter().map(|p| p.pos).collect(),
                    struct_real: aos.iter().flat_map(|p| p.rdata).collect(),
                    ids: aos.iter().map(|p| p.id).collect(),
                    cpus: aos.iter().map(|p| p.cpu).collect(),
                    struct_int: aos.iter().flat_map(|p| p.idata).collect(),
                    array_real: (0..soa.num_real_comps()).map(|c| soa.real(c).to_vec()).collect(),
                    array_int: (0..soa.num_int_comps()).map(|c| soa.int(c).to_vec()).collect(),
                });
            }
            level_counts.push(count);
        }
        ContainerSnapshot {
            schema: self.schema(),
            rank: self.comm.rank(),
            level_counts,
            tiles,
        }
    }

    /// Replace this rank's particles with the contents of `snap`.
    ///
    /// The fixed schema must match; runtime components missing here are
    /// added. Every tile must be one this rank may hold. On error nothing
    /// changes.
    pub fn restore_snapshot(&mut self, snap: &ContainerSnapshot) -> Result<(), ContainerError> {
        let mine = self.schema();
        let fits = snap.schema.static_part() == mine.static_part()
            && snap.schema.n_runtime_real >= mine.n_runtime_real
            && snap.schema.n_runtime_int >= mine.n_runtime_int;
        if !fits {
            return Err(ContainerError::SchemaMismatch {
                expected: mine,
                found: snap.schema,
            });
        }
        for tile in &snap.tiles {
            self.check_tile(tile.key)?;
            tile.check(&snap.schema).map_err(ContainerError::MalformedTile)?;
        }

        while self.n_runtime_real < snap.schema.n_runtime_real {
            self.add_real_comp();
        }
        while self.n_runtime_int < snap.schema.n_runtime_int {
            self.add_int_comp();
        }
        self.clear_particles();

        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);
        let mut restored = 0usize;
        for ts in &snap.tiles {
            let n = ts.len();
            let tile = self.tile_entry(ts.key);
            for i in 0..n {
                let mut particle = Particle::<NSR, NSI>::default();
                particle.pos = ts.positions[i];
                particle.rdata.copy_from_slice(&ts.struct_real[i * NSR..(i + 1) * NSR]);
                particle.id = ts.ids[i];
                particle.cpu = ts.cpus[i];
                particle.idata.copy_from_slice(&ts.struct_int[i * NSI..(i + 1) * NSI]);
                let rec = ParticleRecord {
                    particle,
                    real: std::array::from_fn(|c| ts.array_real[c][i]),
                    int: std::array::from_fn(|c| ts.array_int[c][i]),
                    runtime_real: (0..n_real).map(|c| ts.array_real[NAR + c][i]).collect(),
                    runtime_int: (0..n_int).map(|c| ts.array_int[NAI + c][i]).collect(),
                };
                if i < n - ts.num_neighbors {
                    tile.push_record(&rec);
                } else {
                    tile.push_neighbor(&rec);
                }
            }
            restored += n;
        }
        report!(self.config.verbose, rank = self.comm.rank(), tiles = snap.tiles.len(), restored, "snapshot restored");
        Ok(())
    }
}
