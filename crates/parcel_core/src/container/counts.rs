use super::{fatal_comm, ParticleContainer};
use crate::arena::ArenaAllocator;
use crate::tile::ParticleTile;
use parcel_comm::ReduceOp;
use parcel_mesh::IndexBox;

/// Particles per cell of one local box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCellCounts {
    pub grid: usize,
    pub validbox: IndexBox,
    /// Indexed by `validbox.linear_index(cell)`.
    pub counts: Vec<u32>,
}

impl GridCellCounts {
    pub fn at(&self, cell: glam::IVec3) -> u32 {
        if self.validbox.contains(cell) {
            self.counts[self.validbox.linear_index(cell)]
        } else {
            0
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

/// Particles in one tile under the counting flags. Neighbor slots only
/// count when neither flag is set.
fn count_tile<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>(
    tile: &ParticleTile<NSR, NSI, NAR, NAI, A>,
    only_valid: bool,
    only_local: bool,
) -> u64 {
    let n = if only_valid {
        tile.aos()[..tile.num_real_particles()].iter().filter(|p| p.is_valid()).count()
    } else if only_local {
        tile.num_real_particles()
    } else {
        tile.len()
    };
    n as u64
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    fn sum_over_ranks(&self, values: &mut [u64]) {
        let mut wide: Vec<i64> = values.iter().map(|&v| v as i64).collect();
        fatal_comm(
            self.comm.rank(),
            "particle count",
            self.comm.allreduce_i64(&mut wide, ReduceOp::Sum),
        );
        for (v, w) in values.iter_mut().zip(wide) {
            *v = w as u64;
        }
    }

    /// Particles on `level`. Collective unless `only_local`, which returns
    /// this rank's share without neighbor slots.
    pub fn number_of_particles_at_level(&self, level: usize, only_valid: bool, only_local: bool) -> u64 {
        let mut n = [self
            .get_particles(level)
            .map(|(_, tile)| count_tile(tile, only_valid, only_local))
            .sum::<u64>()];
        if !only_local {
            self.sum_over_ranks(&mut n);
        }
        n[0]
    }

    /// Particles in each box of `level`, indexed by grid. Collective unless
    /// `only_local`, in which case boxes of other ranks read zero.
    pub fn number_of_particles_in_grid(&self, level: usize, only_valid: bool, only_local: bool) -> Vec<u64> {
        let Ok(mesh) = self.mesh_level(level) else {
            return Vec::new();
        };
        let mut counts = vec![0u64; mesh.ba.len()];
        for (key, tile) in self.get_particles(level) {
            counts[key.grid] += count_tile(tile, only_valid, only_local);
        }
        if !only_local {
            self.sum_over_ranks(&mut counts);
        }
        counts
    }

    /// Particles on every level plus those staged. Collective unless
    /// `only_local`.
    pub fn total_number_of_particles(&self, only_valid: bool, only_local: bool) -> u64 {
        let on_levels: u64 = (0..self.levels.len())
            .flat_map(|lev| self.get_particles(lev))
            .map(|(_, tile)| count_tile(tile, only_valid, only_local))
            .sum();
        let staged = self
            .staged
            .iter()
            .filter(|rec| !only_valid || rec.particle.is_valid())
            .count() as u64;
        let mut n = [on_levels + staged];
        if !only_local {
            self.sum_over_ranks(&mut n);
        }
        n[0]
    }

    /// Per-cell histogram of the valid real particles of each local box on
    /// `level`. Particles whose cell falls outside their box (within a ghost
    /// margin) are skipped. No communication.
    pub fn increment(&self, level: usize) -> Vec<GridCellCounts> {
        self.increment_with_total(level, true).0
    }

    /// [`increment`](Self::increment) plus the number of valid particles on
    /// `level`, summed over ranks unless `local`.
    pub fn increment_with_total(&self, level: usize, local: bool) -> (Vec<GridCellCounts>, u64) {
        let Ok(mesh) = self.mesh_level(level) else {
            return (Vec::new(), 0);
        };
        let rank = self.comm.rank();
        let mut grids: Vec<GridCellCounts> = mesh
            .dmap
            .local_boxes(rank)
            .map(|grid| {
                let validbox = mesh.ba.boxes()[grid];
                GridCellCounts {
                    grid,
                    validbox,
                    counts: vec![0; validbox.num_pts() as usize],
                }
            })
            .collect();

        let mut total = 0u64;
        for (key, tile) in self.get_particles(level) {
            let Some(entry) = grids.iter_mut().find(|g| g.grid == key.grid) else {
                continue;
            };
            for p in &tile.aos()[..tile.num_real_particles()] {
                if !p.is_valid() {
                    continue;
                }
                total += 1;
                let cell = mesh.geom.cell_of(p.pos());
                if mesh.geom.inside_domain(p.pos()) && entry.validbox.contains(cell) {
                    entry.counts[entry.validbox.linear_index(cell)] += 1;
                }
            }
        }

        if !local {
            let mut n = [total];
            self.sum_over_ranks(&mut n);
            total = n[0];
        }
        (grids, total)
    }

    /// Check that every valid particle of levels `lev_min..=lev_max` lies in
    /// its tile's box grown by `n_grow` cells, in a tile this rank owns whose
    /// index matches the tiling. Violations are logged. No communication.
    pub fn ok(&self, lev_min: usize, lev_max: Option<usize>, n_grow: i32) -> bool {
        if !self.is_defined() {
            return self.levels.is_empty();
        }
        let rank = self.comm.rank();
        let lev_max = lev_max.unwrap_or(self.finest_level()).min(self.finest_level());
        let mut good = true;

        for level in lev_min..=lev_max {
            let mesh = &self.mesh.levels[level];
            for (key, tile) in self.get_particles(level) {
                if mesh.owner(key.grid) != Some(rank) {
                    tracing::warn!(rank, ?key, "tile held by a rank that does not own its box");
                    good = false;
                    continue;
                }
                let layout = &mesh.layouts[key.grid];
                if key.tile >= layout.num_tiles() {
                    tracing::warn!(rank, ?key, "tile index out of range");
                    good = false;
                    continue;
                }
                if !tile.lengths_agree() {
                    tracing::warn!(rank, ?key, "tile columns disagree in length");
                    good = false;
                }
                let grown = mesh.ba.boxes()[key.grid].grow(n_grow.max(0));
                for p in &tile.aos()[..tile.num_real_particles()] {
                    if !p.is_valid() {
                        continue;
                    }
                    let pos = p.pos();
                    let cell = mesh.geom.cell_of(pos);
                    let placed = mesh.geom.inside_domain(pos)
                        && grown.contains(cell)
                        && (n_grow > 0 || layout.tile_index_of(cell) == key.tile);
                    if !placed {
                        tracing::warn!(rank, ?key, id = p.id, cpu = p.cpu, ?pos, "particle out of place");
                        good = false;
                    }
                }
            }
        }
        good
    }
}
