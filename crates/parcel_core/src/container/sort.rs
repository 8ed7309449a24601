use super::{report, ParticleContainer};
use crate::arena::ArenaAllocator;
use glam::IVec3;
use rayon::prelude::*;

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    /// Order the real particles of every tile by cell, z slowest. Stable, so
    /// particles sharing a cell keep their relative order.
    pub fn sort_particles_by_cell(&mut self) {
        self.sort_particles_by_bin(IVec3::ONE);
    }

    /// Order the real particles of every tile by bins of `bin_size` cells
    /// anchored at the tile's low corner, z slowest. Components below one
    /// are treated as one. Neighbor slots are left in place.
    pub fn sort_particles_by_bin(&mut self, bin_size: IVec3) {
        let bin = bin_size.max(IVec3::ONE);
        let rank = self.comm.rank();
        let mesh = &self.mesh;
        let mut sorted = 0usize;

        for (lev, level) in self.levels.iter_mut().enumerate() {
            let geom = &mesh.levels[lev].geom;
            let layouts = &mesh.levels[lev].layouts;
            let keys = &level.keys;
            sorted += level
                .tiles
                .par_iter_mut()
                .enumerate()
                .map(|(slot, tile)| {
                    let (grid, t) = keys[slot];
                    let anchor = layouts[grid].tilebox(t).map_or(IVec3::ZERO, |b| b.lo());
                    let n = tile.num_real_particles();
                    let bins: Vec<[i32; 3]> = tile.aos()[..n]
                        .iter()
                        .map(|p| {
                            let b = (geom.cell_of(p.pos()) - anchor).div_euclid(bin);
                            [b.z, b.y, b.x]
                        })
                        .collect();
                    if bins.windows(2).all(|w| w[0] <= w[1]) {
                        return 0;
                    }
                    let mut order: Vec<usize> = (0..n).collect();
                    order.sort_by_key(|&i| bins[i]);
                    tile.apply_permutation(&order);
                    1
                })
                .sum::<usize>();
        }
        report!(self.config.verbose, rank, tiles = sorted, bin = ?bin.to_array(), "sorted particles");
    }
}
