use super::{fatal_comm, report, ParticleContainer, RedistributeOptions, TileKey};
use crate::arena::ArenaAllocator;
use crate::error::ContainerError;
use crate::particle::{next_below, ParticleInitData};
use glam::DVec3;
use parcel_comm::ReduceOp;
use parcel_mesh::RealBox;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Uniform point in `[lo, hi)` per dimension.
fn sample(rng: &mut ChaCha8Rng, lo: DVec3, hi: DVec3) -> DVec3 {
    let u = DVec3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
    let mut pos = lo + (hi - lo) * u;
    for dim in 0..3 {
        if pos[dim] >= hi[dim] {
            pos[dim] = next_below(hi[dim]);
        }
    }
    pos
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    /// Scatter `count` particles uniformly over `bounding_box` (the problem
    /// domain when `None`).
    ///
    /// With `serialize`, every rank draws the same global stream from `seed`
    /// and keeps the particles it owns. Ids run `base + 0 .. base + count` with
    /// cpu 0, where `base` is the largest next id of any rank, so the result
    /// does not depend on the decomposition and never reuses an id. Otherwise each rank draws
    /// its share from `seed + rank` and a `redistribute` sends particles home
    /// (collective).
    pub fn init_random(
        &mut self,
        count: u64,
        seed: u64,
        init: &ParticleInitData<NSR, NSI, NAR, NAI>,
        serialize: bool,
        bounding_box: Option<RealBox>,
    ) -> Result<(), ContainerError> {
        let geom = self.mesh_level(0)?.geom.clone();
        let region = bounding_box.unwrap_or(geom.prob_domain());
        let rank = self.comm.rank();
        let nprocs = self.comm.size() as u64;
        let finest = self.finest_level();
        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);

        if serialize {
            let mut base = [self.next_id];
            fatal_comm(rank, "init_random", self.comm.allreduce_i64(&mut base, ReduceOp::Max));
            let base = base[0];
            let end = i64::try_from(count)
                .ok()
                .and_then(|n| base.checked_add(n))
                .filter(|&end| end <= crate::particle::VIRTUAL_PARTICLE_ID)
                .ok_or(ContainerError::IdSpaceExhausted { rank })?;

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut kept = 0usize;
            for i in 0..count {
                let pos = sample(&mut rng, region.lo(), region.hi());
                let Some(key) = self.mesh.locate(pos, 0, finest) else {
                    continue;
                };
                if self.mesh.levels[key.level].owner(key.grid) != Some(rank) {
                    continue;
                }
                let rec = init.record(pos, base + i as i64, 0, n_real, n_int);
                self.tile_entry(key).push_record(&rec);
                kept += 1;
            }
            self.next_id = end;
            report!(self.config.verbose, rank, count, kept, "init_random (serialized)");
        } else {
            let share = count / nprocs + u64::from((rank as u64) < count % nprocs);
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(rank as u64));
            for _ in 0..share {
                let pos = sample(&mut rng, region.lo(), region.hi());
                let id = self.next_particle_id()?;
                self.staged.push(init.record(pos, id, rank as i32, n_real, n_int));
            }
            report!(self.config.verbose, rank, count, share, "init_random");
            self.redistribute(RedistributeOptions::default());
        }
        Ok(())
    }

    /// Put `count_per_box` random particles in every level-0 box this rank
    /// owns. Box `b` draws from `seed + b`, so each box's particles do not
    /// depend on the decomposition. No communication.
    pub fn init_random_per_box(
        &mut self,
        count_per_box: u64,
        seed: u64,
        init: &ParticleInitData<NSR, NSI, NAR, NAI>,
    ) -> Result<(), ContainerError> {
        let mesh = self.mesh_level(0)?;
        let geom = mesh.geom.clone();
        let rank = self.comm.rank();
        let grids: Vec<usize> = mesh.dmap.local_boxes(rank).collect();
        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);

        for grid in grids {
            let valid = self.mesh.levels[0].ba.boxes()[grid];
            let extent = geom.real_box_of(&valid);
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(grid as u64));
            for _ in 0..count_per_box {
                let mut pos = sample(&mut rng, extent.lo(), extent.hi());
                let mut cell = geom.cell_of(pos);
                if !valid.contains(cell) {
                    cell = cell.clamp(valid.lo(), valid.hi());
                    pos = geom.cell_center(cell);
                }
                let tile = self.mesh.levels[0].layouts[grid].tile_index_of(cell);
                let id = self.next_particle_id()?;
                let rec = init.record(pos, id, rank as i32, n_real, n_int);
                self.tile_entry(TileKey { level: 0, grid, tile }).push_record(&rec);
            }
        }
        Ok(())
    }

    /// One particle in every cell of every level-0 box this rank owns, at
    /// fractional offset `(x_off, y_off, z_off)` from the cell's low corner.
    /// Offsets are clamped so the particle stays inside its cell.
    pub fn init_one_per_cell(
        &mut self,
        x_off: f64,
        y_off: f64,
        z_off: f64,
        init: &ParticleInitData<NSR, NSI, NAR, NAI>,
    ) -> Result<(), ContainerError> {
        let mesh = self.mesh_level(0)?;
        let geom = mesh.geom.clone();
        let rank = self.comm.rank();
        let grids: Vec<usize> = mesh.dmap.local_boxes(rank).collect();
        let offset = DVec3::new(x_off, y_off, z_off).clamp(DVec3::ZERO, DVec3::ONE);
        let dx = geom.cell_size();
        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);

        let mut created = 0usize;
        for grid in grids {
            let valid = self.mesh.levels[0].ba.boxes()[grid];
            let layout = self.mesh.levels[0].layouts[grid];
            for cell in valid.cells() {
                let lo = geom.cell_lo(cell);
                let hi = lo + dx;
                let mut pos = lo + offset * dx;
                for dim in 0..3 {
                    if pos[dim] >= hi[dim] {
                        pos[dim] = next_below(hi[dim]);
                    }
                }
                if geom.cell_of(pos) != cell {
                    pos = geom.cell_center(cell);
                }
                let id = self.next_particle_id()?;
                let rec = init.record(pos, id, rank as i32, n_real, n_int);
                let tile = layout.tile_index_of(cell);
                self.tile_entry(TileKey { level: 0, grid, tile }).push_record(&rec);
                created += 1;
            }
        }
        report!(self.config.verbose, rank, created, "init_one_per_cell");
        Ok(())
    }
}
