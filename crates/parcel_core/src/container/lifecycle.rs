use super::{report, ParticleContainer, ParticleLevel, RedistributeOptions, RedistributeSummary, TileKey};
use crate::arena::ArenaAllocator;
use crate::config::AggregationType;
use crate::error::ContainerError;
use crate::particle::{ParticleRecord, ParticleSchema, GHOST_PARTICLE_ID, VIRTUAL_PARTICLE_ID};
use crate::tile::ParticleTile;
use glam::DVec3;
use std::collections::BTreeMap;

struct CellAggregate<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> {
    template: ParticleRecord<NSR, NSI, NAR, NAI>,
    mass: f64,
    weighted: DVec3,
    plain: DVec3,
    count: usize,
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    fn check_runtime_layout<B: ArenaAllocator>(
        &self,
        tile: &ParticleTile<NSR, NSI, NAR, NAI, B>,
    ) -> Result<(), ContainerError> {
        let soa = tile.soa();
        if soa.num_runtime_real() != self.n_runtime_real || soa.num_runtime_int() != self.n_runtime_int {
            return Err(ContainerError::SchemaMismatch {
                expected: self.schema(),
                found: ParticleSchema {
                    n_runtime_real: soa.num_runtime_real(),
                    n_runtime_int: soa.num_runtime_int(),
                    ..self.schema()
                },
            });
        }
        Ok(())
    }

    /// Insert the real particles of `particles` at `level`, then redistribute
    /// that level with ghost margin `n_grow`. Collective.
    pub fn add_particles_at_level<B: ArenaAllocator>(
        &mut self,
        particles: &ParticleTile<NSR, NSI, NAR, NAI, B>,
        level: usize,
        n_grow: i32,
    ) -> Result<RedistributeSummary, ContainerError> {
        self.mesh_level(level)?;
        self.check_runtime_layout(particles)?;
        particles.allocator().synchronize();
        for i in 0..particles.num_real_particles() {
            self.staged.push(particles.record(i));
        }
        Ok(self.redistribute(RedistributeOptions {
            lev_min: level,
            lev_max: Some(level),
            n_grow,
            ..RedistributeOptions::default()
        }))
    }

    /// Append to `virts` stand-ins for the particles on `level`, tagged with
    /// [`VIRTUAL_PARTICLE_ID`]. With cell aggregation, particles sharing a
    /// cell of `level` collapse into one at their mass-weighted centroid
    /// (mass is the first struct real) carrying the summed mass.
    ///
    /// Returns the number of virtual particles added.
    pub fn create_virtual_particles(&self, level: usize, virts: &mut ParticleTile<NSR, NSI, NAR, NAI, A>) -> usize {
        let Some(mesh) = self.mesh.levels.get(level) else {
            return 0;
        };
        let rank = self.comm.rank() as i32;
        let (n_real, n_int) = (virts.soa().num_runtime_real(), virts.soa().num_runtime_int());
        let before = virts.len();

        let stamp = |mut rec: ParticleRecord<NSR, NSI, NAR, NAI>| {
            rec.particle.id = VIRTUAL_PARTICLE_ID;
            rec.particle.cpu = rank;
            rec.fit_runtime(n_real, n_int);
            rec
        };

        let live = self.get_particles(level).flat_map(|(_, tile)| {
            (0..tile.num_real_particles())
                .filter(move |&i| tile.aos()[i].is_valid())
                .map(move |i| tile.record(i))
        });

        match self.config.aggregation {
            AggregationType::None => {
                for rec in live {
                    virts.push_record(&stamp(rec));
                }
            }
            AggregationType::Cell => {
                let mut cells: BTreeMap<[i32; 3], CellAggregate<NSR, NSI, NAR, NAI>> = BTreeMap::new();
                for rec in live {
                    let pos = rec.particle.pos();
                    let cell = mesh.geom.cell_of(pos);
                    let mass = rec.particle.rdata.first().copied().unwrap_or(1.0);
                    let agg = cells.entry([cell.z, cell.y, cell.x]).or_insert_with(|| CellAggregate {
                        template: rec.clone(),
                        mass: 0.0,
                        weighted: DVec3::ZERO,
                        plain: DVec3::ZERO,
                        count: 0,
                    });
                    agg.mass += mass;
                    agg.weighted += mass * pos;
                    agg.plain += pos;
                    agg.count += 1;
                }
                for agg in cells.into_values() {
                    let mut rec = agg.template;
                    let centroid = if agg.mass != 0.0 {
                        agg.weighted / agg.mass
                    } else {
                        agg.plain / agg.count as f64
                    };
                    rec.particle.set_pos(centroid);
                    if let Some(m) = rec.particle.rdata.first_mut() {
                        *m = agg.mass;
                    }
                    virts.push_record(&stamp(rec));
                }
            }
        }
        virts.len() - before
    }

    /// Append to `ghosts` copies of the level `level - 1` particles that sit
    /// in the `n_grow`-cell band around the boxes of `level`, tagged with
    /// [`GHOST_PARTICLE_ID`]. Returns the number added.
    pub fn create_ghost_particles(
        &self,
        level: usize,
        n_grow: i32,
        ghosts: &mut ParticleTile<NSR, NSI, NAR, NAI, A>,
    ) -> Result<usize, ContainerError> {
        if level == 0 {
            return Err(ContainerError::GhostLevelZero);
        }
        let fine = self.mesh_level(level)?;
        let rank = self.comm.rank() as i32;
        let (n_real, n_int) = (ghosts.soa().num_runtime_real(), ghosts.soa().num_runtime_int());
        let before = ghosts.len();

        for (_, tile) in self.get_particles(level - 1) {
            for (i, p) in tile.aos()[..tile.num_real_particles()].iter().enumerate() {
                if !p.is_valid() {
                    continue;
                }
                let cell = fine.geom.cell_of(p.pos());
                if fine.locator.covers(cell) || fine.locator.find_grown(cell, n_grow).is_empty() {
                    continue;
                }
                let mut rec = tile.record(i);
                rec.particle.id = GHOST_PARTICLE_ID;
                rec.particle.cpu = rank;
                rec.fit_runtime(n_real, n_int);
                ghosts.push_record(&rec);
            }
        }
        Ok(ghosts.len() - before)
    }

    /// Drop every particle on `level`. Returns how many were removed.
    pub fn remove_particles_at_level(&mut self, level: usize) -> usize {
        let Some(slot) = self.levels.get_mut(level) else {
            return 0;
        };
        let old = std::mem::replace(slot, ParticleLevel::new());
        let removed: usize = old.tiles.iter().map(|t| t.len()).sum();
        report!(self.config.verbose, level, removed, "removed particles at level");
        removed
    }

    /// Drop every particle not on the finest level. Returns how many were removed.
    pub fn remove_particles_not_at_finest_level(&mut self) -> usize {
        let finest = self.finest_level();
        (0..finest).map(|lev| self.remove_particles_at_level(lev)).sum()
    }

    /// Drop every tile on every level and anything staged.
    pub fn clear_particles(&mut self) {
        for level in &mut self.levels {
            *level = ParticleLevel::new();
        }
        self.staged.clear();
    }

    /// Replace this container's particles with those of `other`.
    ///
    /// See [`add_particles_from`](Self::add_particles_from).
    pub fn copy_particles_from<B: ArenaAllocator>(
        &mut self,
        other: &ParticleContainer<NSR, NSI, NAR, NAI, B>,
        local: bool,
    ) -> Result<(), ContainerError> {
        if other.n_runtime_real != self.n_runtime_real || other.n_runtime_int != self.n_runtime_int {
            return Err(ContainerError::SchemaMismatch {
                expected: self.schema(),
                found: other.schema(),
            });
        }
        self.clear_particles();
        self.add_particles_from(other, local)
    }

    /// Append the real particles of `other`, which may use another arena.
    ///
    /// Tiles that exist on this rank with the same key are copied buffer to
    /// buffer; everything else is staged. Unless `local`, a full
    /// `redistribute` follows (collective).
    pub fn add_particles_from<B: ArenaAllocator>(
        &mut self,
        other: &ParticleContainer<NSR, NSI, NAR, NAI, B>,
        local: bool,
    ) -> Result<(), ContainerError> {
        if other.n_runtime_real != self.n_runtime_real || other.n_runtime_int != self.n_runtime_int {
            return Err(ContainerError::SchemaMismatch {
                expected: self.schema(),
                found: other.schema(),
            });
        }
        other.alloc.synchronize();

        let mut copied = 0;
        let mut staged = 0;
        for (level, other_level) in other.levels.iter().enumerate() {
            for ((grid, tile), src) in other_level.ordered() {
                let key = TileKey { level, grid, tile };
                if self.check_tile(key).is_ok() {
                    let dst = self.tile_entry(key);
                    dst.clear_neighbors();
                    dst.extend_from_tile(src);
                    copied += src.num_real_particles();
                } else {
                    for i in 0..src.num_real_particles() {
                        self.staged.push(src.record(i));
                    }
                    staged += src.num_real_particles();
                }
            }
        }
        self.staged.extend(other.staged.iter().cloned());
        self.alloc.synchronize();

        report!(self.config.verbose, copied, staged, "added particles from another container");
        if !local {
            self.redistribute(RedistributeOptions::default());
        }
        Ok(())
    }

    /// Add a zero-initialized real component to every particle. Returns its
    /// index in the tile's real columns.
    pub fn add_real_comp(&mut self) -> usize {
        self.n_runtime_real += 1;
        for level in &mut self.levels {
            for tile in &mut level.tiles {
                tile.add_real_column();
            }
        }
        for rec in &mut self.staged {
            rec.runtime_real.push(0.0);
        }
        NAR + self.n_runtime_real - 1
    }

    /// Add a zero-initialized int component to every particle. Returns its
    /// index in the tile's int columns.
    pub fn add_int_comp(&mut self) -> usize {
        self.n_runtime_int += 1;
        for level in &mut self.levels {
            for tile in &mut level.tiles {
                tile.add_int_column();
            }
        }
        for rec in &mut self.staged {
            rec.runtime_int.push(0);
        }
        NAI + self.n_runtime_int - 1
    }
}
