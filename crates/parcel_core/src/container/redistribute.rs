//! Redistribution
//!
//! After particles move (or the hierarchy changes) each one must again sit
//! in the tile whose box contains it, on the rank that owns that box, on the
//! finest level covering it. One pass:
//!
//! 1. classify every particle of every tile in range, tiles in parallel
//!    (periodic wrap happens here)
//! 2. pull out movers and compact each tile by descending swap-remove
//! 3. route staged particles
//! 4. append local movers to their destination tiles
//! 5. exchange the rest with the owning ranks
//!
//! A failed exchange aborts the run.

use super::{fatal_comm, report, ParticleContainer, ParticleMesh, TileKey};
use crate::arena::ArenaAllocator;
use crate::particle::codec::{self, RecordWriter};
use crate::particle::ParticleRecord;
use crate::tile::ParticleTile;
use parcel_metrics::time_phase;
use rayon::prelude::*;

/// Arguments of [`ParticleContainer::redistribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedistributeOptions {
    pub lev_min: usize,
    /// Finest level considered; `None` means the finest defined level.
    pub lev_max: Option<usize>,
    /// Ghost margin, in cells, within which a particle may stay in its box.
    pub n_grow: i32,
    /// Only move particles between tiles of this rank; no communication.
    pub local: bool,
    /// Drop particles with non-positive ids or no home in the hierarchy.
    pub remove_negative: bool,
}

impl Default for RedistributeOptions {
    fn default() -> Self {
        Self {
            lev_min: 0,
            lev_max: None,
            n_grow: 0,
            local: false,
            remove_negative: true,
        }
    }
}

impl RedistributeOptions {
    /// Defaults, but without communication.
    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }
}

/// What one `redistribute` call did on this rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedistributeSummary {
    /// Already in the right tile.
    pub kept: usize,
    /// Moved to another tile of this rank.
    pub moved_local: usize,
    pub sent: usize,
    pub received: usize,
    /// Dropped for a non-positive id.
    pub removed_invalid: usize,
    /// Dropped for lying outside every box of every level.
    pub removed_outside: usize,
    /// Left where they were: no home and `remove_negative` off, or owned by
    /// another rank in a local pass.
    pub unplaced: usize,
    /// Still staged after the call.
    pub staged: usize,
    /// Real particles per level on this rank afterwards.
    pub level_counts: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Move(TileKey),
    Send { rank: usize, key: TileKey },
    RemoveInvalid,
    RemoveOutside,
    Unplaced,
}

struct TilePlan {
    slot: usize,
    kept: usize,
    actions: Vec<(usize, Action)>,
}

#[derive(Clone, Copy)]
struct Pass {
    lev_min: usize,
    lev_max: usize,
    n_grow: i32,
    local: bool,
    remove_negative: bool,
    rank: usize,
}

impl Pass {
    /// Where a particle with no acceptable current tile should go.
    fn route(&self, mesh: &ParticleMesh, pos: glam::DVec3) -> Option<Action> {
        let dest = mesh.locate(pos, self.lev_min, self.lev_max)?;
        let owner = mesh.levels[dest.level].owner(dest.grid)?;
        Some(if owner == self.rank {
            Action::Move(dest)
        } else if self.local {
            Action::Unplaced
        } else {
            Action::Send { rank: owner, key: dest }
        })
    }
}

fn classify_tile<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>(
    mesh: &ParticleMesh,
    pass: Pass,
    key: TileKey,
    slot: usize,
    tile: &mut ParticleTile<NSR, NSI, NAR, NAI, A>,
) -> TilePlan {
    tile.clear_neighbors();
    let level = &mesh.levels[key.level];
    let geom = &level.geom;
    let layout = &level.layouts[key.grid];
    let grown = level.ba.boxes()[key.grid].grow(pass.n_grow);

    let mut plan = TilePlan {
        slot,
        kept: 0,
        actions: Vec::new(),
    };
    for (i, p) in tile.aos_mut().iter_mut().enumerate() {
        if !p.is_valid() {
            if pass.remove_negative {
                plan.actions.push((i, Action::RemoveInvalid));
            } else {
                plan.kept += 1;
            }
            continue;
        }

        let mut pos = p.pos();
        if geom.periodic_wrap(&mut pos) {
            p.set_pos(pos);
        }
        let cell = geom.cell_of(pos);
        let stays = geom.inside_domain(pos)
            && grown.contains(cell)
            && layout.tile_index_of(cell) == key.tile
            && !mesh.covered_by_finer(pos, key.level, pass.lev_max);
        if stays {
            plan.kept += 1;
            continue;
        }

        match pass.route(mesh, pos) {
            Some(Action::Move(dest)) if dest == key => plan.kept += 1,
            Some(action) => plan.actions.push((i, action)),
            None if pass.remove_negative => plan.actions.push((i, Action::RemoveOutside)),
            None => plan.actions.push((i, Action::Unplaced)),
        }
    }
    plan
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    /// Move every particle of levels `lev_min..=lev_max`, and every staged
    /// particle, to the tile that owns its position.
    ///
    /// Collective unless `opts.local`. Neighbor slots of the affected tiles
    /// are discarded.
    ///
    /// # Panics
    /// If the particle exchange with another rank fails.
    pub fn redistribute(&mut self, opts: RedistributeOptions) -> RedistributeSummary {
        let mut summary = RedistributeSummary::default();
        if !self.is_defined() {
            return summary;
        }
        let finest = self.finest_level();
        let rank = self.comm.rank();
        let nprocs = self.comm.size();
        let pass = Pass {
            lev_min: opts.lev_min,
            lev_max: opts.lev_max.unwrap_or(finest).min(finest),
            n_grow: opts.n_grow.max(0),
            local: opts.local,
            remove_negative: opts.remove_negative,
            rank,
        };
        let communicate = !opts.local && nprocs > 1;
        let (n_real, n_int) = (self.n_runtime_real, self.n_runtime_int);

        let mesh = &self.mesh;
        let plans: Vec<(usize, Vec<TilePlan>)> = time_phase!(self.profiler, "redistribute.classify", {
            self.levels
                .iter_mut()
                .enumerate()
                .filter(|(lev, _)| (pass.lev_min..=pass.lev_max).contains(lev))
                .map(|(lev, level)| {
                    let keys = &level.keys;
                    let plans: Vec<TilePlan> = level
                        .tiles
                        .par_iter_mut()
                        .enumerate()
                        .map(|(slot, tile)| {
                            let (grid, t) = keys[slot];
                            classify_tile(mesh, pass, TileKey { level: lev, grid, tile: t }, slot, tile)
                        })
                        .collect();
                    (lev, plans)
                })
                .collect()
        });

        let mut moves: Vec<(TileKey, ParticleRecord<NSR, NSI, NAR, NAI>)> = Vec::new();
        let mut outgoing: Vec<RecordWriter> = (0..nprocs).map(|_| RecordWriter::new(n_real, n_int)).collect();

        for (lev, level_plans) in plans {
            for plan in level_plans {
                let tile = &mut self.levels[lev].tiles[plan.slot];
                summary.kept += plan.kept;
                let mut remove = Vec::with_capacity(plan.actions.len());
                for (i, action) in plan.actions {
                    match action {
                        Action::Move(dest) => {
                            moves.push((dest, tile.record(i)));
                            summary.moved_local += 1;
                        }
                        Action::Send { rank: to, key } => {
                            outgoing[to].push(key, &tile.record(i));
                            summary.sent += 1;
                        }
                        Action::RemoveInvalid => summary.removed_invalid += 1,
                        Action::RemoveOutside => summary.removed_outside += 1,
                        Action::Unplaced => {
                            summary.unplaced += 1;
                            continue;
                        }
                    }
                    remove.push(i);
                }
                tile.remove_indices(remove);
            }
        }

        let geom0 = self.mesh.levels[0].geom.clone();
        for mut rec in std::mem::take(&mut self.staged) {
            if !rec.particle.is_valid() {
                if pass.remove_negative {
                    summary.removed_invalid += 1;
                } else {
                    self.staged.push(rec);
                }
                continue;
            }
            let mut pos = rec.particle.pos();
            if geom0.periodic_wrap(&mut pos) {
                rec.particle.set_pos(pos);
            }
            match pass.route(&self.mesh, pos) {
                Some(Action::Move(dest)) => {
                    moves.push((dest, rec));
                    summary.moved_local += 1;
                }
                Some(Action::Send { rank: to, key }) => {
                    outgoing[to].push(key, &rec);
                    summary.sent += 1;
                }
                _ => {
                    let homeless = self.mesh.locate(pos, 0, finest).is_none();
                    if homeless && pass.remove_negative {
                        summary.removed_outside += 1;
                    } else {
                        self.staged.push(rec);
                    }
                }
            }
        }

        for (dest, rec) in &moves {
            self.tile_entry(*dest).push_record(rec);
        }

        if communicate {
            let buffers: Vec<Vec<u8>> = outgoing.into_iter().map(RecordWriter::finish).collect();
            let incoming = time_phase!(self.profiler, "redistribute.exchange", {
                fatal_comm(rank, "redistribute", self.comm.exchange(buffers))
            });
            for (peer, bytes) in incoming.iter().enumerate() {
                if peer == rank {
                    continue;
                }
                let records = fatal_comm(
                    rank,
                    "redistribute",
                    codec::decode::<NSR, NSI, NAR, NAI>(bytes, peer, n_real, n_int),
                );
                for (key, rec) in records {
                    summary.received += 1;
                    match self.check_tile(key) {
                        Ok(()) => self.tile_entry(key).push_record(&rec),
                        Err(err) => {
                            tracing::warn!(rank, peer, %err, "received particle for a foreign tile; staging it");
                            self.staged.push(rec);
                        }
                    }
                }
            }
        } else {
            debug_assert!(outgoing.iter().all(|w| w.len() == 0));
        }

        summary.staged = self.staged.len();
        summary.level_counts = self
            .levels
            .iter()
            .map(|l| l.tiles.iter().map(|t| t.num_real_particles()).sum())
            .collect();

        self.counters.increment("redistribute.calls", 1);
        self.counters.increment("redistribute.moved_local", summary.moved_local);
        self.counters.increment("redistribute.sent", summary.sent);
        self.counters.increment("redistribute.received", summary.received);
        self.counters
            .increment("redistribute.removed", summary.removed_invalid + summary.removed_outside);

        report!(
            self.config.verbose,
            rank,
            kept = summary.kept,
            moved = summary.moved_local,
            sent = summary.sent,
            received = summary.received,
            removed = summary.removed_invalid + summary.removed_outside,
            unplaced = summary.unplaced,
            "redistribute"
        );
        summary
    }
}
