//! Parcel Runtime
//!
//! Drives a drift-and-redistribute loop on a few in-process ranks.
//!
//! Usage: `parcel [settings.json]`

mod settings;

use anyhow::{anyhow, Result};
use glam::{DVec3, IVec3};
use parcel_comm::{Communicator, LocalComm};
use parcel_core::{ParticleContainer, ParticleInitData, RedistributeOptions, TileKey};
use parcel_mesh::{BoxArray, DistributionMapping, Geometry, IndexBox, RealBox};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use settings::RunSettings;
use std::sync::Arc;
use std::thread;

/// Velocity in the three array reals.
type Container = ParticleContainer<0, 0, 3, 0>;

fn define_hierarchy(pc: &mut Container, settings: &RunSettings, nprocs: usize) -> Result<()> {
    let domain = IndexBox::from_extent(IVec3::splat(settings.cells));
    let geom = Geometry::new(domain, RealBox::unit(), [settings.periodic; 3])?;
    let ba = BoxArray::from_domain(domain).max_size(settings.max_grid_size)?;
    let dmap = DistributionMapping::round_robin(ba.len(), nprocs);
    if !settings.refine {
        pc.define_single_level(geom, dmap, ba)?;
        return Ok(());
    }

    let ratio = IVec3::splat(2);
    let fine = geom.refine(ratio)?;
    let octant = IndexBox::new(IVec3::ZERO, IVec3::splat(settings.cells - 1));
    let fine_ba = BoxArray::new(vec![octant]).max_size(settings.max_grid_size)?;
    let fine_dmap = DistributionMapping::round_robin(fine_ba.len(), nprocs);
    pc.define(vec![geom, fine], vec![dmap, fine_dmap], vec![ba, fine_ba], vec![ratio])?;
    Ok(())
}

fn run_rank(comm: Arc<dyn Communicator>, settings: &RunSettings) -> Result<()> {
    let rank = comm.rank();
    let nprocs = comm.size();
    let mut pc = Container::new(settings.particle.clone(), comm.clone());
    define_hierarchy(&mut pc, settings, nprocs)?;
    pc.init_random(settings.particles, settings.seed, &ParticleInitData::default(), false, None)?;

    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed ^ (rank as u64 + 1).rotate_left(32));
    for level in 0..pc.num_levels() {
        let keys: Vec<TileKey> = pc.get_particles(level).map(|(key, _)| key).collect();
        for key in keys {
            let tile = pc.particles_at_mut(key.level, key.grid, key.tile);
            for comp in 0..3 {
                for v in tile.soa_mut().real_mut(comp) {
                    *v = rng.gen_range(-settings.max_speed..=settings.max_speed);
                }
            }
        }
    }

    let total = pc.total_number_of_particles(true, false);
    if comm.is_io_rank() {
        tracing::info!(ranks = nprocs, levels = pc.num_levels(), particles = total, "initialized");
    }

    let dt = settings.dt;
    for step in 1..=settings.steps {
        for level in 0..pc.num_levels() {
            pc.par_for_each_tile_mut(level, |_, tile| {
                let (aos, soa) = tile.split_mut();
                let (vx, vy, vz) = (soa.real(0), soa.real(1), soa.real(2));
                for (i, p) in aos.iter_mut().enumerate() {
                    let v = DVec3::new(vx[i], vy[i], vz[i]);
                    p.set_pos(p.pos() + v * dt);
                }
            });
        }
        let summary = pc.redistribute(RedistributeOptions::default());
        tracing::debug!(rank, step, sent = summary.sent, received = summary.received, "step");

        if settings.report_every > 0 && step % settings.report_every == 0 {
            let now = pc.total_number_of_particles(true, false);
            if comm.is_io_rank() {
                tracing::info!(step, particles = now, removed = total.saturating_sub(now), "progress");
            }
        }
    }

    let placed = pc.ok(0, None, 0);
    pc.print_capacity();
    if comm.is_io_rank() {
        for (phase, timing) in pc.profiler().iter() {
            tracing::info!(phase, calls = timing.calls, mean_us = timing.mean().as_micros() as u64, "timing");
        }
    }
    if !placed {
        return Err(anyhow!("rank {rank}: particles out of place after the run"));
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => RunSettings::load(path)?,
        None => RunSettings::default(),
    };
    settings.validate()?;
    tracing::info!("Parcel v{}", parcel_core::VERSION);

    let settings = Arc::new(settings);
    let handles: Vec<_> = LocalComm::universe(settings.ranks, settings.comm)
        .into_iter()
        .map(|comm| {
            let settings = Arc::clone(&settings);
            thread::Builder::new()
                .name(format!("rank-{}", comm.rank()))
                .spawn(move || run_rank(Arc::new(comm), &settings))
        })
        .collect::<std::io::Result<_>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("a rank thread panicked"))??;
    }
    tracing::info!("run complete");
    Ok(())
}
