use super::*;
use crate::arena::PinnedArena;
use crate::config::AggregationType;
use crate::iter::ParIter;
use crate::particle::{Particle, ParticleInitData, GHOST_PARTICLE_ID, VIRTUAL_PARTICLE_ID};
use glam::DVec3;
use parcel_comm::{LocalComm, LocalCommConfig, SerialComm};
use parcel_mesh::{BoxArray, DistributionMapping, Geometry, IndexBox, MeshError, RealBox};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::thread;

type Pc = ParticleContainer<0, 0, 4, 0>;
type Init = ParticleInitData<0, 0, 4, 0>;

fn serial() -> Arc<dyn Communicator> {
    Arc::new(SerialComm)
}

fn unit_geom(n: i32, periodic: bool) -> Geometry {
    Geometry::new(IndexBox::from_extent(IVec3::splat(n)), RealBox::unit(), [periodic; 3]).unwrap()
}

/// One level of `n^3` cells chopped into boxes of `max` cells, dealt round robin.
fn define_chopped<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>(
    pc: &mut ParticleContainer<NSR, NSI, NAR, NAI, A>,
    n: i32,
    max: i32,
    periodic: bool,
) {
    let geom = unit_geom(n, periodic);
    let ba = BoxArray::from_domain(geom.domain()).max_size(max).unwrap();
    let dmap = DistributionMapping::round_robin(ba.len(), pc.comm().size());
    pc.define_single_level(geom, dmap, ba).unwrap();
}

/// Two boxes split at the x midline of an 8^3 domain, box `r` on rank `r`.
fn define_halves(pc: &mut Pc) {
    let ba = BoxArray::new(vec![
        IndexBox::new(IVec3::ZERO, IVec3::new(3, 7, 7)),
        IndexBox::new(IVec3::new(4, 0, 0), IVec3::splat(7)),
    ]);
    pc.define_single_level(unit_geom(8, false), DistributionMapping::new(vec![0, 1]), ba)
        .unwrap();
}

/// Level 0 of 8^3 cells, level 1 refining the lower octant by 2.
fn define_two_levels<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize>(
    pc: &mut ParticleContainer<NSR, NSI, NAR, NAI>,
) {
    let coarse = unit_geom(8, false);
    let fine = coarse.refine(IVec3::splat(2)).unwrap();
    pc.define(
        vec![coarse.clone(), fine],
        vec![DistributionMapping::single_rank(1), DistributionMapping::single_rank(1)],
        vec![
            BoxArray::from_domain(coarse.domain()),
            BoxArray::new(vec![IndexBox::new(IVec3::ZERO, IVec3::splat(7))]),
        ],
        vec![IVec3::splat(2)],
    )
    .unwrap();
}

fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Communicator>) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalComm::universe(n, LocalCommConfig { timeout_ms: 10_000 })
        .into_iter()
        .map(|comm| {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let comm: Arc<dyn Communicator> = Arc::new(comm);
                f(comm)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn all_particles<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>(
    pc: &ParticleContainer<NSR, NSI, NAR, NAI, A>,
) -> Vec<(i64, i32, [f64; 3])> {
    let mut out: Vec<_> = (0..pc.num_levels())
        .flat_map(|lev| pc.get_particles(lev))
        .flat_map(|(_, t)| t.aos()[..t.num_real_particles()].iter().map(|p| (p.id, p.cpu, p.pos)))
        .collect();
    out.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    out
}

fn shift_across_midline(pc: &mut Pc) {
    let mut pti = ParIter::new(pc, 0);
    while pti.is_valid() {
        for p in pti.aos_mut() {
            p.pos[0] = if p.pos[0] < 0.5 { p.pos[0] + 0.5 } else { p.pos[0] - 0.5 };
        }
        pti.advance();
    }
}

#[test]
fn one_particle_per_cell_fills_the_domain() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();

    assert_eq!(pc.total_number_of_particles(true, false), 64);
    assert_eq!(pc.number_of_particles_at_level(0, true, false), 64);
    assert!(pc.ok(0, None, 0));

    let geom = pc.geom(0).clone();
    for (_, tile) in pc.get_particles(0) {
        for p in tile.aos() {
            let cell = geom.cell_of(p.pos());
            assert!((p.pos() - geom.cell_center(cell)).abs().max_element() < 1e-12);
        }
    }
}

#[test]
fn offsets_are_clamped_into_the_cell() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(1.0, -0.5, 0.0, &Init::default()).unwrap();
    assert_eq!(pc.total_number_of_particles(true, true), 64);
    assert!(pc.ok(0, None, 0));
}

#[test]
fn particles_change_owner_across_the_midline() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_halves(&mut pc);
        pc.init_random_per_box(100, 42, &Init::default()).unwrap();
        assert_eq!(pc.number_of_particles_at_level(0, true, true), 100);

        shift_across_midline(&mut pc);
        let summary = pc.redistribute(RedistributeOptions::default());

        let ok = pc.ok(0, None, 0);
        let mine = pc.number_of_particles_at_level(0, true, true);
        let total = pc.total_number_of_particles(true, false);
        let foreign = all_particles(&pc).iter().all(|&(_, cpu, _)| cpu as usize != rank);
        (ok, mine, total, foreign, summary.sent, summary.received)
    });
    for (ok, mine, total, foreign, sent, received) in results {
        assert!(ok);
        assert_eq!(mine, 100);
        assert_eq!(total, 200);
        assert!(foreign);
        assert_eq!(sent, 100);
        assert_eq!(received, 100);
    }
}

#[test]
fn local_pass_leaves_remote_particles_in_place() {
    let results = run_ranks(2, |comm| {
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_halves(&mut pc);
        pc.init_random_per_box(50, 3, &Init::default()).unwrap();
        shift_across_midline(&mut pc);

        let local = pc.redistribute(RedistributeOptions::local());
        let held = pc.number_of_particles_at_level(0, true, true);
        let full = pc.redistribute(RedistributeOptions::default());
        (local.unplaced, local.sent, held, full.received, pc.ok(0, None, 0))
    });
    for (unplaced, sent, held, received, ok) in results {
        assert_eq!(unplaced, 50);
        assert_eq!(sent, 0);
        assert_eq!(held, 50);
        assert_eq!(received, 50);
        assert!(ok);
    }
}

#[test]
fn negative_ids_are_removed() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 2, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.par_for_each_tile_mut(0, |_, tile| {
        for p in tile.aos_mut() {
            if p.id % 3 == 0 {
                p.invalidate();
            }
        }
    });
    assert_eq!(pc.total_number_of_particles(false, true), 64);
    assert_eq!(pc.total_number_of_particles(true, true), 43);

    let summary = pc.redistribute(RedistributeOptions::default());
    assert_eq!(summary.removed_invalid, 21);
    assert_eq!(pc.total_number_of_particles(false, true), 43);
    assert!(all_particles(&pc).iter().all(|&(id, _, _)| id > 0 && id % 3 != 0));
}

#[test]
fn invalid_particles_survive_when_removal_is_off() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.particles_at_mut(0, 0, 0).aos_mut()[0].invalidate();
    let summary = pc.redistribute(RedistributeOptions {
        remove_negative: false,
        ..RedistributeOptions::default()
    });
    assert_eq!(summary.removed_invalid, 0);
    assert_eq!(pc.total_number_of_particles(false, true), 64);
    assert_eq!(pc.total_number_of_particles(true, true), 63);
}

#[test]
fn random_motion_conserves_particles() {
    let results = run_ranks(3, |comm| {
        let rank = comm.rank();
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_chopped(&mut pc, 8, 4, false);
        pc.init_random(1000, 11, &Init::default(), false, None).unwrap();
        let before = pc.total_number_of_particles(true, false);
        let placed = pc.ok(0, None, 0);

        let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
        let mut pti = ParIter::new(&mut pc, 0);
        while pti.is_valid() {
            for p in pti.aos_mut() {
                for x in &mut p.pos {
                    *x = (*x + rng.gen_range(-0.3..0.3)).clamp(0.0, 0.999);
                }
            }
            pti.advance();
        }
        pc.redistribute(RedistributeOptions::default());

        let after = pc.total_number_of_particles(true, false);
        let level = pc.number_of_particles_at_level(0, true, false);
        let grids: u64 = pc.number_of_particles_in_grid(0, true, false).iter().sum();
        (before, placed, after, level, grids, pc.ok(0, None, 0))
    });
    for (before, placed, after, level, grids, ok) in results {
        assert_eq!(before, 1000);
        assert!(placed);
        assert_eq!(after, 1000);
        assert_eq!(level, 1000);
        assert_eq!(grids, level);
        assert!(ok);
    }
}

#[test]
fn serialized_init_ignores_the_decomposition() {
    let mut single = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut single, 8, 4, false);
    single.init_random(300, 5, &Init::default(), true, None).unwrap();
    let expected = all_particles(&single);
    assert_eq!(expected.len(), 300);

    let mut split: Vec<_> = run_ranks(2, |comm| {
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_chopped(&mut pc, 8, 4, false);
        pc.init_random(300, 5, &Init::default(), true, None).unwrap();
        all_particles(&pc)
    })
    .into_iter()
    .flatten()
    .collect();
    split.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    assert_eq!(split, expected);
}

fn assert_unique_ids(particles: &[(i64, i32, [f64; 3])]) {
    let ids: std::collections::HashSet<(i64, i32)> = particles.iter().map(|&(id, cpu, _)| (id, cpu)).collect();
    assert_eq!(ids.len(), particles.len());
}

#[test]
fn repeated_serialized_inits_keep_ids_unique() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_random(10, 1, &Init::default(), true, None).unwrap();
    pc.init_random(10, 2, &Init::default(), true, None).unwrap();

    let particles = all_particles(&pc);
    assert_eq!(particles.len(), 20);
    assert_unique_ids(&particles);
    assert_eq!(particles.last().map(|p| p.0), Some(20));
}

#[test]
fn serialized_init_after_per_cell_init_keeps_ids_unique() {
    let particles: Vec<_> = run_ranks(2, |comm| {
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_chopped(&mut pc, 8, 4, false);
        pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
        pc.init_random(100, 9, &Init::default(), true, None).unwrap();
        pc.init_random_per_box(3, 4, &Init::default()).unwrap();
        all_particles(&pc)
    })
    .into_iter()
    .flatten()
    .collect();

    assert_eq!(particles.len(), 512 + 100 + 8 * 3);
    assert_unique_ids(&particles);
}

#[test]
fn redistribute_is_idempotent() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.init_random(400, 9, &Init::default(), false, None).unwrap();
    let before = all_particles(&pc);

    let summary = pc.redistribute(RedistributeOptions::default());
    assert_eq!(summary.moved_local, 0);
    assert_eq!(summary.kept, 400);
    assert_eq!(all_particles(&pc), before);
}

#[test]
fn tiled_container_places_particles_in_their_tile() {
    let config = ParticleConfig {
        do_tiling: true,
        tile_size: [2, 2, 2],
        ..ParticleConfig::default()
    };
    let mut pc = Pc::new(config, serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.init_random(500, 1, &Init::default(), false, None).unwrap();
    assert!(pc.ok(0, None, 0));
    assert!(pc.num_local_tiles_at_level(0) > 8);
    for (key, tile) in pc.get_particles(0) {
        let tb = pc.tile_box(key).unwrap();
        for p in tile.aos() {
            assert!(tb.contains(pc.geom(0).cell_of(p.pos())));
        }
    }
}

#[test]
fn periodic_motion_wraps_around() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, true);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.par_for_each_tile_mut(0, |_, tile| {
        for p in tile.aos_mut() {
            p.pos[0] += 1.25;
            p.pos[2] -= 2.0;
        }
    });
    let summary = pc.redistribute(RedistributeOptions::default());
    assert_eq!(summary.removed_outside, 0);
    assert_eq!(pc.total_number_of_particles(true, true), 512);
    assert!(pc.ok(0, None, 0));
    for (_, _, pos) in all_particles(&pc) {
        assert!(pos.iter().all(|&x| (0.0..1.0).contains(&x)));
    }
}

#[test]
fn particles_leaving_the_domain_follow_the_removal_policy() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.particles_at_mut(0, 0, 0).aos_mut()[0].pos[1] = 1.5;

    let kept = pc.redistribute(RedistributeOptions {
        remove_negative: false,
        ..RedistributeOptions::default()
    });
    assert_eq!(kept.unplaced, 1);
    assert_eq!(pc.total_number_of_particles(true, true), 64);

    let dropped = pc.redistribute(RedistributeOptions::default());
    assert_eq!(dropped.removed_outside, 1);
    assert_eq!(pc.total_number_of_particles(true, true), 63);
}

#[test]
fn non_finite_positions_are_never_filed() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 2, true);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.particles_at_mut(0, 3, 0).aos_mut()[0].pos[0] = f64::NAN;

    let kept = pc.redistribute(RedistributeOptions {
        remove_negative: false,
        ..RedistributeOptions::default()
    });
    assert_eq!(kept.unplaced, 1);
    assert_eq!(pc.number_of_particles_in_grid(0, true, true), vec![8; 8]);
    assert!(!pc.ok(0, None, 0));

    let dropped = pc.redistribute(RedistributeOptions::default());
    assert_eq!(dropped.removed_outside, 1);
    assert_eq!(pc.total_number_of_particles(true, true), 63);
    assert!(pc.ok(0, None, 0));
}

#[test]
fn ghost_margin_keeps_particles_near_their_box() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    // one cell past the upper x face of box 0
    let moved = pc.particles_at(0, 0, 0).aos()[0].id;
    pc.particles_at_mut(0, 0, 0).aos_mut()[0].pos[0] = 0.55;

    let summary = pc.redistribute(RedistributeOptions {
        n_grow: 1,
        ..RedistributeOptions::default()
    });
    assert_eq!(summary.moved_local, 0);
    assert!(pc.particles_at(0, 0, 0).aos().iter().any(|p| p.id == moved));
    assert!(pc.ok(0, None, 1));
    assert!(!pc.ok(0, None, 0));

    pc.redistribute(RedistributeOptions::default());
    assert!(pc.ok(0, None, 0));
}

#[test]
fn particles_settle_on_the_finest_covering_level() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_two_levels(&mut pc);
    pc.init_random(200, 17, &Init::default(), true, None).unwrap();

    let coarse = pc.number_of_particles_at_level(0, true, true);
    let fine = pc.number_of_particles_at_level(1, true, true);
    assert_eq!(coarse + fine, 200);
    assert!(pc.ok(0, None, 0));
    for (_, tile) in pc.get_particles(0) {
        for p in tile.aos() {
            assert!(p.pos.iter().any(|&x| x >= 0.5));
        }
    }
    for (_, tile) in pc.get_particles(1) {
        for p in tile.aos() {
            assert!(p.pos.iter().all(|&x| x < 0.5));
        }
    }

    assert_eq!(pc.remove_particles_not_at_finest_level() as u64, coarse);
    assert_eq!(pc.total_number_of_particles(true, true), fine);
    assert_eq!(pc.remove_particles_at_level(1) as u64, fine);
    assert_eq!(pc.total_number_of_particles(true, true), 0);
}

#[test]
fn redefining_stages_particles_until_redistribute() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 8, false);
    pc.init_one_per_cell(0.25, 0.25, 0.25, &Init::default()).unwrap();

    define_chopped(&mut pc, 8, 4, false);
    assert_eq!(pc.num_staged(), 512);
    assert_eq!(pc.num_local_tiles_at_level(0), 0);
    assert_eq!(pc.total_number_of_particles(true, true), 512);

    let summary = pc.redistribute(RedistributeOptions::default());
    assert_eq!(summary.moved_local, 512);
    assert_eq!(summary.staged, 0);
    assert_eq!(pc.num_local_tiles_at_level(0), 8);
    assert!(pc.ok(0, None, 0));
}

#[test]
fn unchanged_levels_keep_their_tiles_on_redefine() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.init_random_per_box(10, 2, &Init::default()).unwrap();
    define_chopped(&mut pc, 8, 4, false);
    assert_eq!(pc.num_staged(), 0);
    assert_eq!(pc.number_of_particles_at_level(0, true, true), 80);
}

#[test]
fn failed_define_changes_nothing() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();

    let geom = unit_geom(4, false);
    let err = pc
        .define(vec![geom.clone()], vec![], vec![BoxArray::from_domain(geom.domain())], vec![])
        .unwrap_err();
    assert!(matches!(err, ContainerError::LevelCountMismatch { .. }));

    let fine = unit_geom(12, false);
    let err = pc
        .define(
            vec![geom.clone(), fine.clone()],
            vec![DistributionMapping::single_rank(1), DistributionMapping::single_rank(1)],
            vec![BoxArray::from_domain(geom.domain()), BoxArray::from_domain(fine.domain())],
            vec![IVec3::splat(2)],
        )
        .unwrap_err();
    assert_eq!(err, ContainerError::InconsistentRefinement { level: 1, ratio: [2, 2, 2] });

    let err = pc
        .define_single_level(geom.clone(), DistributionMapping::new(vec![3]), BoxArray::from_domain(geom.domain()))
        .unwrap_err();
    assert!(matches!(err, ContainerError::Mesh(_)));

    let overlapping = BoxArray::new(vec![
        IndexBox::new(IVec3::ZERO, IVec3::new(2, 3, 3)),
        IndexBox::new(IVec3::new(1, 0, 0), IVec3::splat(3)),
    ]);
    let err = pc
        .define_single_level(geom.clone(), DistributionMapping::new(vec![0, 0]), overlapping)
        .unwrap_err();
    assert_eq!(err, ContainerError::Mesh(MeshError::OverlappingBoxes { first: 0, second: 1 }));

    assert_eq!(pc.num_levels(), 1);
    assert_eq!(pc.total_number_of_particles(true, true), 64);
    assert_eq!(pc.num_staged(), 0);
    assert!(pc.ok(0, None, 0));
}

#[test]
fn tile_lookup_errors() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    assert_eq!(
        pc.define_and_return_particle_tile(0, 0, 1).map(|_| ()).unwrap_err(),
        ContainerError::TileOutOfRange { level: 0, grid: 0, tile: 1 }
    );
    assert_eq!(
        pc.define_and_return_particle_tile(0, 8, 0).map(|_| ()).unwrap_err(),
        ContainerError::GridOutOfRange { level: 0, grid: 8 }
    );
    assert_eq!(
        pc.define_and_return_particle_tile(2, 0, 0).map(|_| ()).unwrap_err(),
        ContainerError::LevelOutOfRange { level: 2, num_levels: 1 }
    );
    assert!(pc.try_particles_at(0, 0, 0).is_none());
    pc.define_and_return_particle_tile(0, 0, 0).unwrap();
    assert!(pc.try_particles_at(0, 0, 0).is_some());
}

#[test]
fn foreign_tiles_are_rejected() {
    let results = run_ranks(2, |comm| {
        let mut pc = Pc::new(ParticleConfig::default(), comm);
        define_halves(&mut pc);
        let other = 1 - pc.comm().rank();
        pc.define_and_return_particle_tile(0, other, 0).map(|_| ()).unwrap_err()
    });
    assert_eq!(
        results[0],
        ContainerError::TileNotLocal { level: 0, grid: 1, owner: 1, rank: 0 }
    );
}

#[test]
#[should_panic(expected = "no particle tile")]
fn missing_tile_lookup_panics() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.particles_at(0, 0, 0);
}

#[test]
fn added_particles_land_at_their_level() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_two_levels(&mut pc);
    let mut tile = pc.new_tile();
    for (i, x) in [0.1, 0.3, 0.7, 0.9].into_iter().enumerate() {
        let mut rec = ParticleRecord::default();
        rec.particle.set_pos(DVec3::splat(x));
        rec.particle.id = i as i64 + 1;
        tile.push_record(&rec);
    }

    let summary = pc.add_particles_at_level(&tile, 0, 0).unwrap();
    assert_eq!(summary.level_counts, vec![4, 0]);
    assert!(pc.ok(0, Some(0), 0));

    pc.redistribute(RedistributeOptions::default());
    assert_eq!(pc.number_of_particles_at_level(0, true, true), 2);
    assert_eq!(pc.number_of_particles_at_level(1, true, true), 2);
    assert!(pc.add_particles_at_level(&tile, 3, 0).is_err());
}

#[test]
fn virtual_particles_aggregate_by_cell() {
    type Massive = ParticleContainer<1, 0, 0, 0>;
    let config = ParticleConfig {
        aggregation: AggregationType::Cell,
        ..ParticleConfig::default()
    };
    let mut pc = Massive::new(config, serial());
    define_chopped(&mut pc, 4, 4, false);
    let tile = pc.define_and_return_particle_tile(0, 0, 0).unwrap();
    for (id, x, mass) in [(1, 0.05, 1.0), (2, 0.2, 3.0), (3, 0.8, 2.0)] {
        let mut rec = ParticleRecord::<1, 0, 0, 0>::default();
        rec.particle.set_pos(DVec3::new(x, 0.1, 0.1));
        rec.particle.rdata = [mass];
        rec.particle.id = id;
        tile.push_record(&rec);
    }

    let mut virts = pc.new_tile();
    assert_eq!(pc.create_virtual_particles(0, &mut virts), 2);
    let first = virts.aos()[0];
    assert!(first.is_virtual());
    assert_eq!(first.rdata[0], 4.0);
    assert!((first.pos[0] - (0.05 + 0.6) / 4.0).abs() < 1e-12);
    assert_eq!(virts.aos()[1].rdata[0], 2.0);
}

#[test]
fn virtual_particles_copy_without_aggregation() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    let mut virts = pc.new_tile();
    assert_eq!(pc.create_virtual_particles(0, &mut virts), 64);
    assert!(virts.aos().iter().all(|p| p.id == VIRTUAL_PARTICLE_ID));
    assert_eq!(pc.create_virtual_particles(5, &mut virts), 0);
}

#[test]
fn ghosts_come_from_the_band_around_fine_boxes() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_two_levels(&mut pc);
    let tile = pc.define_and_return_particle_tile(0, 0, 0).unwrap();
    for (id, x) in [(1, 0.52), (2, 0.9), (3, 0.2)] {
        let mut rec = ParticleRecord::default();
        rec.particle.set_pos(DVec3::new(x, 0.1, 0.1));
        rec.particle.id = id;
        tile.push_record(&rec);
    }

    let mut ghosts = pc.new_tile();
    assert_eq!(pc.create_ghost_particles(1, 1, &mut ghosts).unwrap(), 1);
    assert_eq!(ghosts.aos()[0].id, GHOST_PARTICLE_ID);
    assert!((ghosts.aos()[0].pos[0] - 0.52).abs() < 1e-12);
    assert_eq!(
        pc.create_ghost_particles(0, 1, &mut ghosts).unwrap_err(),
        ContainerError::GhostLevelZero
    );
}

#[test]
fn cell_histogram_matches_the_population() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 2, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    let (grids, total) = pc.increment_with_total(0, false);
    assert_eq!(grids.len(), 8);
    assert_eq!(total, 64);
    for g in &grids {
        assert!(g.counts.iter().all(|&c| c == 1));
        assert_eq!(g.at(g.validbox.lo()), 1);
        assert_eq!(g.at(IVec3::splat(-1)), 0);
    }
    assert_eq!(pc.increment(0).iter().map(GridCellCounts::total).sum::<u64>(), 64);
}

#[test]
fn sorting_by_cell_orders_whole_records() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    let geom = pc.geom(0).clone();
    let cells: Vec<IVec3> = geom.domain().cells().collect();
    let tile = pc.define_and_return_particle_tile(0, 0, 0).unwrap();
    for (i, cell) in cells.iter().rev().enumerate() {
        let mut rec = ParticleRecord::default();
        rec.particle.set_pos(geom.cell_center(*cell));
        rec.particle.id = i as i64 + 1;
        rec.real[0] = i as f64 + 1.0;
        tile.push_record(&rec);
    }

    pc.sort_particles_by_cell();
    let tile = pc.particles_at(0, 0, 0);
    let keys: Vec<[i32; 3]> = tile
        .aos()
        .iter()
        .map(|p| {
            let c = geom.cell_of(p.pos());
            [c.z, c.y, c.x]
        })
        .collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    for (p, &r) in tile.aos().iter().zip(tile.soa().real(0)) {
        assert_eq!(p.id as f64, r);
    }
    assert_eq!(tile.len(), 64);
}

#[test]
fn sorting_by_bin_groups_cells() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_random(200, 23, &Init::default(), false, None).unwrap();
    let before = all_particles(&pc);

    pc.sort_particles_by_bin(IVec3::splat(2));
    let geom = pc.geom(0).clone();
    let bins: Vec<[i32; 3]> = pc
        .particles_at(0, 0, 0)
        .aos()
        .iter()
        .map(|p| {
            let b = geom.cell_of(p.pos()).div_euclid(IVec3::splat(2));
            [b.z, b.y, b.x]
        })
        .collect();
    assert!(bins.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(all_particles(&pc), before);
}

#[test]
fn runtime_components_follow_particles() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    assert_eq!(pc.add_real_comp(), 4);
    assert_eq!(pc.add_int_comp(), 0);
    assert_eq!(pc.num_runtime_real_comps(), 1);
    assert_eq!(pc.schema().n_runtime_int, 1);

    pc.par_for_each_tile_mut(0, |_, tile| {
        let (aos, soa) = tile.split_mut();
        let ids: Vec<i64> = aos.iter().map(|p| p.id).collect();
        for (v, id) in soa.real_mut(4).iter_mut().zip(&ids) {
            *v = *id as f64;
        }
        for (v, id) in soa.int_mut(0).iter_mut().zip(&ids) {
            *v = -(*id as i32);
        }
        for p in aos.iter_mut() {
            p.pos[0] = 1.0 - p.pos[0];
        }
    });
    let summary = pc.redistribute(RedistributeOptions::default());
    assert!(summary.moved_local > 0);

    for (_, tile) in pc.get_particles(0) {
        assert!(tile.lengths_agree());
        for (i, p) in tile.aos().iter().enumerate() {
            assert_eq!(tile.soa().real(4)[i], p.id as f64);
            assert_eq!(tile.soa().int(0)[i], -(p.id as i32));
        }
    }
}

#[test]
fn snapshot_round_trips_through_json() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 2, false);
    pc.add_real_comp();
    pc.init_random(120, 8, &Init { real_array_data: [1.0, 2.0, 3.0, 4.0], ..Init::default() }, false, None)
        .unwrap();

    let snap = pc.snapshot();
    assert_eq!(snap.level_counts, vec![120]);
    let json = snap.to_json().unwrap();
    let back = ContainerSnapshot::from_json(&json).unwrap();
    assert_eq!(back.tiles.len(), snap.tiles.len());
    assert!(back.tiles.iter().zip(&snap.tiles).all(|(a, b)| a.key == b.key && a.ids == b.ids));

    let mut restored = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut restored, 4, 2, false);
    restored.restore_snapshot(&back).unwrap();
    assert_eq!(restored.num_runtime_real_comps(), 1);
    assert_eq!(restored.snapshot(), back);
    assert_eq!(restored.total_number_of_particles(true, true), 120);
    assert!(restored.ok(0, None, 0));
}

#[test]
fn bad_snapshots_leave_the_container_alone() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 2, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    let good = pc.snapshot();

    let mut foreign = good.clone();
    foreign.tiles[0].key.grid = 99;
    assert!(pc.restore_snapshot(&foreign).is_err());

    let mut short = good.clone();
    short.tiles[1].ids.pop();
    assert!(matches!(pc.restore_snapshot(&short), Err(ContainerError::MalformedTile(_))));

    let mut wrong = good.clone();
    wrong.schema.n_array_real = 2;
    assert!(matches!(pc.restore_snapshot(&wrong), Err(ContainerError::SchemaMismatch { .. })));

    assert_eq!(pc.snapshot(), good);
}

#[test]
fn copies_between_arenas() {
    let mut host = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut host, 4, 2, false);
    host.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();

    let mut pinned = ParticleContainer::<0, 0, 4, 0, PinnedArena>::new_in(ParticleConfig::default(), serial(), PinnedArena);
    define_chopped(&mut pinned, 4, 2, false);
    pinned.copy_particles_from(&host, false).unwrap();
    assert_eq!(all_particles(&pinned), all_particles(&host));
    assert!(pinned.ok(0, None, 0));

    pinned.add_particles_from(&host, true).unwrap();
    assert_eq!(pinned.total_number_of_particles(true, true), 128);

    host.add_real_comp();
    assert!(matches!(
        pinned.copy_particles_from(&host, false),
        Err(ContainerError::SchemaMismatch { .. })
    ));
}

#[test]
fn capacity_diagnostics() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 8, 4, false);
    pc.resize_data();
    assert_eq!(pc.num_local_tiles_at_level(0), 8);

    pc.reserve_data(100);
    let [min, max, sum] = pc.byte_spread();
    assert_eq!(min, max);
    assert_eq!(sum, pc.local_capacity_bytes());
    assert!(sum >= 8 * 100 * (std::mem::size_of::<Particle<0, 0>>() as u64 + 32));
    pc.print_capacity();

    pc.shrink_to_fit();
    assert_eq!(pc.local_capacity_bytes(), 0);
    assert_eq!(pc.local_used_bytes(), 0);
}

#[test]
fn clear_particles_empties_everything() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.init_one_per_cell(0.5, 0.5, 0.5, &Init::default()).unwrap();
    pc.clear_particles();
    assert_eq!(pc.total_number_of_particles(false, true), 0);
    assert_eq!(pc.num_local_tiles_at_level(0), 0);
}

#[cfg(feature = "metrics")]
#[test]
fn redistribute_is_counted_and_timed() {
    let mut pc = Pc::new(ParticleConfig::default(), serial());
    define_chopped(&mut pc, 4, 4, false);
    pc.redistribute(RedistributeOptions::default());
    pc.redistribute(RedistributeOptions::default());
    assert_eq!(pc.counters().get("redistribute.calls"), 2);
    assert_eq!(pc.profiler().get("redistribute.classify").map(|t| t.calls), Some(2));
}
