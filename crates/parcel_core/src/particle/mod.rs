//! Particle records
//!
//! A particle is split in two. The array-of-structs part ([`Particle`]) holds
//! the position, `NSR` reals, the `(id, cpu)` identity and `NSI` ints. The
//! struct-of-arrays part holds `NAR` reals and `NAI` ints per particle in
//! separate columns of the tile, plus any components added at run time.

pub(crate) mod codec;

use glam::DVec3;
use parcel_mesh::SPACEDIM;
use serde::{Deserialize, Serialize};

/// Largest id the container hands out.
pub const LAST_PARTICLE_ID: i64 = (1 << 39) - 1;
/// Id stamped on ghost copies of coarse particles.
pub const GHOST_PARTICLE_ID: i64 = LAST_PARTICLE_ID;
/// Id stamped on virtual stand-ins for fine particles.
pub const VIRTUAL_PARTICLE_ID: i64 = LAST_PARTICLE_ID - 1;

/// Array-of-structs part of a particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle<const NSR: usize, const NSI: usize> {
    pub pos: [f64; SPACEDIM],
    pub rdata: [f64; NSR],
    /// Positive for live particles; non-positive marks a record for removal.
    pub id: i64,
    /// Rank that created the particle. `(id, cpu)` is globally unique.
    pub cpu: i32,
    pub idata: [i32; NSI],
}

impl<const NSR: usize, const NSI: usize> Default for Particle<NSR, NSI> {
    fn default() -> Self {
        Self {
            pos: [0.0; SPACEDIM],
            rdata: [0.0; NSR],
            id: 0,
            cpu: 0,
            idata: [0; NSI],
        }
    }
}

impl<const NSR: usize, const NSI: usize> Particle<NSR, NSI> {
    #[inline]
    pub fn pos(&self) -> DVec3 {
        DVec3::from_array(self.pos)
    }

    #[inline]
    pub fn set_pos(&mut self, pos: DVec3) {
        self.pos = pos.to_array();
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.id > 0
    }

    pub fn is_virtual(&self) -> bool {
        self.id == VIRTUAL_PARTICLE_ID
    }

    pub fn is_ghost(&self) -> bool {
        self.id == GHOST_PARTICLE_ID
    }

    /// Mark for removal at the next redistribute.
    #[inline]
    pub fn invalidate(&mut self) {
        if self.id > 0 {
            self.id = -self.id;
        } else if self.id == 0 {
            self.id = -1;
        }
    }
}

/// A full particle, both layouts, detached from any tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRecord<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> {
    pub particle: Particle<NSR, NSI>,
    pub real: [f64; NAR],
    pub int: [i32; NAI],
    pub runtime_real: Vec<f64>,
    pub runtime_int: Vec<i32>,
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> Default
    for ParticleRecord<NSR, NSI, NAR, NAI>
{
    fn default() -> Self {
        Self {
            particle: Particle::default(),
            real: [0.0; NAR],
            int: [0; NAI],
            runtime_real: Vec::new(),
            runtime_int: Vec::new(),
        }
    }
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> ParticleRecord<NSR, NSI, NAR, NAI> {
    /// Record with only the AoS part set; runtime columns are sized later.
    pub fn from_particle(particle: Particle<NSR, NSI>) -> Self {
        Self {
            particle,
            ..Self::default()
        }
    }

    /// Pad or cut the runtime components to the given counts.
    pub(crate) fn fit_runtime(&mut self, n_real: usize, n_int: usize) {
        self.runtime_real.resize(n_real, 0.0);
        self.runtime_int.resize(n_int, 0);
    }
}

/// Field values given to every particle created by the `init_*` calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleInitData<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> {
    pub real_struct_data: [f64; NSR],
    pub int_struct_data: [i32; NSI],
    pub real_array_data: [f64; NAR],
    pub int_array_data: [i32; NAI],
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> Default
    for ParticleInitData<NSR, NSI, NAR, NAI>
{
    fn default() -> Self {
        Self {
            real_struct_data: [0.0; NSR],
            int_struct_data: [0; NSI],
            real_array_data: [0.0; NAR],
            int_array_data: [0; NAI],
        }
    }
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize> ParticleInitData<NSR, NSI, NAR, NAI> {
    pub(crate) fn record(
        &self,
        pos: DVec3,
        id: i64,
        cpu: i32,
        n_runtime_real: usize,
        n_runtime_int: usize,
    ) -> ParticleRecord<NSR, NSI, NAR, NAI> {
        ParticleRecord {
            particle: Particle {
                pos: pos.to_array(),
                rdata: self.real_struct_data,
                id,
                cpu,
                idata: self.int_struct_data,
            },
            real: self.real_array_data,
            int: self.int_array_data,
            runtime_real: vec![0.0; n_runtime_real],
            runtime_int: vec![0; n_runtime_int],
        }
    }
}

/// Component counts of a container, compile-time and runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleSchema {
    pub n_struct_real: usize,
    pub n_struct_int: usize,
    pub n_array_real: usize,
    pub n_array_int: usize,
    pub n_runtime_real: usize,
    pub n_runtime_int: usize,
}

impl ParticleSchema {
    pub fn static_part(&self) -> [usize; 4] {
        [self.n_struct_real, self.n_struct_int, self.n_array_real, self.n_array_int]
    }
}

/// Largest representable value strictly below `x`.
pub(crate) fn next_below(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        x
    } else if x == 0.0 {
        -f64::from_bits(1)
    } else if x > 0.0 {
        f64::from_bits(x.to_bits() - 1)
    } else {
        f64::from_bits(x.to_bits() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_are_above_valid_range() {
        assert!(VIRTUAL_PARTICLE_ID < GHOST_PARTICLE_ID);
        assert_eq!(GHOST_PARTICLE_ID, 549_755_813_887);
    }

    #[test]
    fn invalidate_flips_sign() {
        let mut p = Particle::<1, 1> {
            id: 12,
            ..Default::default()
        };
        assert!(p.is_valid());
        p.invalidate();
        assert_eq!(p.id, -12);
        p.invalidate();
        assert_eq!(p.id, -12);
        let mut zero = Particle::<0, 0>::default();
        zero.invalidate();
        assert_eq!(zero.id, -1);
    }

    #[test]
    fn init_data_fills_every_field() {
        let init = ParticleInitData::<1, 1, 2, 1> {
            real_struct_data: [0.5],
            int_struct_data: [3],
            real_array_data: [1.0, 2.0],
            int_array_data: [9],
        };
        let rec = init.record(DVec3::new(0.1, 0.2, 0.3), 5, 1, 2, 0);
        assert_eq!(rec.particle.pos(), DVec3::new(0.1, 0.2, 0.3));
        assert_eq!(rec.particle.rdata, [0.5]);
        assert_eq!(rec.particle.idata, [3]);
        assert_eq!(rec.real, [1.0, 2.0]);
        assert_eq!(rec.int, [9]);
        assert_eq!(rec.runtime_real, vec![0.0, 0.0]);
        assert!(rec.runtime_int.is_empty());
    }

    #[test]
    fn next_below_steps_one_ulp() {
        assert!(next_below(1.0) < 1.0);
        assert_eq!(next_below(1.0), 1.0 - f64::EPSILON / 2.0);
        assert!(next_below(0.0) < 0.0);
        assert!(next_below(-2.0) < -2.0);
    }
}
