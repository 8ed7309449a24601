//! Tile iterators
//!
//! A cursor over the local tiles of one level, ascending by `(grid, tile)`.
//! The cursor list is fixed when the iterator is built; the iterator holds
//! the container borrow, so tiles cannot be added or dropped underneath it.
//!
//! ```ignore
//! let mut pti = ParIter::new(&mut pc, 0);
//! while pti.is_valid() {
//!     for p in pti.aos_mut() {
//!         p.pos[0] += dt * vx;
//!     }
//!     pti.advance();
//! }
//! ```

use crate::arena::{ArenaAllocator, StdArena};
use crate::container::{ParticleContainer, TileKey};
use crate::particle::Particle;
use crate::tile::{ParticleTile, StructOfArrays};
use parcel_mesh::{Geometry, IndexBox};

/// Iteration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterInfo {
    /// Only visit tiles whose tilebox meets this box.
    pub region: Option<IndexBox>,
    /// Create the missing local tiles first, and visit empty tiles too.
    pub define_missing: bool,
}

/// Exclusive cursor over the tiles of one level.
pub struct ParIter<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator = StdArena> {
    pc: &'a mut ParticleContainer<NSR, NSI, NAR, NAI, A>,
    level: usize,
    cursor: Vec<(TileKey, usize)>,
    pos: usize,
}

impl<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParIter<'a, NSR, NSI, NAR, NAI, A>
{
    /// Non-empty tiles of `level`.
    pub fn new(pc: &'a mut ParticleContainer<NSR, NSI, NAR, NAI, A>, level: usize) -> Self {
        Self::with_info(pc, level, IterInfo::default())
    }

    pub fn with_info(pc: &'a mut ParticleContainer<NSR, NSI, NAR, NAI, A>, level: usize, info: IterInfo) -> Self {
        if info.define_missing {
            pc.define_local_tiles(level, info.region);
        }
        let cursor = pc.tile_cursor(level, info.region, info.define_missing);
        Self {
            pc,
            level,
            cursor,
            pos: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.pos < self.cursor.len()
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// Number of tiles this iterator visits.
    pub fn len(&self) -> usize {
        self.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    fn current(&self) -> (TileKey, usize) {
        match self.cursor.get(self.pos) {
            Some(&entry) => entry,
            None => panic!("tile iterator used past its end"),
        }
    }

    pub fn key(&self) -> TileKey {
        self.current().0
    }

    pub fn particle_tile(&mut self) -> &mut ParticleTile<NSR, NSI, NAR, NAI, A> {
        let (_, slot) = self.current();
        self.pc.tile_at_slot_mut(self.level, slot)
    }

    pub fn tile(&self) -> &ParticleTile<NSR, NSI, NAR, NAI, A> {
        let (_, slot) = self.current();
        self.pc.tile_at_slot(self.level, slot)
    }

    pub fn aos(&self) -> &[Particle<NSR, NSI>] {
        self.tile().aos()
    }

    pub fn aos_mut(&mut self) -> &mut [Particle<NSR, NSI>] {
        self.particle_tile().aos_mut()
    }

    pub fn soa(&self) -> &StructOfArrays<NAR, NAI, A> {
        self.tile().soa()
    }

    pub fn soa_mut(&mut self) -> &mut StructOfArrays<NAR, NAI, A> {
        self.particle_tile().soa_mut()
    }

    pub fn num_particles(&self) -> usize {
        self.tile().len()
    }

    pub fn num_real_particles(&self) -> usize {
        self.tile().num_real_particles()
    }

    pub fn num_neighbor_particles(&self) -> usize {
        self.tile().num_neighbor_particles()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn pair_index(&self) -> (usize, usize) {
        self.key().pair_index()
    }

    /// Grid (box) index.
    pub fn index(&self) -> usize {
        self.key().grid
    }

    pub fn local_tile_index(&self) -> usize {
        self.key().tile
    }

    pub fn tilebox(&self) -> IndexBox {
        let key = self.key();
        tilebox_of(self.pc, key)
    }

    pub fn validbox(&self) -> IndexBox {
        self.pc.box_array(self.level).boxes()[self.index()]
    }

    /// # Panics
    /// If `level` is not defined.
    pub fn geom(&self, level: usize) -> &Geometry {
        self.pc.geom(level)
    }
}

/// Shared cursor over the tiles of one level. Also an [`Iterator`] of
/// [`TileView`]s.
pub struct ParConstIter<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator = StdArena> {
    pc: &'a ParticleContainer<NSR, NSI, NAR, NAI, A>,
    level: usize,
    cursor: Vec<(TileKey, usize)>,
    pos: usize,
}

/// One tile and its place in the hierarchy.
pub struct TileView<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator> {
    pub key: TileKey,
    pub tile: &'a ParticleTile<NSR, NSI, NAR, NAI, A>,
    pub tilebox: IndexBox,
    pub validbox: IndexBox,
    pub geom: &'a Geometry,
}

impl<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParConstIter<'a, NSR, NSI, NAR, NAI, A>
{
    /// Non-empty tiles of `level`.
    pub fn new(pc: &'a ParticleContainer<NSR, NSI, NAR, NAI, A>, level: usize) -> Self {
        Self::with_info(pc, level, IterInfo::default())
    }

    /// A shared borrow cannot create tiles, so `define_missing` only makes
    /// existing empty tiles visible.
    pub fn with_info(pc: &'a ParticleContainer<NSR, NSI, NAR, NAI, A>, level: usize, info: IterInfo) -> Self {
        let cursor = pc.tile_cursor(level, info.region, info.define_missing);
        Self {
            pc,
            level,
            cursor,
            pos: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.pos < self.cursor.len()
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    fn current(&self) -> (TileKey, usize) {
        match self.cursor.get(self.pos) {
            Some(&entry) => entry,
            None => panic!("tile iterator used past its end"),
        }
    }

    pub fn key(&self) -> TileKey {
        self.current().0
    }

    pub fn particle_tile(&self) -> &'a ParticleTile<NSR, NSI, NAR, NAI, A> {
        let (_, slot) = self.current();
        self.pc.tile_at_slot(self.level, slot)
    }

    pub fn aos(&self) -> &'a [Particle<NSR, NSI>] {
        self.particle_tile().aos()
    }

    pub fn soa(&self) -> &'a StructOfArrays<NAR, NAI, A> {
        self.particle_tile().soa()
    }

    pub fn num_particles(&self) -> usize {
        self.particle_tile().len()
    }

    pub fn num_real_particles(&self) -> usize {
        self.particle_tile().num_real_particles()
    }

    pub fn num_neighbor_particles(&self) -> usize {
        self.particle_tile().num_neighbor_particles()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn pair_index(&self) -> (usize, usize) {
        self.key().pair_index()
    }

    pub fn index(&self) -> usize {
        self.key().grid
    }

    pub fn local_tile_index(&self) -> usize {
        self.key().tile
    }

    pub fn tilebox(&self) -> IndexBox {
        tilebox_of(self.pc, self.key())
    }

    pub fn validbox(&self) -> IndexBox {
        self.pc.box_array(self.level).boxes()[self.index()]
    }

    pub fn geom(&self, level: usize) -> &'a Geometry {
        self.pc.geom(level)
    }
}

impl<'a, const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator> Iterator
    for ParConstIter<'a, NSR, NSI, NAR, NAI, A>
{
    type Item = TileView<'a, NSR, NSI, NAR, NAI, A>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.is_valid() {
            return None;
        }
        let view = TileView {
            key: self.key(),
            tile: self.particle_tile(),
            tilebox: self.tilebox(),
            validbox: self.validbox(),
            geom: self.geom(self.level),
        };
        self.advance();
        Some(view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cursor.len().saturating_sub(self.pos);
        (left, Some(left))
    }
}

fn tilebox_of<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>(
    pc: &ParticleContainer<NSR, NSI, NAR, NAI, A>,
    key: TileKey,
) -> IndexBox {
    pc.tile_box(key)
        .unwrap_or_else(|| pc.box_array(key.level).boxes()[key.grid])
}
