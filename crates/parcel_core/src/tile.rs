//! Tile storage
//!
//! A tile owns the particles of one (level, grid, tile) triple: one AoS
//! buffer plus one column per SoA component, all from the same arena. Every
//! buffer always has the same length. Real particles come first; neighbor
//! slots (cached copies) trail them.

use crate::arena::{ArenaAllocator, ArenaVec};
use crate::particle::{Particle, ParticleRecord};

/// Struct-of-arrays half of a tile.
pub struct StructOfArrays<const NAR: usize, const NAI: usize, A: ArenaAllocator> {
    real: [ArenaVec<f64, A>; NAR],
    int: [ArenaVec<i32, A>; NAI],
    runtime_real: Vec<ArenaVec<f64, A>>,
    runtime_int: Vec<ArenaVec<i32, A>>,
}

impl<const NAR: usize, const NAI: usize, A: ArenaAllocator> StructOfArrays<NAR, NAI, A> {
    fn new_in(alloc: &A, n_runtime_real: usize, n_runtime_int: usize) -> Self {
        Self {
            real: std::array::from_fn(|_| ArenaVec::new_in(alloc.clone())),
            int: std::array::from_fn(|_| ArenaVec::new_in(alloc.clone())),
            runtime_real: (0..n_runtime_real).map(|_| ArenaVec::new_in(alloc.clone())).collect(),
            runtime_int: (0..n_runtime_int).map(|_| ArenaVec::new_in(alloc.clone())).collect(),
        }
    }

    /// Real components: `NAR` compile-time ones followed by runtime ones.
    pub fn num_real_comps(&self) -> usize {
        NAR + self.runtime_real.len()
    }

    pub fn num_int_comps(&self) -> usize {
        NAI + self.runtime_int.len()
    }

    pub fn num_runtime_real(&self) -> usize {
        self.runtime_real.len()
    }

    pub fn num_runtime_int(&self) -> usize {
        self.runtime_int.len()
    }

    /// # Panics
    /// If `comp >= num_real_comps()`.
    pub fn real(&self, comp: usize) -> &[f64] {
        if comp < NAR {
            self.real[comp].as_slice()
        } else {
            self.runtime_real[comp - NAR].as_slice()
        }
    }

    pub fn real_mut(&mut self, comp: usize) -> &mut [f64] {
        if comp < NAR {
            self.real[comp].as_mut_slice()
        } else {
            self.runtime_real[comp - NAR].as_mut_slice()
        }
    }

    /// # Panics
    /// If `comp >= num_int_comps()`.
    pub fn int(&self, comp: usize) -> &[i32] {
        if comp < NAI {
            self.int[comp].as_slice()
        } else {
            self.runtime_int[comp - NAI].as_slice()
        }
    }

    pub fn int_mut(&mut self, comp: usize) -> &mut [i32] {
        if comp < NAI {
            self.int[comp].as_mut_slice()
        } else {
            self.runtime_int[comp - NAI].as_mut_slice()
        }
    }

    fn real_columns_mut(&mut self) -> impl Iterator<Item = &mut ArenaVec<f64, A>> {
        self.real.iter_mut().chain(self.runtime_real.iter_mut())
    }

    fn int_columns_mut(&mut self) -> impl Iterator<Item = &mut ArenaVec<i32, A>> {
        self.int.iter_mut().chain(self.runtime_int.iter_mut())
    }

    fn real_columns(&self) -> impl Iterator<Item = &ArenaVec<f64, A>> {
        self.real.iter().chain(self.runtime_real.iter())
    }

    fn int_columns(&self) -> impl Iterator<Item = &ArenaVec<i32, A>> {
        self.int.iter().chain(self.runtime_int.iter())
    }
}

/// Particle buffers of one (level, grid, tile).
pub struct ParticleTile<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator> {
    aos: ArenaVec<Particle<NSR, NSI>, A>,
    soa: StructOfArrays<NAR, NAI, A>,
    num_neighbors: usize,
}

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleTile<NSR, NSI, NAR, NAI, A>
{
    pub fn new_in(alloc: A, n_runtime_real: usize, n_runtime_int: usize) -> Self {
        Self {
            soa: StructOfArrays::new_in(&alloc, n_runtime_real, n_runtime_int),
            aos: ArenaVec::new_in(alloc),
            num_neighbors: 0,
        }
    }

    pub fn allocator(&self) -> &A {
        self.aos.allocator()
    }

    /// Total slots, real and neighbor.
    #[inline]
    pub fn len(&self) -> usize {
        self.aos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.aos.is_empty()
    }

    #[inline]
    pub fn num_real_particles(&self) -> usize {
        self.aos.len() - self.num_neighbors
    }

    #[inline]
    pub fn num_neighbor_particles(&self) -> usize {
        self.num_neighbors
    }

    pub fn aos(&self) -> &[Particle<NSR, NSI>] {
        self.aos.as_slice()
    }

    pub fn aos_mut(&mut self) -> &mut [Particle<NSR, NSI>] {
        self.aos.as_mut_slice()
    }

    pub fn soa(&self) -> &StructOfArrays<NAR, NAI, A> {
        &self.soa
    }

    pub fn soa_mut(&mut self) -> &mut StructOfArrays<NAR, NAI, A> {
        &mut self.soa
    }

    /// Both halves at once, for kernels that write AoS and SoA together.
    pub fn split_mut(&mut self) -> (&mut [Particle<NSR, NSI>], &mut StructOfArrays<NAR, NAI, A>) {
        (self.aos.as_mut_slice(), &mut self.soa)
    }

    fn push_raw(&mut self, rec: &ParticleRecord<NSR, NSI, NAR, NAI>) {
        debug_assert_eq!(rec.runtime_real.len(), self.soa.runtime_real.len());
        debug_assert_eq!(rec.runtime_int.len(), self.soa.runtime_int.len());
        self.aos.push(rec.particle);
        for (col, &v) in self.soa.real.iter_mut().zip(&rec.real) {
            col.push(v);
        }
        for (col, &v) in self.soa.int.iter_mut().zip(&rec.int) {
            col.push(v);
        }
        for (i, col) in self.soa.runtime_real.iter_mut().enumerate() {
            col.push(rec.runtime_real.get(i).copied().unwrap_or(0.0));
        }
        for (i, col) in self.soa.runtime_int.iter_mut().enumerate() {
            col.push(rec.runtime_int.get(i).copied().unwrap_or(0));
        }
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.aos.swap(a, b);
        for col in self.soa.real_columns_mut() {
            col.swap(a, b);
        }
        for col in self.soa.int_columns_mut() {
            col.swap(a, b);
        }
    }

    /// Append a real particle, keeping neighbor slots at the end.
    pub fn push_record(&mut self, rec: &ParticleRecord<NSR, NSI, NAR, NAI>) {
        self.push_raw(rec);
        let last = self.len() - 1;
        self.swap_rows(self.num_real_particles() - 1, last);
    }

    /// Append a neighbor (cached copy) slot.
    pub fn push_neighbor(&mut self, rec: &ParticleRecord<NSR, NSI, NAR, NAI>) {
        self.push_raw(rec);
        self.num_neighbors += 1;
    }

    /// Drop every neighbor slot.
    pub fn clear_neighbors(&mut self) {
        let n = self.num_real_particles();
        self.truncate(n);
    }

    fn truncate(&mut self, n: usize) {
        let real = self.num_real_particles();
        self.aos.truncate(n);
        for col in self.soa.real_columns_mut() {
            col.truncate(n);
        }
        for col in self.soa.int_columns_mut() {
            col.truncate(n);
        }
        self.num_neighbors = self.aos.len().saturating_sub(real);
    }

    /// Remove every slot.
    pub fn clear(&mut self) {
        self.truncate(0);
        self.num_neighbors = 0;
    }

    /// Copy out slot `i`.
    pub fn record(&self, i: usize) -> ParticleRecord<NSR, NSI, NAR, NAI> {
        ParticleRecord {
            particle: self.aos[i],
            real: std::array::from_fn(|c| self.soa.real[c][i]),
            int: std::array::from_fn(|c| self.soa.int[c][i]),
            runtime_real: self.soa.runtime_real.iter().map(|col| col[i]).collect(),
            runtime_int: self.soa.runtime_int.iter().map(|col| col[i]).collect(),
        }
    }

    /// Remove slot `i` by moving the last slot into it.
    ///
    /// Only valid while the tile holds no neighbor slots.
    pub fn swap_remove(&mut self, i: usize) -> ParticleRecord<NSR, NSI, NAR, NAI> {
        debug_assert_eq!(self.num_neighbors, 0, "swap_remove with neighbor slots present");
        let rec = self.record(i);
        self.aos.swap_remove(i);
        for col in self.soa.real_columns_mut() {
            col.swap_remove(i);
        }
        for col in self.soa.int_columns_mut() {
            col.swap_remove(i);
        }
        rec
    }

    /// Remove many slots, highest index first so each swap only pulls in a
    /// survivor. Duplicates are ignored.
    pub fn remove_indices(&mut self, mut indices: Vec<usize>) {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        for i in indices {
            if i < self.len() {
                self.swap_remove(i);
            }
        }
    }

    /// Reorder the real particles: slot `i` receives old slot `order[i]`.
    pub fn apply_permutation(&mut self, order: &[usize]) {
        debug_assert_eq!(order.len(), self.num_real_particles());
        self.aos.permute(order);
        for col in self.soa.real_columns_mut() {
            col.permute(order);
        }
        for col in self.soa.int_columns_mut() {
            col.permute(order);
        }
    }

    /// Append the real particles of `other`, which may live in another arena.
    pub fn extend_from_tile<B: ArenaAllocator>(&mut self, other: &ParticleTile<NSR, NSI, NAR, NAI, B>) {
        debug_assert_eq!(self.num_neighbors, 0);
        let n = other.num_real_particles();
        self.aos.extend_from_slice(&other.aos[..n]);
        for (dst, src) in self.soa.real_columns_mut().zip(other.soa.real_columns()) {
            dst.extend_from_slice(&src[..n]);
        }
        for (dst, src) in self.soa.int_columns_mut().zip(other.soa.int_columns()) {
            dst.extend_from_slice(&src[..n]);
        }
    }

    pub(crate) fn add_real_column(&mut self) {
        let mut col = ArenaVec::new_in(self.allocator().clone());
        col.resize(self.len(), 0.0);
        self.soa.runtime_real.push(col);
    }

    pub(crate) fn add_int_column(&mut self) {
        let mut col = ArenaVec::new_in(self.allocator().clone());
        col.resize(self.len(), 0);
        self.soa.runtime_int.push(col);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.aos.reserve(additional);
        for col in self.soa.real_columns_mut() {
            col.reserve(additional);
        }
        for col in self.soa.int_columns_mut() {
            col.reserve(additional);
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.aos.shrink_to_fit();
        for col in self.soa.real_columns_mut() {
            col.shrink_to_fit();
        }
        for col in self.soa.int_columns_mut() {
            col.shrink_to_fit();
        }
    }

    /// Bytes reserved from the arena across all buffers.
    pub fn capacity_bytes(&self) -> usize {
        self.aos.capacity_bytes()
            + self.soa.real_columns().map(|c| c.capacity_bytes()).sum::<usize>()
            + self.soa.int_columns().map(|c| c.capacity_bytes()).sum::<usize>()
    }

    /// Bytes occupied by live slots.
    pub fn used_bytes(&self) -> usize {
        self.aos.len_bytes()
            + self.soa.real_columns().map(|c| c.len_bytes()).sum::<usize>()
            + self.soa.int_columns().map(|c| c.len_bytes()).sum::<usize>()
    }

    /// True if every SoA column matches the AoS length.
    pub fn lengths_agree(&self) -> bool {
        let n = self.aos.len();
        self.num_neighbors <= n
            && self.soa.real_columns().all(|c| c.len() == n)
            && self.soa.int_columns().all(|c| c.len() == n)
    }
}
