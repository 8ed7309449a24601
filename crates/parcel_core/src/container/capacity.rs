use super::{fatal_comm, ParticleContainer};
use crate::arena::{self, ArenaAllocator};
use parcel_comm::ReduceOp;

impl<const NSR: usize, const NSI: usize, const NAR: usize, const NAI: usize, A: ArenaAllocator>
    ParticleContainer<NSR, NSI, NAR, NAI, A>
{
    /// Reserve room for `additional` more particles in every existing tile.
    pub fn reserve_data(&mut self, additional: usize) {
        for level in &mut self.levels {
            for tile in &mut level.tiles {
                tile.reserve(additional);
            }
        }
    }

    /// Create every tile this rank owns on every level, so later writes
    /// never insert into the tile map.
    pub fn resize_data(&mut self) {
        for level in 0..self.num_levels() {
            self.define_local_tiles(level, None);
        }
    }

    /// Release unused capacity of every tile.
    pub fn shrink_to_fit(&mut self) {
        for level in &mut self.levels {
            for tile in &mut level.tiles {
                tile.shrink_to_fit();
            }
        }
        self.staged.shrink_to_fit();
    }

    /// Bytes reserved by this rank's tiles.
    pub fn local_capacity_bytes(&self) -> u64 {
        self.levels
            .iter()
            .flat_map(|l| l.tiles.iter())
            .map(|t| t.capacity_bytes() as u64)
            .sum()
    }

    /// Bytes of live particle data held by this rank's tiles.
    pub fn local_used_bytes(&self) -> u64 {
        self.levels
            .iter()
            .flat_map(|l| l.tiles.iter())
            .map(|t| t.used_bytes() as u64)
            .sum()
    }

    /// `[min, max, sum]` over ranks of the bytes reserved by each rank's
    /// tiles. Collective.
    pub fn byte_spread(&self) -> [u64; 3] {
        let local = self.local_capacity_bytes() as i64;
        let rank = self.comm.rank();
        let mut min = [local];
        let mut max = [local];
        let mut sum = [local];
        fatal_comm(rank, "byte_spread", self.comm.allreduce_i64(&mut min, ReduceOp::Min));
        fatal_comm(rank, "byte_spread", self.comm.allreduce_i64(&mut max, ReduceOp::Max));
        fatal_comm(rank, "byte_spread", self.comm.allreduce_i64(&mut sum, ReduceOp::Sum));
        [min[0] as u64, max[0] as u64, sum[0] as u64]
    }

    /// Log the byte spread and this arena's usage on the I/O rank. Collective.
    pub fn print_capacity(&self) {
        let [min, max, sum] = self.byte_spread();
        if self.comm.is_io_rank() {
            let usage = arena::usage(self.alloc.kind());
            tracing::info!(
                min_bytes = min,
                max_bytes = max,
                total_bytes = sum,
                arena = ?self.alloc.kind(),
                arena_live = usage.live_bytes,
                arena_peak = usage.peak_bytes,
                "particle container capacity"
            );
        }
    }
}
