//! Box -> rank ownership

use crate::{BoxArray, MeshError};

/// Assignment of every box of a [`BoxArray`] to exactly one rank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionMapping {
    ranks: Vec<usize>,
}

impl DistributionMapping {
    pub fn new(ranks: Vec<usize>) -> Self {
        Self { ranks }
    }

    /// Box `i` goes to rank `i % nprocs`.
    pub fn round_robin(nboxes: usize, nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        Self::new((0..nboxes).map(|i| i % nprocs).collect())
    }

    /// Consecutive runs of boxes per rank, sizes differing by at most one.
    pub fn contiguous(nboxes: usize, nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        let base = nboxes / nprocs;
        let extra = nboxes % nprocs;
        let mut ranks = Vec::with_capacity(nboxes);
        for rank in 0..nprocs {
            let count = base + usize::from(rank < extra);
            ranks.extend(std::iter::repeat(rank).take(count));
        }
        Self::new(ranks)
    }

    /// Every box owned by rank 0.
    pub fn single_rank(nboxes: usize) -> Self {
        Self::new(vec![0; nboxes])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Owning rank of box `index`.
    #[inline]
    pub fn owner(&self, index: usize) -> Option<usize> {
        self.ranks.get(index).copied()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Box indices owned by `rank`, ascending.
    pub fn local_boxes(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.ranks
            .iter()
            .enumerate()
            .filter(move |(_, &r)| r == rank)
            .map(|(i, _)| i)
    }

    /// Check that the map matches `ba` and only names existing ranks.
    pub fn validate(&self, ba: &BoxArray, nprocs: usize) -> Result<(), MeshError> {
        if self.ranks.len() != ba.len() {
            return Err(MeshError::LengthMismatch {
                boxes: ba.len(),
                ranks: self.ranks.len(),
            });
        }
        if let Some((box_index, &rank)) = self.ranks.iter().enumerate().find(|(_, &r)| r >= nprocs) {
            return Err(MeshError::RankOutOfRange {
                box_index,
                rank,
                nprocs,
            });
        }
        Ok(())
    }
}
