// box_array.rs - Disjoint decomposition of one level into boxes

use crate::{BoxLocator, IndexBox, MeshError};
use glam::IVec3;

/// Ordered collection of non-overlapping boxes covering (part of) a level.
///
/// The box index is the position in this array and is the `grid` half of a
/// tile's pair index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoxArray {
    boxes: Vec<IndexBox>,
}

impl BoxArray {
    pub fn new(boxes: Vec<IndexBox>) -> Self {
        Self { boxes }
    }

    /// Single box covering the whole domain.
    pub fn from_domain(domain: IndexBox) -> Self {
        Self::new(vec![domain])
    }

    /// Chop every box so that no side exceeds `max` cells.
    pub fn max_size(mut self, max: i32) -> Result<Self, MeshError> {
        if max <= 0 {
            return Err(MeshError::InvalidMaxSize(max));
        }
        for dim in 0..3 {
            let mut chopped = Vec::with_capacity(self.boxes.len());
            for b in &self.boxes {
                chop_axis(b, dim, max, &mut chopped);
            }
            self.boxes = chopped;
        }
        Ok(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&IndexBox> {
        self.boxes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexBox> {
        self.boxes.iter()
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.boxes
    }

    pub fn refine(&self, ratio: IVec3) -> Self {
        Self::new(self.boxes.iter().map(|b| b.refine(ratio)).collect())
    }

    pub fn coarsen(&self, ratio: IVec3) -> Self {
        Self::new(self.boxes.iter().map(|b| b.coarsen(ratio)).collect())
    }

    /// Total number of cells in all boxes.
    pub fn num_pts(&self) -> u64 {
        self.boxes.iter().map(IndexBox::num_pts).sum()
    }

    /// Smallest box enclosing every box of the array.
    pub fn minimal_box(&self) -> Option<IndexBox> {
        let first = self.boxes.first()?;
        let (lo, hi) = self
            .boxes
            .iter()
            .fold((first.lo(), first.hi()), |(lo, hi), b| (lo.min(b.lo()), hi.max(b.hi())));
        Some(IndexBox::new(lo, hi))
    }

    /// Fails on the first pair of boxes sharing a cell.
    pub fn validate_disjoint(&self) -> Result<(), MeshError> {
        let locator = self.locator();
        for (first, b) in self.boxes.iter().enumerate() {
            if let Some(second) = locator.intersecting(b).into_iter().find(|&j| j > first) {
                return Err(MeshError::OverlappingBoxes { first, second });
            }
        }
        Ok(())
    }

    /// Build a spatial-hash index for cell -> box lookups.
    pub fn locator(&self) -> BoxLocator {
        BoxLocator::new(self)
    }
}

fn chop_axis(b: &IndexBox, dim: usize, max: i32, out: &mut Vec<IndexBox>) {
    let (lo, hi) = (b.lo(), b.hi());
    let mut start = lo[dim];
    while start <= hi[dim] {
        let end = (start + max - 1).min(hi[dim]);
        let mut piece_lo = lo;
        let mut piece_hi = hi;
        piece_lo[dim] = start;
        piece_hi[dim] = end;
        out.push(IndexBox::new(piece_lo, piece_hi));
        start = end + 1;
    }
}
