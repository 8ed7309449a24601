//! Spatial hash for cell -> box lookups.
//!
//! Every box is registered in each bin it overlaps; bins are as large as the
//! largest box, so a box touches at most 8 bins and a lookup only inspects the
//! handful of boxes registered in one bin.

use crate::{BoxArray, IndexBox};
use glam::IVec3;
use std::collections::HashMap;

use crate::index_box::floor_div;

/// Read-only index over the boxes of one [`BoxArray`].
#[derive(Debug, Clone)]
pub struct BoxLocator {
    boxes: Vec<IndexBox>,
    bin_size: IVec3,
    bins: HashMap<IVec3, Vec<usize>>,
}

impl BoxLocator {
    pub fn new(ba: &BoxArray) -> Self {
        let bin_size = ba
            .iter()
            .fold(IVec3::ONE, |acc, b| acc.max(b.length()));
        let mut locator = Self {
            boxes: ba.boxes().to_vec(),
            bin_size,
            bins: HashMap::new(),
        };
        for (index, b) in ba.iter().enumerate() {
            if b.is_empty() {
                continue;
            }
            let bins = locator.bin_range(b);
            for bin in bins.cells() {
                locator.bins.entry(bin).or_default().push(index);
            }
        }
        locator
    }

    fn bin_of(&self, cell: IVec3) -> IVec3 {
        floor_div(cell, self.bin_size)
    }

    fn bin_range(&self, b: &IndexBox) -> IndexBox {
        IndexBox::new(self.bin_of(b.lo()), self.bin_of(b.hi()))
    }

    /// Index of the box containing `cell`, if any.
    ///
    /// Boxes of a box array are disjoint, so at most one box matches.
    pub fn find(&self, cell: IVec3) -> Option<usize> {
        self.bins
            .get(&self.bin_of(cell))?
            .iter()
            .copied()
            .find(|&i| self.boxes[i].contains(cell))
    }

    /// Indices of all boxes whose `n_grow`-grown extent contains `cell`,
    /// ascending.
    pub fn find_grown(&self, cell: IVec3, n_grow: i32) -> Vec<usize> {
        if n_grow <= 0 {
            return self.find(cell).into_iter().collect();
        }
        self.intersecting(&IndexBox::new(cell, cell).grow(n_grow))
    }

    /// Indices of all boxes intersecting `region`, ascending.
    pub fn intersecting(&self, region: &IndexBox) -> Vec<usize> {
        if region.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<usize> = self
            .bin_range(region)
            .cells()
            .filter_map(|bin| self.bins.get(&bin))
            .flatten()
            .copied()
            .filter(|&i| self.boxes[i].intersects(region))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// True if any box contains `cell`.
    #[inline]
    pub fn covers(&self, cell: IVec3) -> bool {
        self.find(cell).is_some()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
