//! Sub-division of a box into tiles
//!
//! Along each axis a box of `len` cells is split into `max(1, len / ts)`
//! tiles; the remainder cells go one each to the leading tiles.

use crate::IndexBox;
use glam::IVec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisSplit {
    lo: i32,
    ntiles: i32,
    base: i32,
    extra: i32,
}

impl AxisSplit {
    fn new(lo: i32, len: i32, tile_size: i32) -> Self {
        let ntiles = if tile_size <= 0 { 1 } else { (len / tile_size).max(1) };
        Self {
            lo,
            ntiles,
            base: len / ntiles,
            extra: len % ntiles,
        }
    }

    fn index_of(&self, cell: i32) -> i32 {
        let offset = cell - self.lo;
        let big = self.extra * (self.base + 1);
        let index = if offset < big {
            offset.div_euclid(self.base + 1)
        } else {
            self.extra + (offset - big).div_euclid(self.base.max(1))
        };
        index.clamp(0, self.ntiles - 1)
    }

    fn range(&self, tile: i32) -> (i32, i32) {
        let (start, size) = if tile < self.extra {
            (tile * (self.base + 1), self.base + 1)
        } else {
            (self.extra * (self.base + 1) + (tile - self.extra) * self.base, self.base)
        };
        (self.lo + start, self.lo + start + size - 1)
    }
}

/// Tiling of one valid box for a given tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    axes: [AxisSplit; 3],
}

impl TileLayout {
    /// A non-positive tile size along an axis disables tiling on that axis.
    pub fn new(valid_box: &IndexBox, tile_size: IVec3) -> Self {
        let len = valid_box.length();
        let lo = valid_box.lo();
        Self {
            axes: [
                AxisSplit::new(lo.x, len.x, tile_size.x),
                AxisSplit::new(lo.y, len.y, tile_size.y),
                AxisSplit::new(lo.z, len.z, tile_size.z),
            ],
        }
    }

    /// Layout with a single tile spanning the whole box.
    pub fn untiled(valid_box: &IndexBox) -> Self {
        Self::new(valid_box, IVec3::ZERO)
    }

    pub fn num_tiles(&self) -> usize {
        self.axes.iter().map(|a| a.ntiles as usize).product()
    }

    /// Local tile index of `cell`. Cells outside the box map to the nearest
    /// tile, so particles in a grown ghost margin still have a home.
    pub fn tile_index_of(&self, cell: IVec3) -> usize {
        let ix = self.axes[0].index_of(cell.x) as usize;
        let iy = self.axes[1].index_of(cell.y) as usize;
        let iz = self.axes[2].index_of(cell.z) as usize;
        let nx = self.axes[0].ntiles as usize;
        let ny = self.axes[1].ntiles as usize;
        ix + nx * (iy + ny * iz)
    }

    /// Cells covered by tile `index`.
    pub fn tilebox(&self, index: usize) -> Option<IndexBox> {
        if index >= self.num_tiles() {
            return None;
        }
        let nx = self.axes[0].ntiles as usize;
        let ny = self.axes[1].ntiles as usize;
        let ix = (index % nx) as i32;
        let iy = ((index / nx) % ny) as i32;
        let iz = (index / (nx * ny)) as i32;
        let (xlo, xhi) = self.axes[0].range(ix);
        let (ylo, yhi) = self.axes[1].range(iy);
        let (zlo, zhi) = self.axes[2].range(iz);
        Some(IndexBox::new(IVec3::new(xlo, ylo, zlo), IVec3::new(xhi, yhi, zhi)))
    }
}
