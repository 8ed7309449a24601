// index_box.rs - Cell-centered index-space boxes
//
// Bounds are inclusive on both ends, so a box with lo == hi holds one cell.

use glam::IVec3;

/// Axis-aligned region of cells on one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBox {
    lo: IVec3,
    hi: IVec3,
}

impl IndexBox {
    /// Create a box from inclusive corner cells.
    pub const fn new(lo: IVec3, hi: IVec3) -> Self {
        Self { lo, hi }
    }

    /// Box covering `0..n` cells in every dimension.
    pub fn from_extent(n: IVec3) -> Self {
        Self::new(IVec3::ZERO, n - IVec3::ONE)
    }

    #[inline]
    pub fn lo(&self) -> IVec3 {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> IVec3 {
        self.hi
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi.x < self.lo.x || self.hi.y < self.lo.y || self.hi.z < self.lo.z
    }

    /// Number of cells along each dimension.
    #[inline]
    pub fn length(&self) -> IVec3 {
        (self.hi - self.lo + IVec3::ONE).max(IVec3::ZERO)
    }

    /// Total number of cells.
    pub fn num_pts(&self) -> u64 {
        let len = self.length();
        len.x as u64 * len.y as u64 * len.z as u64
    }

    #[inline]
    pub fn contains(&self, cell: IVec3) -> bool {
        cell.cmpge(self.lo).all() && cell.cmple(self.hi).all()
    }

    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    /// Grow (or shrink, for negative `n`) by `n` cells on every face.
    pub fn grow(&self, n: i32) -> Self {
        self.grow_vec(IVec3::splat(n))
    }

    pub fn grow_vec(&self, n: IVec3) -> Self {
        Self::new(self.lo - n, self.hi + n)
    }

    pub fn shift(&self, offset: IVec3) -> Self {
        Self::new(self.lo + offset, self.hi + offset)
    }

    pub fn intersection(&self, other: &IndexBox) -> Option<IndexBox> {
        let isect = Self::new(self.lo.max(other.lo), self.hi.min(other.hi));
        (!isect.is_empty()).then_some(isect)
    }

    #[inline]
    pub fn intersects(&self, other: &IndexBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Refine by a per-dimension ratio.
    pub fn refine(&self, ratio: IVec3) -> Self {
        Self::new(self.lo * ratio, (self.hi + IVec3::ONE) * ratio - IVec3::ONE)
    }

    /// Coarsen by a per-dimension ratio, rounding toward negative infinity.
    pub fn coarsen(&self, ratio: IVec3) -> Self {
        Self::new(floor_div(self.lo, ratio), floor_div(self.hi, ratio))
    }

    /// Offset of `cell` in x-fastest order. The cell must lie inside the box.
    #[inline]
    pub fn linear_index(&self, cell: IVec3) -> usize {
        debug_assert!(self.contains(cell));
        let len = self.length();
        let d = cell - self.lo;
        (d.x as usize) + len.x as usize * (d.y as usize + len.y as usize * d.z as usize)
    }

    /// Iterate over the cells of the box in x-fastest order.
    pub fn cells(&self) -> impl Iterator<Item = IVec3> + '_ {
        let (lo, hi) = (self.lo, self.hi);
        let empty = self.is_empty();
        (lo.z..=hi.z)
            .flat_map(move |k| (lo.y..=hi.y).flat_map(move |j| (lo.x..=hi.x).map(move |i| IVec3::new(i, j, k))))
            .filter(move |_| !empty)
    }
}

/// Component-wise floor division for positive divisors.
#[inline]
pub(crate) fn floor_div(v: IVec3, d: IVec3) -> IVec3 {
    IVec3::new(v.x.div_euclid(d.x), v.y.div_euclid(d.y), v.z.div_euclid(d.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_and_points() {
        let b = IndexBox::new(IVec3::new(0, 0, 0), IVec3::new(3, 1, 0));
        assert_eq!(b.length(), IVec3::new(4, 2, 1));
        assert_eq!(b.num_pts(), 8);
        assert!(!b.is_empty());
        assert!(IndexBox::new(IVec3::ONE, IVec3::ZERO).is_empty());
    }

    #[test]
    fn refine_then_coarsen_is_identity() {
        let b = IndexBox::new(IVec3::new(-2, 0, 3), IVec3::new(5, 7, 9));
        let r = IVec3::new(2, 2, 4);
        assert_eq!(b.refine(r).coarsen(r), b);
    }

    #[test]
    fn coarsen_rounds_down_for_negative_cells() {
        let b = IndexBox::new(IVec3::splat(-3), IVec3::splat(-1));
        let c = b.coarsen(IVec3::splat(2));
        assert_eq!(c.lo(), IVec3::splat(-2));
        assert_eq!(c.hi(), IVec3::splat(-1));
    }

    #[test]
    fn cells_visit_every_point_once_in_linear_order() {
        let b = IndexBox::new(IVec3::new(1, 2, 3), IVec3::new(3, 3, 4));
        let cells: Vec<IVec3> = b.cells().collect();
        assert_eq!(cells.len() as u64, b.num_pts());
        for (i, c) in cells.iter().enumerate() {
            assert_eq!(b.linear_index(*c), i);
        }
    }

    #[test]
    fn grow_and_intersection() {
        let a = IndexBox::from_extent(IVec3::splat(4));
        let b = a.shift(IVec3::new(4, 0, 0));
        assert!(!a.intersects(&b));
        assert!(a.grow(1).intersects(&b));
        let isect = a.grow(1).intersection(&b).unwrap();
        assert_eq!(isect.length(), IVec3::new(1, 4, 4));
    }
}
