//! Physical extent, periodicity and cell size of one level

use crate::{IndexBox, MeshError};
use glam::{DVec3, IVec3};

/// Axis-aligned physical region, half-open: `lo <= x < hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealBox {
    lo: DVec3,
    hi: DVec3,
}

impl RealBox {
    pub fn new(lo: DVec3, hi: DVec3) -> Result<Self, MeshError> {
        for dim in 0..3 {
            if lo[dim] >= hi[dim] {
                return Err(MeshError::InvalidRealBox {
                    dim,
                    lo: lo[dim],
                    hi: hi[dim],
                });
            }
        }
        Ok(Self { lo, hi })
    }

    /// The unit cube `[0, 1)^3`.
    pub fn unit() -> Self {
        Self {
            lo: DVec3::ZERO,
            hi: DVec3::ONE,
        }
    }

    #[inline]
    pub fn lo(&self) -> DVec3 {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> DVec3 {
        self.hi
    }

    #[inline]
    pub fn length(&self) -> DVec3 {
        self.hi - self.lo
    }

    #[inline]
    pub fn contains(&self, pos: DVec3) -> bool {
        pos.cmpge(self.lo).all() && pos.cmplt(self.hi).all()
    }
}

/// Geometry of one refinement level.
///
/// Cell `domain.lo()` starts at `prob_domain.lo()`; cell size is the physical
/// length divided by the number of domain cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    domain: IndexBox,
    prob: RealBox,
    periodic: [bool; 3],
    dx: DVec3,
    inv_dx: DVec3,
}

impl Geometry {
    pub fn new(domain: IndexBox, prob: RealBox, periodic: [bool; 3]) -> Result<Self, MeshError> {
        if domain.is_empty() {
            return Err(MeshError::EmptyBox {
                lo: domain.lo().to_array(),
                hi: domain.hi().to_array(),
            });
        }
        let dx = prob.length() / domain.length().as_dvec3();
        Ok(Self {
            domain,
            prob,
            periodic,
            dx,
            inv_dx: DVec3::ONE / dx,
        })
    }

    #[inline]
    pub fn domain(&self) -> IndexBox {
        self.domain
    }

    #[inline]
    pub fn prob_domain(&self) -> RealBox {
        self.prob
    }

    #[inline]
    pub fn cell_size(&self) -> DVec3 {
        self.dx
    }

    #[inline]
    pub fn inv_cell_size(&self) -> DVec3 {
        self.inv_dx
    }

    #[inline]
    pub fn is_periodic(&self, dim: usize) -> bool {
        self.periodic[dim]
    }

    pub fn periodicity(&self) -> [bool; 3] {
        self.periodic
    }

    pub fn is_any_periodic(&self) -> bool {
        self.periodic.iter().any(|&p| p)
    }

    /// Cell containing `pos`.
    ///
    /// Half-open per cell: a position exactly on a face belongs to the cell on
    /// the upper side. Positions inside the physical domain that round past
    /// the last cell are clamped back onto the domain.
    pub fn cell_of(&self, pos: DVec3) -> IVec3 {
        let rel = ((pos - self.prob.lo()) * self.inv_dx).floor();
        let mut cell = self.domain.lo() + rel.as_ivec3();
        for dim in 0..3 {
            if pos[dim] < self.prob.hi()[dim] && cell[dim] > self.domain.hi()[dim] {
                cell[dim] = self.domain.hi()[dim];
            }
            if pos[dim] >= self.prob.lo()[dim] && cell[dim] < self.domain.lo()[dim] {
                cell[dim] = self.domain.lo()[dim];
            }
        }
        cell
    }

    /// Lower corner of `cell` in physical space.
    pub fn cell_lo(&self, cell: IVec3) -> DVec3 {
        self.prob.lo() + (cell - self.domain.lo()).as_dvec3() * self.dx
    }

    pub fn cell_center(&self, cell: IVec3) -> DVec3 {
        self.cell_lo(cell) + 0.5 * self.dx
    }

    /// Physical extent of an index box on this level.
    pub fn real_box_of(&self, bx: &IndexBox) -> RealBox {
        RealBox {
            lo: self.cell_lo(bx.lo()),
            hi: self.cell_lo(bx.hi() + IVec3::ONE),
        }
    }

    /// Whether `pos` lies inside the domain along every non-periodic dimension.
    /// Non-finite positions are never inside, periodic or not.
    pub fn inside_domain(&self, pos: DVec3) -> bool {
        pos.is_finite()
            && (0..3).all(|dim| {
                self.periodic[dim] || (pos[dim] >= self.prob.lo()[dim] && pos[dim] < self.prob.hi()[dim])
            })
    }

    /// Map `pos` back into the domain along periodic dimensions.
    /// Returns true if the position changed.
    pub fn periodic_wrap(&self, pos: &mut DVec3) -> bool {
        let mut shifted = false;
        for dim in 0..3 {
            if !self.periodic[dim] {
                continue;
            }
            let lo = self.prob.lo()[dim];
            let hi = self.prob.hi()[dim];
            let x = pos[dim];
            if x < lo || x >= hi {
                let mut wrapped = lo + (x - lo).rem_euclid(hi - lo);
                if wrapped >= hi {
                    wrapped = lo;
                }
                pos[dim] = wrapped;
                shifted = true;
            }
        }
        shifted
    }

    /// Same physical domain with the index space refined by `ratio`.
    pub fn refine(&self, ratio: IVec3) -> Result<Self, MeshError> {
        if ratio.cmple(IVec3::ZERO).any() {
            return Err(MeshError::InvalidRefRatio(ratio.to_array()));
        }
        Self::new(self.domain.refine(ratio), self.prob, self.periodic)
    }
}
