// src/mesh/domain.rs
use crate::error::{PdeError, PdeResult};
use bitflags::bitflags;

bitflags! {
    /// Faces of an axis-aligned box domain a node or facet lies on
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct BoundaryFaces: u8 {
        const NONE  = 0;
        const X_MIN = 1 << 0;
        const X_MAX = 1 << 1;
        const Y_MIN = 1 << 2;
        const Y_MAX = 1 << 3;
        const Z_MIN = 1 << 4;
        const Z_MAX = 1 << 5;
    }
}

impl BoundaryFaces {
    pub fn min_face(axis: usize) -> Self {
        Self::from_bits_truncate(1 << (2 * axis))
    }

    pub fn max_face(axis: usize) -> Self {
        Self::from_bits_truncate(1 << (2 * axis + 1))
    }

    /// Both faces normal to `axis`.
    pub fn axis(axis: usize) -> Self {
        Self::min_face(axis) | Self::max_face(axis)
    }

    /// Every face of a domain of the given dimension.
    pub fn all_for_dimension(dimension: usize) -> Self {
        (0..dimension).fold(Self::NONE, |acc, axis| acc | Self::axis(axis))
    }

    /// Outward unit normal of a single face, as (axis, sign).
    pub fn outward_normal(self) -> Option<(usize, f64)> {
        if self.bits().count_ones() != 1 {
            return None;
        }
        let bit = self.bits().trailing_zeros() as usize;
        let sign = if bit % 2 == 0 { -1.0 } else { 1.0 };
        Some((bit / 2, sign))
    }
}

/// Axis-aligned box `[a₀, b₀] × … × [a_{d-1}, b_{d-1}]` in one to three dimensions
#[derive(Clone, Debug, PartialEq)]
pub struct Domain {
    extents: Vec<(f64, f64)>,
}

/// Relative tolerance for deciding that a coordinate lies on a face.
const FACE_TOLERANCE: f64 = 1e-10;

impl Domain {
    pub fn new(dimension: usize, extents: Vec<(f64, f64)>) -> PdeResult<Self> {
        if !(1..=3).contains(&dimension) {
            return Err(PdeError::InvalidDomain {
                reason: format!("dimension must be 1, 2 or 3, got {}", dimension),
            });
        }
        if extents.len() != dimension {
            return Err(PdeError::InvalidDomain {
                reason: format!(
                    "dimension {} requires {} extent pairs, got {}",
                    dimension,
                    dimension,
                    extents.len()
                ),
            });
        }
        for (axis, &(lo, hi)) in extents.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(PdeError::InvalidDomain {
                    reason: format!("extent on axis {} is not finite: [{}, {}]", axis, lo, hi),
                });
            }
            if lo >= hi {
                return Err(PdeError::InvalidDomain {
                    reason: format!(
                        "extent on axis {} is not strictly increasing: [{}, {}]",
                        axis, lo, hi
                    ),
                });
            }
        }
        Ok(Domain { extents })
    }

    pub fn interval(lo: f64, hi: f64) -> PdeResult<Self> {
        Self::new(1, vec![(lo, hi)])
    }

    pub fn dimension(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[(f64, f64)] {
        &self.extents
    }

    pub fn extent(&self, axis: usize) -> (f64, f64) {
        self.extents[axis]
    }

    pub fn length(&self, axis: usize) -> f64 {
        let (lo, hi) = self.extents[axis];
        hi - lo
    }

    pub fn measure(&self) -> f64 {
        (0..self.dimension()).map(|axis| self.length(axis)).product()
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dimension()
            && self.extents.iter().zip(x).enumerate().all(|(axis, (&(lo, hi), &xi))| {
                let tol = FACE_TOLERANCE * self.length(axis);
                xi >= lo - tol && xi <= hi + tol
            })
    }

    /// Faces a point lies on, within a relative tolerance of each extent.
    pub fn faces_of(&self, x: &[f64]) -> BoundaryFaces {
        let mut faces = BoundaryFaces::NONE;
        for (axis, &(lo, hi)) in self.extents.iter().enumerate() {
            let tol = FACE_TOLERANCE * self.length(axis);
            if (x[axis] - lo).abs() <= tol {
                faces |= BoundaryFaces::min_face(axis);
            }
            if (x[axis] - hi).abs() <= tol {
                faces |= BoundaryFaces::max_face(axis);
            }
        }
        faces
    }
}
