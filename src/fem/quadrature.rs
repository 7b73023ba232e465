// src/fem/quadrature.rs
//! Quadrature on the reference simplex
//!
//! # Collapsed Gauss–Legendre rules
//!
//! The unit cube is mapped onto the reference simplex by the Duffy
//! transform
//! ```text
//! ξ₁ = u
//! ξ₂ = v (1 - u)
//! ξ₃ = w (1 - u)(1 - v),     |∂ξ/∂(u,v,w)| = (1 - u)^(d-1) (1 - v)^(d-2)
//! ```
//! and a tensor Gauss–Legendre rule with `n = ⌈(p + d)/2⌉` points per
//! direction integrates polynomials of total degree `p` exactly, the
//! extra `d` absorbing the Jacobian factors.
//!
//! Weights are normalized to sum to one, so `∫_T f ≈ |T| Σ w_q f(x_q)`.

use crate::math_utils::gauss_legendre_unit;
use crate::mesh::mesh::reference_factorial;

#[derive(Clone, Debug)]
pub struct QuadratureRule {
    dimension: usize,
    /// Reference coordinates ξ, stride `dimension`
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl QuadratureRule {
    /// Rule exact for polynomials of total degree `degree` on the reference
    /// `dimension`-simplex. Dimension 0 is a single point of weight one.
    pub fn simplex(dimension: usize, degree: usize) -> Self {
        if dimension == 0 {
            return QuadratureRule {
                dimension,
                points: Vec::new(),
                weights: vec![1.0],
            };
        }

        let n = ((degree + dimension + 1) / 2).max(1);
        let (nodes, gauss_weights) = gauss_legendre_unit(n);
        let total = n.pow(dimension as u32);
        let scale = reference_factorial(dimension);

        let mut points = Vec::with_capacity(total * dimension);
        let mut weights = Vec::with_capacity(total);
        for flat in 0..total {
            let mut rest = flat;
            let mut collapsed = [0.0; 3];
            let mut w = scale;
            for k in 0..dimension {
                let i = rest % n;
                rest /= n;
                collapsed[k] = nodes[i];
                w *= gauss_weights[i];
            }
            // ξ_k = t_k Π_{j<k} (1 - t_j)
            let mut remaining = 1.0;
            for &t in collapsed.iter().take(dimension) {
                points.push(t * remaining);
                w *= remaining;
                remaining *= 1.0 - t;
            }
            weights.push(w);
        }

        QuadratureRule {
            dimension,
            points,
            weights,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn point(&self, q: usize) -> &[f64] {
        &self.points[q * self.dimension..(q + 1) * self.dimension]
    }

    pub fn weight(&self, q: usize) -> f64 {
        self.weights[q]
    }

    /// Barycentric coordinates `(1 - Σξ, ξ₁, …, ξ_d)` of point `q`.
    pub fn barycentric(&self, q: usize) -> Vec<f64> {
        let xi = self.point(q);
        let mut lambda = Vec::with_capacity(self.dimension + 1);
        lambda.push(1.0 - xi.iter().sum::<f64>());
        lambda.extend_from_slice(xi);
        lambda
    }
}
