// src/adaptive/estimator.rs
//! A-posteriori error indicators
//!
//! # Residual (jump) indicator
//!
//! For every interior facet F shared by T₁ and T₂:
//! ```text
//! η_F = h_F ∫_F [∇u_h · n]²,     h_F = ½ (diam T₁ + diam T₂)
//! ```
//! and each neighbour receives half: `η_T = ½ Σ_{F ⊂ ∂T} η_F`.
//!
//! # Gradient recovery indicator (Zienkiewicz–Zhu)
//!
//! The recovered gradient `G(u_h)` is the volume-weighted average of the
//! element gradients around each vertex, interpolated linearly:
//! ```text
//! η_T = ∫_T |G(u_h) - ∇u_h|²
//! ```
//!
//! Both indicators vanish on functions the space reproduces exactly
//! (affine data), and the global estimate is `sqrt(Σ η_T)`.

use crate::error::{PdeError, PdeResult};
use crate::fem::{ElementGeometry, FunctionSpace, QuadratureRule};
use crate::mesh::Facet;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RefinementCriterion {
    #[default]
    Residual,
    Gradient,
}

/// Per-element indicators and the global estimate
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorIndicator {
    pub values: Vec<f64>,
    pub estimate: f64,
}

impl ErrorIndicator {
    pub fn new(values: Vec<f64>) -> Self {
        let estimate = values.iter().sum::<f64>().sqrt();
        ErrorIndicator { values, estimate }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

/// Elements selected for refinement and for coarsening
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marking {
    pub refine: Vec<bool>,
    pub coarsen: Vec<bool>,
}

impl Marking {
    pub fn num_refine(&self) -> usize {
        self.refine.iter().filter(|&&m| m).count()
    }

    pub fn num_coarsen(&self) -> usize {
        self.coarsen.iter().filter(|&&m| m).count()
    }
}

/// Maximum strategy: refine `η_T > refine_fraction · max η`, coarsen
/// `η_T ≤ coarsen_fraction · max η`. With `coarsen_fraction < refine_fraction`
/// the two sets are disjoint.
pub fn mark(indicator: &ErrorIndicator, refine_fraction: f64, coarsen_fraction: Option<f64>) -> Marking {
    let max = indicator.max();
    let refine = indicator
        .values
        .iter()
        .map(|&eta| eta > refine_fraction * max)
        .collect();
    let coarsen = match coarsen_fraction {
        Some(fraction) => indicator.values.iter().map(|&eta| eta <= fraction * max).collect(),
        None => vec![false; indicator.len()],
    };
    Marking { refine, coarsen }
}

/// Indicator of the coefficient vector `values` on `space`.
pub fn estimate(
    space: &FunctionSpace,
    values: &[f64],
    criterion: RefinementCriterion,
) -> PdeResult<ErrorIndicator> {
    if values.len() != space.num_dofs() {
        return Err(PdeError::InvalidConfiguration {
            field: "values".to_string(),
            reason: format!("expected {} coefficients, got {}", space.num_dofs(), values.len()),
        });
    }
    let mesh = space.mesh();
    let geometries: Vec<ElementGeometry> = (0..mesh.num_elements())
        .into_par_iter()
        .map(|e| {
            ElementGeometry::new(mesh, e).ok_or_else(|| PdeError::Assembly {
                element: e,
                reason: "singular element Jacobian".to_string(),
            })
        })
        .collect::<PdeResult<_>>()?;

    let values = match criterion {
        RefinementCriterion::Residual => residual_indicator(space, values, &geometries),
        RefinementCriterion::Gradient => recovery_indicator(space, values, &geometries),
    };
    if let Some(e) = values.iter().position(|v| !v.is_finite()) {
        return Err(PdeError::Assembly {
            element: e,
            reason: "non-finite error indicator".to_string(),
        });
    }
    Ok(ErrorIndicator::new(values))
}

/// Barycentric coordinates in `element` of the facet point with facet-local
/// coordinates `mu`.
fn facet_lambda(space: &FunctionSpace, element: usize, facet: &Facet, mu: &[f64]) -> Vec<f64> {
    let vertices = space.mesh().element(element);
    let mut lambda = vec![0.0; vertices.len()];
    for (node, &m) in facet.nodes.iter().zip(mu) {
        if let Some(pos) = vertices.iter().position(|v| v == node) {
            lambda[pos] = m;
        }
    }
    lambda
}

fn residual_indicator(space: &FunctionSpace, values: &[f64], geometries: &[ElementGeometry]) -> Vec<f64> {
    let mesh = space.mesh();
    let degree = 2 * space.order().degree();
    let rule = QuadratureRule::simplex(space.dimension() - 1, degree);
    let interior: Vec<Facet> = mesh.facets().into_iter().filter(|f| !f.is_boundary()).collect();

    let jumps: Vec<(usize, usize, f64)> = interior
        .par_iter()
        .filter_map(|facet| {
            let (left, right) = (facet.owners.0, facet.owners.1?);
            let normal = mesh.facet_normal(&facet.nodes);
            let mut integral = 0.0;
            for q in 0..rule.len() {
                let mu = rule.barycentric(q);
                let g1 = space.gradient_in_element(
                    values,
                    left,
                    &facet_lambda(space, left, facet, &mu),
                    &geometries[left],
                );
                let g2 = space.gradient_in_element(
                    values,
                    right,
                    &facet_lambda(space, right, facet, &mu),
                    &geometries[right],
                );
                let jump: f64 = g1
                    .iter()
                    .zip(&g2)
                    .zip(&normal)
                    .map(|((a, b), n)| (a - b) * n)
                    .sum();
                integral += rule.weight(q) * jump * jump;
            }
            let h = 0.5 * (mesh.element_diameter(left) + mesh.element_diameter(right));
            Some((left, right, h * integral * mesh.facet_measure(&facet.nodes)))
        })
        .collect();

    let mut eta = vec![0.0; mesh.num_elements()];
    for (left, right, jump) in jumps {
        eta[left] += 0.5 * jump;
        eta[right] += 0.5 * jump;
    }
    eta
}

fn recovery_indicator(space: &FunctionSpace, values: &[f64], geometries: &[ElementGeometry]) -> Vec<f64> {
    let mesh = space.mesh();
    let d = space.dimension();
    let centroid = vec![1.0 / (d + 1) as f64; d + 1];

    // Volume-weighted vertex averages of the element gradients
    let mut recovered = vec![0.0; mesh.num_nodes() * d];
    let mut weight = vec![0.0; mesh.num_nodes()];
    for (e, vertices) in mesh.elements().enumerate() {
        let geometry = &geometries[e];
        let grad = space.gradient_in_element(values, e, &centroid, geometry);
        for &v in vertices {
            weight[v] += geometry.measure;
            for (r, g) in recovered[v * d..(v + 1) * d].iter_mut().zip(&grad) {
                *r += geometry.measure * g;
            }
        }
    }
    for (v, &w) in weight.iter().enumerate() {
        if w > 0.0 {
            recovered[v * d..(v + 1) * d].iter_mut().for_each(|r| *r /= w);
        }
    }

    let rule = QuadratureRule::simplex(d, 2 * space.order().degree());
    (0..mesh.num_elements())
        .into_par_iter()
        .map(|e| {
            let geometry = &geometries[e];
            let vertices = mesh.element(e);
            let mut integral = 0.0;
            for q in 0..rule.len() {
                let lambda = rule.barycentric(q);
                let grad = space.gradient_in_element(values, e, &lambda, geometry);
                let mut error = 0.0;
                for (k, g) in grad.iter().enumerate() {
                    let smooth: f64 = vertices
                        .iter()
                        .zip(&lambda)
                        .map(|(&v, l)| l * recovered[v * d + k])
                        .sum();
                    error += (smooth - g) * (smooth - g);
                }
                integral += rule.weight(q) * error;
            }
            integral * geometry.measure
        })
        .collect()
}
