// src/fem/space.rs
//! Lagrange P1/P2 function spaces on simplicial meshes
//!
//! Shape functions are written in barycentric coordinates λ:
//! ```text
//! P1:  φ_k = λ_k
//! P2:  φ_k = λ_k (2λ_k - 1)      (vertices)
//!      φ_ij = 4 λ_i λ_j          (edge midpoints)
//! ```
//! P2 degrees of freedom are numbered vertices first, then edges in sorted
//! node-pair order, so numbering depends only on the mesh.

use super::config::ElementOrder;
use crate::linalg::CsrPattern;
use crate::mesh::mesh::local_edges;
use crate::mesh::{BoundaryFaces, Mesh};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Affine map of one element and the gradients of its barycentric coordinates
#[derive(Clone, Debug)]
pub struct ElementGeometry {
    pub measure: f64,
    pub origin: Vec<f64>,
    pub jacobian: DMatrix<f64>,
    /// `∇λ_k` for k = 0..=d
    pub lambda_gradients: Vec<Vec<f64>>,
}

impl ElementGeometry {
    /// `None` when the element Jacobian is singular.
    pub fn new(mesh: &Mesh, e: usize) -> Option<Self> {
        let d = mesh.dimension();
        let jacobian = mesh.element_jacobian(e);
        let det = jacobian.determinant();
        if !det.is_finite() || det == 0.0 {
            return None;
        }
        let inverse = jacobian.clone().try_inverse()?;
        let mut lambda_gradients = Vec::with_capacity(d + 1);
        let mut first = vec![0.0; d];
        for k in 0..d {
            let row: Vec<f64> = (0..d).map(|j| inverse[(k, j)]).collect();
            for (f, r) in first.iter_mut().zip(&row) {
                *f -= r;
            }
            lambda_gradients.push(row);
        }
        lambda_gradients.insert(0, first);

        Some(ElementGeometry {
            measure: det.abs() / crate::mesh::mesh::reference_factorial(d),
            origin: mesh.node(mesh.element(e)[0]).to_vec(),
            jacobian,
            lambda_gradients,
        })
    }

    /// Physical point of reference coordinates ξ.
    pub fn map(&self, xi: &[f64]) -> Vec<f64> {
        let mapped = &self.jacobian * DVector::from_column_slice(xi);
        self.origin
            .iter()
            .zip(mapped.iter())
            .map(|(o, m)| o + m)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct FunctionSpace {
    mesh: Arc<Mesh>,
    order: ElementOrder,
    local_dofs: usize,
    element_dofs: Vec<usize>,
    dof_coords: Vec<f64>,
    dof_faces: Vec<BoundaryFaces>,
    pattern: Arc<CsrPattern>,
}

impl FunctionSpace {
    pub fn new(mesh: Arc<Mesh>, order: ElementOrder) -> Self {
        let d = mesh.dimension();
        let edges = local_edges(d);
        let num_nodes = mesh.num_nodes();

        let mut dof_coords = mesh.coords().to_vec();
        let mut dof_faces: Vec<BoundaryFaces> = (0..num_nodes).map(|i| mesh.boundary_faces(i)).collect();

        let (local_dofs, element_dofs) = match order {
            ElementOrder::Linear => (d + 1, mesh.elements().flatten().copied().collect()),
            ElementOrder::Quadratic => {
                let mut edge_index: BTreeMap<(usize, usize), usize> = BTreeMap::new();
                for vertices in mesh.elements() {
                    for &(i, j) in edges {
                        let (a, b) = (vertices[i].min(vertices[j]), vertices[i].max(vertices[j]));
                        edge_index.insert((a, b), 0);
                    }
                }
                for (k, ((a, b), slot)) in edge_index.iter_mut().enumerate() {
                    *slot = num_nodes + k;
                    for axis in 0..d {
                        dof_coords.push(0.5 * (mesh.node(*a)[axis] + mesh.node(*b)[axis]));
                    }
                    dof_faces.push(mesh.boundary_faces(*a) & mesh.boundary_faces(*b));
                }
                let local = d + 1 + edges.len();
                let mut dofs = Vec::with_capacity(mesh.num_elements() * local);
                for vertices in mesh.elements() {
                    dofs.extend_from_slice(vertices);
                    for &(i, j) in edges {
                        let key = (vertices[i].min(vertices[j]), vertices[i].max(vertices[j]));
                        dofs.push(edge_index[&key]);
                    }
                }
                (local, dofs)
            }
        };

        let num_dofs = dof_faces.len();
        let pattern = Arc::new(CsrPattern::from_elements(
            num_dofs,
            element_dofs.chunks(local_dofs),
        ));

        FunctionSpace {
            mesh,
            order,
            local_dofs,
            element_dofs,
            dof_coords,
            dof_faces,
            pattern,
        }
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn order(&self) -> ElementOrder {
        self.order
    }

    pub fn dimension(&self) -> usize {
        self.mesh.dimension()
    }

    pub fn num_dofs(&self) -> usize {
        self.dof_faces.len()
    }

    pub fn local_dofs(&self) -> usize {
        self.local_dofs
    }

    pub fn element_dofs(&self, e: usize) -> &[usize] {
        &self.element_dofs[e * self.local_dofs..(e + 1) * self.local_dofs]
    }

    pub fn dof_coord(&self, i: usize) -> &[f64] {
        let d = self.dimension();
        &self.dof_coords[i * d..(i + 1) * d]
    }

    pub fn dof_faces(&self, i: usize) -> BoundaryFaces {
        self.dof_faces[i]
    }

    pub fn pattern(&self) -> &Arc<CsrPattern> {
        &self.pattern
    }

    /// Values of the local shape functions at barycentric coordinates λ.
    pub fn shape_values(&self, lambda: &[f64]) -> Vec<f64> {
        match self.order {
            ElementOrder::Linear => lambda.to_vec(),
            ElementOrder::Quadratic => {
                let mut phi: Vec<f64> = lambda.iter().map(|&l| l * (2.0 * l - 1.0)).collect();
                phi.extend(
                    local_edges(lambda.len() - 1)
                        .iter()
                        .map(|&(i, j)| 4.0 * lambda[i] * lambda[j]),
                );
                phi
            }
        }
    }

    /// Physical gradients of the local shape functions, one row per function.
    pub fn shape_gradients(&self, lambda: &[f64], geometry: &ElementGeometry) -> Vec<Vec<f64>> {
        let d = lambda.len() - 1;
        let grad_lambda = &geometry.lambda_gradients;
        match self.order {
            ElementOrder::Linear => grad_lambda.clone(),
            ElementOrder::Quadratic => {
                let mut grads: Vec<Vec<f64>> = lambda
                    .iter()
                    .zip(grad_lambda)
                    .map(|(&l, g)| g.iter().map(|gi| (4.0 * l - 1.0) * gi).collect())
                    .collect();
                for &(i, j) in local_edges(d) {
                    grads.push(
                        (0..d)
                            .map(|k| 4.0 * (lambda[j] * grad_lambda[i][k] + lambda[i] * grad_lambda[j][k]))
                            .collect(),
                    );
                }
                grads
            }
        }
    }

    /// Nodal interpolant of `f`.
    pub fn interpolate<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        (0..self.num_dofs()).map(|i| f(self.dof_coord(i))).collect()
    }

    /// Value of the finite-element function at barycentric λ of element `e`.
    pub fn evaluate_in_element(&self, values: &[f64], e: usize, lambda: &[f64]) -> f64 {
        self.shape_values(lambda)
            .iter()
            .zip(self.element_dofs(e))
            .map(|(phi, &dof)| phi * values[dof])
            .sum()
    }

    pub fn gradient_in_element(
        &self,
        values: &[f64],
        e: usize,
        lambda: &[f64],
        geometry: &ElementGeometry,
    ) -> Vec<f64> {
        let mut grad = vec![0.0; self.dimension()];
        for (g, &dof) in self
            .shape_gradients(lambda, geometry)
            .iter()
            .zip(self.element_dofs(e))
        {
            for (acc, gk) in grad.iter_mut().zip(g) {
                *acc += gk * values[dof];
            }
        }
        grad
    }

    /// Value at a physical point, `None` outside the mesh.
    pub fn evaluate(&self, values: &[f64], x: &[f64]) -> Option<f64> {
        let (e, lambda) = self.mesh.locate(x)?;
        Some(self.evaluate_in_element(values, e, &lambda))
    }
}
