// src/mesh/mesh.rs
//! Conforming simplicial meshes of box domains
//!
//! # Storage
//!
//! The mesh is an arena: node coordinates are stored flat with stride `d`,
//! element connectivity flat with stride `d + 1`. Each node carries the set
//! of domain faces it lies on and, for nodes created by bisection, the edge
//! `[a, b]` it was inserted on. That lineage is what coarsening undoes.
//!
//! # Kuhn subdivision
//!
//! Structured meshes split every cell of a tensor grid into `d!` simplices,
//! one per permutation π of the axes:
//! ```text
//! v₀ = corner,  v_{k+1} = v_k + e_{π(k)}
//! ```
//! Every cell uses the same permutation set, so neighbouring cells induce
//! the same triangulation on their shared face and the result is conforming.
//! Structured nodes have no lineage, so coarsening never removes them.
//!
//! # Uniform meshes
//!
//! [`Mesh::uniform`] starts from the Kuhn split of the unit cube and bisects
//! every element `d · level` times. Each round halves the longest edge of
//! every simplex, and `d` rounds halve the grid spacing, giving `2^level`
//! cells per axis and `d! · 2^(d · level)` elements. The unit-cube nodes are
//! then mapped onto the domain. Every node but the cube corners records the
//! edge it was inserted on, so coarsening can take a uniform mesh back down
//! towards the single cell.

use super::domain::{BoundaryFaces, Domain};
use super::refine;
use crate::error::{PdeError, PdeResult};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, HashSet};

const FACTORIAL: [f64; 4] = [1.0, 1.0, 2.0, 6.0];

const EDGES_1D: [(usize, usize); 1] = [(0, 1)];
const EDGES_2D: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];
const EDGES_3D: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Local vertex pairs forming the edges of a `dimension`-simplex.
pub fn local_edges(dimension: usize) -> &'static [(usize, usize)] {
    match dimension {
        1 => &EDGES_1D,
        2 => &EDGES_2D,
        _ => &EDGES_3D,
    }
}

/// `d!`, the measure of the reference simplex is `1/d!`.
pub fn reference_factorial(dimension: usize) -> f64 {
    FACTORIAL[dimension]
}

/// A (d-1)-face shared by one or two elements
#[derive(Clone, Debug, PartialEq)]
pub struct Facet {
    /// Sorted node indices.
    pub nodes: Vec<usize>,
    pub owners: (usize, Option<usize>),
}

impl Facet {
    pub fn is_boundary(&self) -> bool {
        self.owners.1.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    domain: Domain,
    coords: Vec<f64>,
    elements: Vec<usize>,
    boundary: Vec<BoundaryFaces>,
    lineage: Vec<Option<[usize; 2]>>,
}

impl Mesh {
    /// Uniform mesh with `2^level` cells per axis, built by bisection so that
    /// every inserted node carries its lineage.
    pub fn uniform(domain: &Domain, level: u32) -> PdeResult<Self> {
        if level > 16 {
            return Err(PdeError::InvalidConfiguration {
                field: "level".to_string(),
                reason: format!("uniform refinement level {} is too large (max 16)", level),
            });
        }
        let dim = domain.dimension();
        let unit = Domain::new(dim, vec![(0.0, 1.0); dim])?;
        let mut mesh = Self::structured(&unit, &vec![1; dim])?;
        for _ in 0..dim as u32 * level {
            let all = vec![true; mesh.num_elements()];
            mesh = refine::refine(&mesh, &all)?.mesh;
        }

        let coords = mesh
            .coords
            .chunks(dim)
            .flat_map(|u| {
                u.iter().enumerate().map(|(axis, &t)| {
                    let (lo, hi) = domain.extent(axis);
                    if t == 1.0 {
                        hi
                    } else {
                        lo + (hi - lo) * t
                    }
                })
            })
            .collect();
        Self::from_arena(domain.clone(), coords, mesh.elements, mesh.boundary, mesh.lineage)
    }

    /// Tensor grid with an explicit number of cells per axis, split with the
    /// Kuhn subdivision.
    pub fn structured(domain: &Domain, cells: &[usize]) -> PdeResult<Self> {
        let dim = domain.dimension();
        if cells.len() != dim {
            return Err(PdeError::InvalidConfiguration {
                field: "cells".to_string(),
                reason: format!("expected {} cell counts, got {}", dim, cells.len()),
            });
        }
        if cells.iter().any(|&n| n == 0) {
            return Err(PdeError::InvalidConfiguration {
                field: "cells".to_string(),
                reason: "every axis needs at least one cell".to_string(),
            });
        }

        let points: Vec<usize> = cells.iter().map(|&n| n + 1).collect();
        let num_nodes: usize = points.iter().product();
        let index = |multi: &[usize]| -> usize {
            multi
                .iter()
                .zip(&points)
                .rev()
                .fold(0, |acc, (&i, &p)| acc * p + i)
        };

        let mut coords = Vec::with_capacity(num_nodes * dim);
        let mut boundary = Vec::with_capacity(num_nodes);
        let mut multi = vec![0usize; dim];
        for node in 0..num_nodes {
            let mut rest = node;
            for axis in 0..dim {
                multi[axis] = rest % points[axis];
                rest /= points[axis];
            }
            let mut faces = BoundaryFaces::NONE;
            for axis in 0..dim {
                let (lo, hi) = domain.extent(axis);
                let i = multi[axis];
                let x = if i == cells[axis] {
                    hi
                } else {
                    lo + (hi - lo) * i as f64 / cells[axis] as f64
                };
                coords.push(x);
                if i == 0 {
                    faces |= BoundaryFaces::min_face(axis);
                }
                if i == cells[axis] {
                    faces |= BoundaryFaces::max_face(axis);
                }
            }
            boundary.push(faces);
        }

        let permutations = axis_permutations(dim);
        let num_cells: usize = cells.iter().product();
        let mut elements = Vec::with_capacity(num_cells * permutations.len() * (dim + 1));
        let mut corner = vec![0usize; dim];
        for cell in 0..num_cells {
            let mut rest = cell;
            for axis in 0..dim {
                corner[axis] = rest % cells[axis];
                rest /= cells[axis];
            }
            for perm in &permutations {
                let mut vertex = corner.clone();
                elements.push(index(&vertex));
                for &axis in perm {
                    vertex[axis] += 1;
                    elements.push(index(&vertex));
                }
            }
        }

        let lineage = vec![None; num_nodes];
        Self::from_arena(domain.clone(), coords, elements, boundary, lineage)
    }

    /// Mesh from explicit node coordinates and connectivity. Boundary faces
    /// are detected from the coordinates.
    pub fn from_parts(domain: &Domain, coords: Vec<f64>, elements: Vec<usize>) -> PdeResult<Self> {
        let dim = domain.dimension();
        if coords.len() % dim != 0 {
            return Err(PdeError::MeshConstruction {
                element: None,
                reason: format!("coordinate array length {} is not a multiple of {}", coords.len(), dim),
            });
        }
        let boundary: Vec<BoundaryFaces> = coords.chunks(dim).map(|x| domain.faces_of(x)).collect();
        let lineage = vec![None; boundary.len()];
        Self::from_arena(domain.clone(), coords, elements, boundary, lineage)
    }

    pub(crate) fn from_arena(
        domain: Domain,
        coords: Vec<f64>,
        elements: Vec<usize>,
        boundary: Vec<BoundaryFaces>,
        lineage: Vec<Option<[usize; 2]>>,
    ) -> PdeResult<Self> {
        let mesh = Mesh {
            domain,
            coords,
            elements,
            boundary,
            lineage,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn dimension(&self) -> usize {
        self.domain.dimension()
    }

    pub fn nodes_per_element(&self) -> usize {
        self.dimension() + 1
    }

    pub fn num_nodes(&self) -> usize {
        self.boundary.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len() / self.nodes_per_element()
    }

    pub fn node(&self, i: usize) -> &[f64] {
        let d = self.dimension();
        &self.coords[i * d..(i + 1) * d]
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn element(&self, e: usize) -> &[usize] {
        let n = self.nodes_per_element();
        &self.elements[e * n..(e + 1) * n]
    }

    pub fn elements(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.elements.chunks(self.nodes_per_element())
    }

    pub fn boundary_faces(&self, node: usize) -> BoundaryFaces {
        self.boundary[node]
    }

    pub fn lineage(&self, node: usize) -> Option<[usize; 2]> {
        self.lineage[node]
    }

    pub(crate) fn boundary_flags(&self) -> &[BoundaryFaces] {
        &self.boundary
    }

    pub(crate) fn lineage_table(&self) -> &[Option<[usize; 2]>] {
        &self.lineage
    }

    /// Columns `x_k - x_0`, k = 1..=d.
    pub fn element_jacobian(&self, e: usize) -> DMatrix<f64> {
        let d = self.dimension();
        let vertices = self.element(e);
        let x0 = self.node(vertices[0]);
        DMatrix::from_fn(d, d, |row, col| self.node(vertices[col + 1])[row] - x0[row])
    }

    pub fn element_measure(&self, e: usize) -> f64 {
        let d = self.dimension();
        self.element_jacobian(e).determinant().abs() / FACTORIAL[d]
    }

    pub fn edge_length(&self, a: usize, b: usize) -> f64 {
        // Fixed endpoint order keeps the value bit-identical for (a, b) and (b, a)
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        self.node(lo)
            .iter()
            .zip(self.node(hi))
            .map(|(x, y)| (y - x) * (y - x))
            .sum::<f64>()
            .sqrt()
    }

    /// Longest edge length of an element.
    pub fn element_diameter(&self, e: usize) -> f64 {
        let vertices = self.element(e);
        local_edges(self.dimension())
            .iter()
            .map(|&(i, j)| self.edge_length(vertices[i], vertices[j]))
            .fold(0.0, f64::max)
    }

    pub fn element_centroid(&self, e: usize) -> Vec<f64> {
        let d = self.dimension();
        let n = self.nodes_per_element() as f64;
        let mut c = vec![0.0; d];
        for &v in self.element(e) {
            for (ci, xi) in c.iter_mut().zip(self.node(v)) {
                *ci += xi / n;
            }
        }
        c
    }

    pub fn total_measure(&self) -> f64 {
        (0..self.num_elements()).map(|e| self.element_measure(e)).sum()
    }

    /// Facets with their owning elements, ordered by sorted node list.
    pub fn facets(&self) -> Vec<Facet> {
        let mut map: BTreeMap<Vec<usize>, (usize, Option<usize>)> = BTreeMap::new();
        for (e, vertices) in self.elements().enumerate() {
            for skip in 0..vertices.len() {
                let key = facet_key(vertices, skip);
                map.entry(key)
                    .and_modify(|owners| owners.1 = Some(e))
                    .or_insert((e, None));
            }
        }
        map.into_iter()
            .map(|(nodes, owners)| Facet { nodes, owners })
            .collect()
    }

    /// Domain faces a facet lies on (intersection of its nodes' faces).
    pub fn facet_faces(&self, nodes: &[usize]) -> BoundaryFaces {
        nodes
            .iter()
            .fold(BoundaryFaces::all(), |acc, &n| acc & self.boundary[n])
    }

    /// Measure of a facet: 1 for a point, length of a segment, area of a triangle.
    pub fn facet_measure(&self, nodes: &[usize]) -> f64 {
        match nodes.len() {
            1 => 1.0,
            2 => self.edge_length(nodes[0], nodes[1]),
            _ => {
                let (u, v) = self.facet_spans(nodes);
                cross(&u, &v).iter().map(|c| c * c).sum::<f64>().sqrt() / 2.0
            }
        }
    }

    /// Unit normal of a facet; the sign is arbitrary but fixed.
    pub fn facet_normal(&self, nodes: &[usize]) -> Vec<f64> {
        match nodes.len() {
            1 => vec![1.0],
            2 => {
                let (p, q) = (self.node(nodes[0]), self.node(nodes[1]));
                let (tx, ty) = (q[0] - p[0], q[1] - p[1]);
                let len = (tx * tx + ty * ty).sqrt();
                vec![ty / len, -tx / len]
            }
            _ => {
                let (u, v) = self.facet_spans(nodes);
                let n = cross(&u, &v);
                let len = n.iter().map(|c| c * c).sum::<f64>().sqrt();
                n.iter().map(|c| c / len).collect()
            }
        }
    }

    fn facet_spans(&self, nodes: &[usize]) -> ([f64; 3], [f64; 3]) {
        let p = self.node(nodes[0]);
        let mut u = [0.0; 3];
        let mut v = [0.0; 3];
        for k in 0..3 {
            u[k] = self.node(nodes[1])[k] - p[k];
            v[k] = self.node(nodes[2])[k] - p[k];
        }
        (u, v)
    }

    /// Barycentric coordinates of `x` with respect to element `e`.
    pub fn barycentric(&self, e: usize, x: &[f64]) -> Option<Vec<f64>> {
        let vertices = self.element(e);
        let x0 = self.node(vertices[0]);
        let rhs = DVector::from_iterator(x0.len(), x.iter().zip(x0).map(|(xi, x0i)| xi - x0i));
        let tail = self.element_jacobian(e).lu().solve(&rhs)?;
        let mut lambda = Vec::with_capacity(vertices.len());
        lambda.push(1.0 - tail.sum());
        lambda.extend(tail.iter());
        Some(lambda)
    }

    /// First element containing `x`, with the barycentric coordinates of `x`.
    pub fn locate(&self, x: &[f64]) -> Option<(usize, Vec<f64>)> {
        if x.len() != self.dimension() || !self.domain.contains(x) {
            return None;
        }
        let d = self.dimension();
        for e in 0..self.num_elements() {
            let vertices = self.element(e);
            let outside = (0..d).any(|axis| {
                let (lo, hi) = vertices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    let c = self.node(v)[axis];
                    (lo.min(c), hi.max(c))
                });
                let tol = 1e-10 * (hi - lo).max(1e-300);
                x[axis] < lo - tol || x[axis] > hi + tol
            });
            if outside {
                continue;
            }
            if let Some(lambda) = self.barycentric(e, x) {
                if lambda.iter().all(|&l| l >= -1e-10) {
                    return Some((e, lambda));
                }
            }
        }
        None
    }

    /// Checks index range, duplicate and degenerate elements, facet sharing,
    /// conformity and total measure.
    pub fn validate(&self) -> PdeResult<()> {
        let dim = self.dimension();
        let npe = self.nodes_per_element();
        let num_nodes = self.num_nodes();

        if self.coords.len() != num_nodes * dim || self.lineage.len() != num_nodes {
            return Err(PdeError::MeshConstruction {
                element: None,
                reason: "node arrays have inconsistent lengths".to_string(),
            });
        }
        if self.elements.is_empty() || self.elements.len() % npe != 0 {
            return Err(PdeError::MeshConstruction {
                element: None,
                reason: format!(
                    "connectivity length {} is not a positive multiple of {}",
                    self.elements.len(),
                    npe
                ),
            });
        }
        if let Some(i) = self.coords.iter().position(|c| !c.is_finite()) {
            return Err(PdeError::MeshConstruction {
                element: None,
                reason: format!("node {} has a non-finite coordinate", i / dim),
            });
        }

        let mut seen = HashSet::with_capacity(self.num_elements());
        for (e, vertices) in self.elements().enumerate() {
            if let Some(&bad) = vertices.iter().find(|&&v| v >= num_nodes) {
                return Err(PdeError::MeshConstruction {
                    element: Some(e),
                    reason: format!("node index {} out of range (num_nodes = {})", bad, num_nodes),
                });
            }
            let mut sorted = vertices.to_vec();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                return Err(PdeError::MeshConstruction {
                    element: Some(e),
                    reason: "element repeats a vertex".to_string(),
                });
            }
            if !seen.insert(sorted) {
                return Err(PdeError::MeshConstruction {
                    element: Some(e),
                    reason: "duplicate element".to_string(),
                });
            }
            let measure = self.element_measure(e);
            let scale = self.element_diameter(e).powi(dim as i32) / FACTORIAL[dim];
            if !(measure > 1e-12 * scale) {
                return Err(PdeError::MeshConstruction {
                    element: Some(e),
                    reason: format!("degenerate element (measure {:.3e})", measure),
                });
            }
        }

        let mut owners: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
        for (e, vertices) in self.elements().enumerate() {
            for skip in 0..npe {
                owners.entry(facet_key(vertices, skip)).or_default().push(e);
            }
        }
        for (nodes, elems) in &owners {
            if elems.len() > 2 {
                return Err(PdeError::MeshConstruction {
                    element: Some(elems[2]),
                    reason: format!("facet {:?} is shared by {} elements", nodes, elems.len()),
                });
            }
            if elems.len() == 1 && self.facet_faces(nodes).is_empty() {
                return Err(PdeError::MeshConstruction {
                    element: Some(elems[0]),
                    reason: format!(
                        "facet {:?} has a single owner but is not on the domain boundary (hanging node)",
                        nodes
                    ),
                });
            }
        }

        let total = self.total_measure();
        let expected = self.domain.measure();
        if (total - expected).abs() > 1e-9 * expected {
            return Err(PdeError::MeshConstruction {
                element: None,
                reason: format!(
                    "elements cover measure {:.12} but the domain measure is {:.12}",
                    total, expected
                ),
            });
        }

        Ok(())
    }
}

fn facet_key(vertices: &[usize], skip: usize) -> Vec<usize> {
    let mut key: Vec<usize> = vertices
        .iter()
        .enumerate()
        .filter(|&(k, _)| k != skip)
        .map(|(_, &v)| v)
        .collect();
    key.sort_unstable();
    key
}

fn cross(u: &[f64; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

fn axis_permutations(dim: usize) -> Vec<Vec<usize>> {
    match dim {
        1 => vec![vec![0]],
        2 => vec![vec![0, 1], vec![1, 0]],
        _ => vec![
            vec![0, 1, 2],
            vec![0, 2, 1],
            vec![1, 0, 2],
            vec![1, 2, 0],
            vec![2, 0, 1],
            vec![2, 1, 0],
        ],
    }
}
