// src/mesh/refine.rs
//! Conforming refinement and coarsening of simplicial meshes
//!
//! # Marked-edge bisection
//!
//! 1. Every element marked for refinement marks its longest edge.
//! 2. Closure: any element owning a marked edge also marks its own longest
//!    edge, repeated to a fixpoint.
//! 3. Each element is bisected recursively along its longest marked edge
//!    until none of its edges is marked.
//!
//! Ties between equally long edges are broken by node indices, and edge
//! lengths are always computed from the lower-numbered endpoint, so two
//! elements sharing a face split it the same way. Every marked edge is
//! split on both sides with the same midpoint node, and nothing else is
//! split, which keeps the mesh conforming in any dimension.
//!
//! # Coarsening
//!
//! A bisection node `m` inserted on edge `[a, b]` is removed by mapping it
//! onto `b`: the children containing `a` become their parents again and the
//! children containing `b` collapse to nothing. This is only legal when the
//! elements around `m` pair up exactly as one bisection produced them.
//! Nodes are visited newest first, and a merged parent is not coarsened
//! again in the same pass.

use super::domain::BoundaryFaces;
use super::mesh::{local_edges, Mesh};
use crate::error::{PdeError, PdeResult};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How a node of the new mesh obtains values from the old one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTransfer {
    Copy(usize),
    Midpoint(usize, usize),
}

/// A new mesh together with the node transfer map from its predecessor
#[derive(Clone, Debug)]
pub struct Remesh {
    pub mesh: Mesh,
    /// Indexed by new node.
    pub transfer: Vec<NodeTransfer>,
}

impl Remesh {
    /// Interpolate nodal values of the old mesh onto the new nodes.
    pub fn transfer_values(&self, old: &[f64]) -> Vec<f64> {
        self.transfer
            .iter()
            .map(|t| match *t {
                NodeTransfer::Copy(i) => old[i],
                NodeTransfer::Midpoint(a, b) => 0.5 * (old[a] + old[b]),
            })
            .collect()
    }
}

type Edge = (usize, usize);

fn edge(a: usize, b: usize) -> Edge {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Total order on edges: longer first, then lexicographically smaller nodes.
fn compare_edges(length: &dyn Fn(Edge) -> f64, e1: Edge, e2: Edge) -> Ordering {
    length(e1)
        .total_cmp(&length(e2))
        .then_with(|| e2.cmp(&e1))
}

struct Arena {
    dim: usize,
    coords: Vec<f64>,
    boundary: Vec<BoundaryFaces>,
    lineage: Vec<Option<[usize; 2]>>,
    midpoints: HashMap<Edge, usize>,
}

impl Arena {
    fn from_mesh(mesh: &Mesh) -> Self {
        Arena {
            dim: mesh.dimension(),
            coords: mesh.coords().to_vec(),
            boundary: mesh.boundary_flags().to_vec(),
            lineage: mesh.lineage_table().to_vec(),
            midpoints: HashMap::new(),
        }
    }

    fn length(&self, (a, b): Edge) -> f64 {
        let d = self.dim;
        (0..d)
            .map(|k| {
                let delta = self.coords[b * d + k] - self.coords[a * d + k];
                delta * delta
            })
            .sum::<f64>()
            .sqrt()
    }

    fn longest<I: Iterator<Item = Edge>>(&self, edges: I) -> Option<Edge> {
        let len = |e: Edge| self.length(e);
        edges.max_by(|&e1, &e2| compare_edges(&len, e1, e2))
    }

    fn midpoint(&mut self, (a, b): Edge) -> usize {
        if let Some(&m) = self.midpoints.get(&(a, b)) {
            return m;
        }
        let d = self.dim;
        let m = self.boundary.len();
        for k in 0..d {
            let x = 0.5 * (self.coords[a * d + k] + self.coords[b * d + k]);
            self.coords.push(x);
        }
        self.boundary.push(self.boundary[a] & self.boundary[b]);
        self.lineage.push(Some([a, b]));
        self.midpoints.insert((a, b), m);
        m
    }
}

fn element_edges(vertices: &[usize], dim: usize) -> impl Iterator<Item = Edge> + '_ {
    local_edges(dim)
        .iter()
        .map(move |&(i, j)| edge(vertices[i], vertices[j]))
}

/// Longest edge of each marked element, the seeds of a refinement.
pub fn seed_edges(mesh: &Mesh, marked: &[bool]) -> BTreeSet<(usize, usize)> {
    let arena = Arena::from_mesh(mesh);
    let dim = mesh.dimension();
    mesh.elements()
        .zip(marked)
        .filter(|(_, &m)| m)
        .filter_map(|(vertices, _)| arena.longest(element_edges(vertices, dim)))
        .collect()
}

/// Refine every element flagged in `marked` (one flag per element).
pub fn refine(mesh: &Mesh, marked: &[bool]) -> PdeResult<Remesh> {
    if marked.len() != mesh.num_elements() {
        return Err(PdeError::InvalidConfiguration {
            field: "marked".to_string(),
            reason: format!(
                "expected {} element marks, got {}",
                mesh.num_elements(),
                marked.len()
            ),
        });
    }
    refine_edges(mesh, seed_edges(mesh, marked))
}

/// Bisect the given edges plus whatever the longest-edge closure adds.
pub fn refine_edges(mesh: &Mesh, seeds: BTreeSet<(usize, usize)>) -> PdeResult<Remesh> {
    let dim = mesh.dimension();
    let mut arena = Arena::from_mesh(mesh);
    let mut marked: BTreeSet<Edge> = seeds.into_iter().map(|(a, b)| edge(a, b)).collect();

    if let Some(&(a, b)) = marked.iter().find(|&&(_, b)| b >= mesh.num_nodes()) {
        return Err(PdeError::MeshConstruction {
            element: None,
            reason: format!("refinement edge ({}, {}) references a missing node", a, b),
        });
    }

    // Longest-edge closure
    let longest: Vec<Edge> = mesh
        .elements()
        .filter_map(|vertices| arena.longest(element_edges(vertices, dim)))
        .collect();
    loop {
        let mut changed = false;
        for (vertices, &long) in mesh.elements().zip(&longest) {
            if !marked.contains(&long) && element_edges(vertices, dim).any(|e| marked.contains(&e)) {
                marked.insert(long);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut elements = Vec::with_capacity(mesh.num_elements() * (dim + 1) * 2);
    let mut stack: Vec<Vec<usize>> = Vec::new();
    for vertices in mesh.elements() {
        stack.push(vertices.to_vec());
        while let Some(current) = stack.pop() {
            let split = arena.longest(
                element_edges(&current, dim).filter(|e| marked.contains(e)),
            );
            match split {
                None => elements.extend_from_slice(&current),
                Some((a, b)) => {
                    let m = arena.midpoint((a, b));
                    let with_a: Vec<usize> =
                        current.iter().map(|&v| if v == b { m } else { v }).collect();
                    let with_b: Vec<usize> =
                        current.iter().map(|&v| if v == a { m } else { v }).collect();
                    // Pushed in reverse so the `a` child is emitted first
                    stack.push(with_b);
                    stack.push(with_a);
                }
            }
        }
    }

    let num_old = mesh.num_nodes();
    let transfer = (0..arena.boundary.len())
        .map(|i| match arena.lineage[i] {
            Some([a, b]) if i >= num_old => NodeTransfer::Midpoint(a, b),
            _ => NodeTransfer::Copy(i),
        })
        .collect();

    log::debug!(
        "Bisected {} edges: {} -> {} elements",
        arena.midpoints.len(),
        mesh.num_elements(),
        elements.len() / (dim + 1)
    );

    let refined = Mesh::from_arena(
        mesh.domain().clone(),
        arena.coords,
        elements,
        arena.boundary,
        arena.lineage,
    )?;
    Ok(Remesh {
        mesh: refined,
        transfer,
    })
}

/// Undo bisections around nodes whose elements are all flagged in `marked`,
/// never dropping below `min_elements` elements.
pub fn coarsen(mesh: &Mesh, marked: &[bool], min_elements: usize) -> PdeResult<Remesh> {
    let npe = mesh.nodes_per_element();
    if marked.len() != mesh.num_elements() {
        return Err(PdeError::InvalidConfiguration {
            field: "marked".to_string(),
            reason: format!(
                "expected {} element marks, got {}",
                mesh.num_elements(),
                marked.len()
            ),
        });
    }

    let mut elements: Vec<Option<Vec<usize>>> = mesh.elements().map(|v| Some(v.to_vec())).collect();
    let mut coarse: Vec<bool> = marked.to_vec();
    let mut incident: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); mesh.num_nodes()];
    for (e, vertices) in mesh.elements().enumerate() {
        for &v in vertices {
            incident[v].insert(e);
        }
    }
    let mut lineage = mesh.lineage_table().to_vec();
    let mut alive = vec![true; mesh.num_nodes()];
    let mut count = mesh.num_elements();
    let mut removed_nodes = 0;

    for m in (0..mesh.num_nodes()).rev() {
        let [a, b] = match lineage[m] {
            Some(parents) if alive[parents[0]] && alive[parents[1]] => parents,
            _ => continue,
        };
        let around: Vec<usize> = incident[m].iter().copied().collect();
        if around.is_empty() || around.iter().any(|&e| !coarse[e]) {
            continue;
        }

        // Children carrying `a` keyed by the rest of their vertices, and likewise for `b`
        let mut with_a: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        let mut with_b: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        let mut pairable = true;
        for &e in &around {
            let Some(vertices) = elements[e].as_ref() else {
                pairable = false;
                break;
            };
            let has_a = vertices.contains(&a);
            let has_b = vertices.contains(&b);
            if has_a == has_b {
                pairable = false;
                break;
            }
            let mut rest: Vec<usize> = vertices
                .iter()
                .copied()
                .filter(|&v| v != m && v != a && v != b)
                .collect();
            rest.sort_unstable();
            let side = if has_a { &mut with_a } else { &mut with_b };
            if side.insert(rest, e).is_some() {
                pairable = false;
                break;
            }
        }
        if !pairable || with_a.len() != with_b.len() || with_a.keys().ne(with_b.keys()) {
            continue;
        }

        let pairs = with_a.len();
        if count - pairs < min_elements {
            continue;
        }

        for (rest, &keep) in &with_a {
            let drop = with_b[rest];
            if let Some(vertices) = elements[keep].as_mut() {
                for v in vertices.iter_mut() {
                    if *v == m {
                        *v = b;
                    }
                }
            }
            if let Some(vertices) = elements[drop].take() {
                for v in vertices {
                    incident[v].remove(&drop);
                }
            }
            incident[b].insert(keep);
            coarse[keep] = false;
        }
        incident[m].clear();
        alive[m] = false;
        count -= pairs;
        removed_nodes += 1;

        // Newer nodes inserted on an edge through `m` no longer have a parent edge
        for entry in lineage.iter_mut() {
            if matches!(entry, Some([p, q]) if *p == m || *q == m) {
                *entry = None;
            }
        }
        lineage[m] = None;
    }

    // Compact and renumber
    let mut new_index = vec![usize::MAX; mesh.num_nodes()];
    let mut coords = Vec::with_capacity(mesh.coords().len());
    let mut boundary = Vec::new();
    let mut transfer = Vec::new();
    for old in (0..mesh.num_nodes()).filter(|&i| alive[i]) {
        new_index[old] = transfer.len();
        coords.extend_from_slice(mesh.node(old));
        boundary.push(mesh.boundary_faces(old));
        transfer.push(NodeTransfer::Copy(old));
    }
    let new_lineage: Vec<Option<[usize; 2]>> = (0..mesh.num_nodes())
        .filter(|&i| alive[i])
        .map(|i| lineage[i].map(|[p, q]| [new_index[p], new_index[q]]))
        .collect();
    let mut connectivity = Vec::with_capacity(count * npe);
    for vertices in elements.into_iter().flatten() {
        connectivity.extend(vertices.into_iter().map(|v| new_index[v]));
    }

    log::debug!(
        "Coarsened {} nodes: {} -> {} elements",
        removed_nodes,
        mesh.num_elements(),
        count
    );

    let coarsened = Mesh::from_arena(
        mesh.domain().clone(),
        coords,
        connectivity,
        boundary,
        new_lineage,
    )?;
    Ok(Remesh {
        mesh: coarsened,
        transfer,
    })
}

/// One adaptation pass: coarsen first, then refine the elements flagged for
/// refinement on the original mesh. The transfer map refers to `mesh`.
pub fn adapt(
    mesh: &Mesh,
    refine_marks: &[bool],
    coarsen_marks: &[bool],
    min_elements: usize,
) -> PdeResult<Remesh> {
    if refine_marks.len() != mesh.num_elements() {
        return Err(PdeError::InvalidConfiguration {
            field: "refine_marks".to_string(),
            reason: format!(
                "expected {} element marks, got {}",
                mesh.num_elements(),
                refine_marks.len()
            ),
        });
    }
    let seeds = seed_edges(mesh, refine_marks);
    // An element marked both ways keeps its vertices
    let coarsen_only: Vec<bool> = coarsen_marks
        .iter()
        .zip(refine_marks)
        .map(|(&c, &r)| c && !r)
        .collect();
    let coarsened = coarsen(mesh, &coarsen_only, min_elements)?;

    let mut old_to_new = vec![usize::MAX; mesh.num_nodes()];
    for (new, t) in coarsened.transfer.iter().enumerate() {
        if let NodeTransfer::Copy(old) = *t {
            old_to_new[old] = new;
        }
    }
    let translated: BTreeSet<(usize, usize)> = seeds
        .into_iter()
        .map(|(a, b)| edge(old_to_new[a], old_to_new[b]))
        .collect();
    let refined = refine_edges(&coarsened.mesh, translated)?;

    let new_to_old = |i: usize| match coarsened.transfer[i] {
        NodeTransfer::Copy(old) => old,
        NodeTransfer::Midpoint(..) => usize::MAX,
    };
    let transfer = refined
        .transfer
        .iter()
        .map(|t| match *t {
            NodeTransfer::Copy(i) => NodeTransfer::Copy(new_to_old(i)),
            NodeTransfer::Midpoint(a, b) => NodeTransfer::Midpoint(new_to_old(a), new_to_old(b)),
        })
        .collect();

    Ok(Remesh {
        mesh: refined.mesh,
        transfer,
    })
}
