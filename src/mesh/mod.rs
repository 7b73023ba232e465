pub mod domain;
#[allow(clippy::module_inception)]
pub mod mesh;
pub mod refine;

pub use domain::{BoundaryFaces, Domain};
pub use mesh::{Facet, Mesh};
pub use refine::{NodeTransfer, Remesh};
