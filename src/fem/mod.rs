pub mod assembly;
pub mod config;
pub mod quadrature;
pub mod space;

pub use assembly::{OperatorBuilder, SpatialOperators};
pub use config::{DiscretizationConfig, ElementOrder, InitialCondition, RefinementLimits};
pub use quadrature::QuadratureRule;
pub use space::{ElementGeometry, FunctionSpace};
