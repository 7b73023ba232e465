pub mod boundary;
pub mod solution;
pub mod theta;
pub mod time_grid;

pub use boundary::{
    BoundaryApplier, BoundaryCondition, BoundaryData, BoundaryKind, BoundaryRule, BoundaryValue,
    DirichletMethod,
};
pub use solution::SolutionGrid;
pub use theta::{StabilityCheck, StepperState, ThetaConfig, ThetaStepper};
pub use time_grid::TimeGrid;
