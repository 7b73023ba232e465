pub mod estimator;
pub mod refiner;

pub use estimator::{estimate, mark, ErrorIndicator, Marking, RefinementCriterion};
pub use refiner::{
    AdaptiveConfig, AdaptiveOutcome, AdaptiveRefiner, AdaptiveSnapshot, SnapshotSelection, StopReason,
};
