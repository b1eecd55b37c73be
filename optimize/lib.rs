#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod admm;
pub mod bfgs;
pub mod data;
pub mod estimator;
pub mod family;
pub mod gradient;
pub mod local;
pub mod newton;
pub mod partition;
pub mod primitives;
pub mod problem;
pub mod proximal;
pub mod regularizer;
pub mod solver;
pub mod types;

pub use estimator::{FittedModel, GlmEstimator};
pub use family::{Family, FamilyKind, Logistic, Normal, Poisson};
pub use partition::{Execution, PartitionedData};
pub use problem::{CancellationToken, Problem};
pub use regularizer::{Penalty, Regularizer};
pub use solver::{Solver, SolverConfig};
pub use types::{OptimizationResult, SolverError, SolverKind, Status};
