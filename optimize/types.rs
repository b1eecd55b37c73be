use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The global parameter vector together with the round at which it was last written.
///
/// Solvers own exactly one of these for the duration of a call. The only way to
/// mutate it is [`ParameterState::advance`], which the solvers invoke once per
/// round after every partition has reported back.
#[derive(Clone, Debug)]
pub struct ParameterState {
    beta: Array1<f64>,
    round: usize,
}

impl ParameterState {
    pub fn new(initial: Array1<f64>) -> Self {
        Self {
            beta: initial,
            round: 0,
        }
    }

    pub fn beta(&self) -> &Array1<f64> {
        &self.beta
    }

    pub fn round(&self) -> usize {
        self.round
    }

    /// Replaces the parameter vector and bumps the round counter.
    pub fn advance(&mut self, next: Array1<f64>) {
        debug_assert_eq!(next.len(), self.beta.len());
        self.beta = next;
        self.round += 1;
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.beta
    }
}

/// Which algorithm produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    GradientDescent,
    Newton,
    ProximalGradient,
    Admm,
    Bfgs,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverKind::GradientDescent => "gradient descent",
            SolverKind::Newton => "Newton",
            SolverKind::ProximalGradient => "proximal gradient",
            SolverKind::Admm => "ADMM",
            SolverKind::Bfgs => "BFGS",
        };
        f.write_str(name)
    }
}

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// The solver's own convergence test passed.
    Converged,
    /// The iteration cap was reached; the returned estimate is the last iterate.
    MaxIterationsReached,
    /// The line search could not make further progress before the test passed.
    Stalled,
    /// A cancellation request was observed between rounds.
    Cancelled,
}

/// Per-partition ADMM state: local estimates, scaled duals and the penalty parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusState {
    pub betas: Vec<Array1<f64>>,
    pub duals: Vec<Array1<f64>>,
    pub rho: f64,
}

/// The outcome of a solver call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub beta: Array1<f64>,
    pub status: Status,
    pub iterations: usize,
    /// Objective at `beta`, including the regularization term when the solver uses one.
    pub final_objective: f64,
    pub solver: SolverKind,
    /// Only populated by ADMM.
    #[serde(default)]
    pub consensus: Option<ConsensusState>,
}

impl OptimizationResult {
    pub fn converged(&self) -> bool {
        self.status == Status::Converged
    }

    pub(crate) fn log_exit(&self) {
        match self.status {
            Status::Converged => log::info!(
                "{}: converged after {} iterations (objective {:.8e}).",
                self.solver,
                self.iterations,
                self.final_objective
            ),
            Status::MaxIterationsReached => log::warn!(
                "{}: reached the iteration cap ({}) without converging (objective {:.8e}).",
                self.solver,
                self.iterations,
                self.final_objective
            ),
            Status::Stalled => log::warn!(
                "{}: no further progress after {} iterations (objective {:.8e}).",
                self.solver,
                self.iterations,
                self.final_objective
            ),
            Status::Cancelled => log::warn!(
                "{}: cancelled after {} iterations (objective {:.8e}).",
                self.solver,
                self.iterations,
                self.final_objective
            ),
        }
    }
}

/// Errors raised by the solvers. Reaching the iteration cap is not one of them.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Invalid solver configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "The Hessian is singular or ill-conditioned (reciprocal condition number {rcond:.3e}). Consider a damped Hessian."
    )]
    SingularHessian { rcond: f64 },

    #[error("A linear system solve failed: {0}")]
    LinearSystemSolveFailed(#[from] ndarray_linalg::error::LinalgError),

    #[error("Non-finite {quantity} encountered in partition {partition}.")]
    NonFinite {
        quantity: &'static str,
        partition: usize,
    },

    /// A global update (not tied to any one partition) produced NaN or infinity.
    #[error("Non-finite {quantity} produced by the global update.")]
    NonFiniteUpdate { quantity: &'static str },

    #[error("The local solve on partition {partition} failed: {reason}")]
    LocalSolveFailed { partition: usize, reason: String },
}

impl SolverError {
    /// True for every failure caused by the numerics rather than the inputs.
    pub fn is_numerical_instability(&self) -> bool {
        !matches!(self, SolverError::InvalidConfiguration(_))
    }
}
