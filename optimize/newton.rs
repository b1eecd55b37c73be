//! Newton-Raphson on the unregularized loss.

use crate::family::Family;
use crate::primitives::{gradient_and_hessian, loss, solve_symmetric_system};
use crate::problem::{Problem, check_positive};
use crate::types::{OptimizationResult, ParameterState, SolverError, SolverKind, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_iter: usize,
    /// Converged when the relative objective change or the largest coefficient change drops below this.
    pub tol: f64,
    /// Reciprocal condition number below which the Hessian is treated as singular.
    pub min_rcond: f64,
    /// Added to the Hessian diagonal. Zero means a pure Newton step.
    pub hessian_damping: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tol: 1e-8,
            min_rcond: 1e-14,
            hessian_damping: 0.0,
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        check_positive("tol", self.tol)?;
        check_positive("min_rcond", self.min_rcond)?;
        if !(self.hessian_damping >= 0.0 && self.hessian_damping.is_finite()) {
            return Err(SolverError::InvalidConfiguration(format!(
                "hessian_damping must be a non-negative number, got {}",
                self.hessian_damping
            )));
        }
        Ok(())
    }
}

/// Newton's method. The problem's regularizer is ignored.
///
/// A singular or ill-conditioned Hessian aborts the run with
/// [`SolverError::SingularHessian`]; retrying with `hessian_damping > 0` is
/// left to the caller.
pub fn newton<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &NewtonConfig,
) -> Result<OptimizationResult, SolverError> {
    problem.validate()?;
    config.validate()?;
    if !problem.regularizer.is_inactive() {
        log::debug!("Newton's method ignores the configured regularizer.");
    }

    let family = problem.family;
    let data = problem.data;
    let execution = problem.execution;
    let mut state = ParameterState::new(problem.initial_beta());

    log::info!(
        "Newton: {} rows, {} features, {} partitions.",
        data.n_rows(),
        data.n_features(),
        data.n_partitions()
    );

    let mut status = Status::MaxIterationsReached;
    let mut objective = f64::NAN;

    for iter in 0..config.max_iter {
        if problem.is_cancelled() {
            status = Status::Cancelled;
            break;
        }

        let gh = gradient_and_hessian(family, data, state.beta().view(), execution)?;
        objective = gh.loss;
        if gh.gradient.iter().all(|&g| g == 0.0) {
            status = Status::Converged;
            break;
        }

        let mut hess = gh.hessian;
        if config.hessian_damping > 0.0 {
            hess.diag_mut().mapv_inplace(|d| d + config.hessian_damping);
        }
        let step = solve_symmetric_system(&hess, &gh.gradient, config.min_rcond)?;
        let next = state.beta() - &step;
        let next_objective = loss(family, data, next.view(), execution)?;

        let coef_change = step.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
        let relative = (objective - next_objective).abs()
            / objective.abs().max(next_objective.abs()).max(f64::MIN_POSITIVE);

        state.advance(next);
        objective = next_objective;

        log::debug!(
            "Newton iter #{:<3} | loss: {:.12e} | max |step|: {:.3e} | relative change: {:.3e}",
            iter + 1,
            objective,
            coef_change,
            relative
        );

        if coef_change <= config.tol || relative < config.tol {
            status = Status::Converged;
            break;
        }
    }

    if objective.is_nan() {
        objective = loss(family, data, state.beta().view(), execution)?;
    }

    let result = OptimizationResult {
        iterations: state.round(),
        beta: state.into_inner(),
        status,
        final_objective: objective,
        solver: SolverKind::Newton,
        consensus: None,
    };
    result.log_exit();
    Ok(result)
}
