//! Proximal gradient descent for a smooth loss plus a (possibly non-smooth) penalty.
//!
//! Each iteration takes a gradient step on the loss and passes the result through
//! the penalty's proximal operator. The step size is backtracked until the loss
//! at the candidate sits under the quadratic model built at the current point,
//! which guarantees the penalized objective never increases.

use crate::family::Family;
use crate::primitives::{gradient_from_predictors, linear_predictors, loss_from_predictors, trial_loss};
use crate::problem::{Problem, check_positive};
use crate::types::{OptimizationResult, ParameterState, SolverError, SolverKind, Status};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximalGradientConfig {
    pub max_iter: usize,
    /// Relative change of the penalized objective below which the run is declared converged.
    pub tol: f64,
    pub initial_step: f64,
    pub first_backtrack_mult: f64,
    pub next_backtrack_mult: f64,
    pub step_growth: f64,
    pub max_line_search: usize,
    pub min_step: f64,
}

impl Default for ProximalGradientConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-8,
            initial_step: 1.0,
            first_backtrack_mult: 0.1,
            next_backtrack_mult: 0.5,
            step_growth: 1.25,
            max_line_search: 100,
            min_step: 1e-20,
        }
    }
}

impl ProximalGradientConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        check_positive("tol", self.tol)?;
        check_positive("initial_step", self.initial_step)?;
        check_positive("min_step", self.min_step)?;
        for (name, mult) in [
            ("first_backtrack_mult", self.first_backtrack_mult),
            ("next_backtrack_mult", self.next_backtrack_mult),
        ] {
            if !(mult > 0.0 && mult < 1.0) {
                return Err(SolverError::InvalidConfiguration(format!(
                    "{name} must lie in (0, 1), got {mult}"
                )));
            }
        }
        if !(self.step_growth >= 1.0) {
            return Err(SolverError::InvalidConfiguration(format!(
                "step_growth must be at least 1, got {}",
                self.step_growth
            )));
        }
        Ok(())
    }
}

/// Proximal gradient descent on `loss(beta) + lambda * r(beta)`.
pub fn proximal_gradient<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &ProximalGradientConfig,
) -> Result<OptimizationResult, SolverError> {
    problem.validate()?;
    config.validate()?;

    let family = problem.family;
    let data = problem.data;
    let execution = problem.execution;
    let reg = problem.regularizer;

    let mut state = ParameterState::new(problem.initial_beta());
    let mut etas = linear_predictors(data, state.beta().view(), execution)?;
    let mut func = loss_from_predictors(family, data, &etas, execution)?;
    let mut objective = func + reg.value(state.beta().view());
    let mut step_size = config.initial_step;
    let mut backtrack_mult = config.first_backtrack_mult;

    log::info!(
        "Proximal gradient: {} rows, {} features, {} partitions, penalty {:?} with lambda {}.",
        data.n_rows(),
        data.n_features(),
        data.n_partitions(),
        reg.penalty,
        reg.lambda
    );

    let finish = |beta: Array1<f64>, status, iterations, objective| {
        let result = OptimizationResult {
            beta,
            status,
            iterations,
            final_objective: objective,
            solver: SolverKind::ProximalGradient,
            consensus: None,
        };
        result.log_exit();
        result
    };

    for k in 0..config.max_iter {
        if problem.is_cancelled() {
            return Ok(finish(state.into_inner(), Status::Cancelled, k, objective));
        }

        let grad = gradient_from_predictors(family, data, &etas, execution)?;

        let mut accepted = None;
        for _ in 0..config.max_line_search {
            let forward = state.beta() - &(step_size * &grad);
            let trial = reg.proximal_operator(forward.view(), step_size * reg.lambda);
            let diff = &trial - state.beta();
            if diff.iter().all(|&d| d == 0.0) {
                // beta is a fixed point of the prox-gradient map
                return Ok(finish(state.into_inner(), Status::Converged, k, objective));
            }
            let trial_etas = linear_predictors(data, trial.view(), execution)?;
            let model = func + grad.dot(&diff) + diff.dot(&diff) / (2.0 * step_size);
            if let Some(trial_func) = trial_loss(family, data, &trial_etas, execution)? {
                if trial_func <= model {
                    accepted = Some((trial, trial_etas, trial_func));
                    break;
                }
            }
            step_size *= backtrack_mult;
            if step_size < config.min_step {
                break;
            }
        }

        let Some((trial, trial_etas, trial_func)) = accepted else {
            return Ok(finish(state.into_inner(), Status::Stalled, k + 1, objective));
        };

        let trial_objective = trial_func + reg.value(trial.view());
        state.advance(trial);
        etas = trial_etas;
        func = trial_func;

        let relative = (objective - trial_objective).abs()
            / objective
                .abs()
                .max(trial_objective.abs())
                .max(f64::MIN_POSITIVE);
        objective = trial_objective;

        log::debug!(
            "Proximal gradient iter #{:<3} | objective: {:.10e} | step: {:.3e} | relative change: {:.3e}",
            k + 1,
            objective,
            step_size,
            relative
        );

        if relative < config.tol {
            return Ok(finish(state.into_inner(), Status::Converged, k + 1, objective));
        }

        step_size *= config.step_growth;
        backtrack_mult = config.next_backtrack_mult;
    }

    Ok(finish(
        state.into_inner(),
        Status::MaxIterationsReached,
        config.max_iter,
        objective,
    ))
}
