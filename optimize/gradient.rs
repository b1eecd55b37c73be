//! First-order descent on the unregularized loss with an Armijo backtracking line search.

use crate::family::Family;
use crate::primitives::{gradient_from_predictors, linear_predictors, loss_from_predictors, trial_loss};
use crate::problem::{Problem, check_positive};
use crate::types::{OptimizationResult, ParameterState, SolverError, SolverKind, Status};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientDescentConfig {
    pub max_iter: usize,
    /// Relative objective improvement below which the run is declared converged.
    pub tol: f64,
    pub initial_step: f64,
    /// Linear predictors are recomputed from scratch every this many iterations.
    pub recalc_rate: usize,
    pub armijo_mult: f64,
    pub first_backtrack_mult: f64,
    pub next_backtrack_mult: f64,
    pub step_growth: f64,
    pub max_line_search: usize,
    pub min_step: f64,
}

impl Default for GradientDescentConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-14,
            initial_step: 1.0,
            recalc_rate: 10,
            armijo_mult: 0.1,
            first_backtrack_mult: 0.1,
            next_backtrack_mult: 0.5,
            step_growth: 1.25,
            max_line_search: 100,
            min_step: 1e-20,
        }
    }
}

impl GradientDescentConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        check_positive("tol", self.tol)?;
        check_positive("initial_step", self.initial_step)?;
        check_positive("min_step", self.min_step)?;
        check_positive("armijo_mult", self.armijo_mult)?;
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
        if self.recalc_rate == 0 {
            return Err(SolverError::InvalidConfiguration(
                "recalc_rate must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Gradient descent on the family's loss. The problem's regularizer is ignored.
pub fn gradient_descent<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &GradientDescentConfig,
) -> Result<OptimizationResult, SolverError> {
    problem.validate()?;
    config.validate()?;
    if !problem.regularizer.is_inactive() {
        log::debug!("Gradient descent ignores the configured regularizer.");
    }

    let family = problem.family;
    let data = problem.data;
    let execution = problem.execution;

    let mut state = ParameterState::new(problem.initial_beta());
    let mut etas = linear_predictors(data, state.beta().view(), execution)?;
    let mut func = loss_from_predictors(family, data, &etas, execution)?;
    let mut step_size = config.initial_step;
    let mut backtrack_mult = config.first_backtrack_mult;

    log::info!(
        "Gradient descent: {} rows, {} features, {} partitions.",
        data.n_rows(),
        data.n_features(),
        data.n_partitions()
    );

    let finish = |beta: Array1<f64>, status, iterations, objective| {
        let result = OptimizationResult {
            beta,
            status,
            iterations,
            final_objective: objective,
            solver: SolverKind::GradientDescent,
            consensus: None,
        };
        result.log_exit();
        result
    };

    for k in 0..config.max_iter {
        if problem.is_cancelled() {
            return Ok(finish(state.into_inner(), Status::Cancelled, k, func));
        }

        if k % config.recalc_rate == 0 {
            etas = linear_predictors(data, state.beta().view(), execution)?;
            func = loss_from_predictors(family, data, &etas, execution)?;
        }

        let grad = gradient_from_predictors(family, data, &etas, execution)?;
        let grad_sq = grad.dot(&grad);
        if grad_sq == 0.0 {
            return Ok(finish(state.into_inner(), Status::Converged, k, func));
        }
        let x_grad = linear_predictors(data, grad.view(), execution)?;

        let previous = func;
        let mut accepted = None;
        for attempt in 0..config.max_line_search {
            let trial = state.beta() - &(step_size * &grad);
            if attempt > 0 && trial == *state.beta() {
                break;
            }
            let trial_etas: Vec<Array1<f64>> = etas
                .iter()
                .zip(&x_grad)
                .map(|(eta, xg)| eta - &(step_size * xg))
                .collect();
            if let Some(trial_func) = trial_loss(family, data, &trial_etas, execution)? {
                let decrease = previous - trial_func;
                if decrease >= config.armijo_mult * step_size * grad_sq {
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
            return Ok(finish(state.into_inner(), Status::Stalled, k + 1, func));
        };

        state.advance(trial);
        etas = trial_etas;
        func = trial_func;

        let relative = (previous - func) / previous.abs().max(func.abs()).max(f64::MIN_POSITIVE);
        log::debug!(
            "Gradient descent iter #{:<3} | loss: {:.10e} | step: {:.3e} | relative decrease: {:.3e}",
            k + 1,
            func,
            step_size,
            relative
        );
        if relative < config.tol {
            return Ok(finish(state.into_inner(), Status::Converged, k + 1, func));
        }

        step_size *= config.step_growth;
        backtrack_mult = config.next_backtrack_mult;
    }

    Ok(finish(
        state.into_inner(),
        Status::MaxIterationsReached,
        config.max_iter,
        func,
    ))
}
