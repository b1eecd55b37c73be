//! Quasi-Newton minimization of the full smooth objective.

use crate::family::Family;
use crate::local::run_bfgs;
use crate::primitives::loss_and_gradient;
use crate::problem::{Problem, check_positive};
use crate::types::{OptimizationResult, ParameterState, SolverError, SolverKind, Status};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BfgsConfig {
    pub max_iter: usize,
    /// Gradient-norm tolerance handed to the line-search optimizer.
    pub tol: f64,
}

impl Default for BfgsConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
        }
    }
}

impl BfgsConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        check_positive("tol", self.tol)?;
        if self.max_iter == 0 {
            return Err(SolverError::InvalidConfiguration(
                "max_iter must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// BFGS with a strong-Wolfe line search on `loss(beta) + lambda * r(beta)`.
///
/// Only smooth penalties are accepted. Cancellation is checked once before
/// the optimizer starts, since the external loop cannot be interrupted.
pub fn bfgs<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &BfgsConfig,
) -> Result<OptimizationResult, SolverError> {
    problem.validate()?;
    config.validate()?;
    let reg = problem.regularizer;
    if !reg.is_smooth() {
        return Err(SolverError::InvalidConfiguration(format!(
            "BFGS needs a differentiable objective; use proximal gradient or ADMM for {:?}",
            reg.penalty
        )));
    }

    let family = problem.family;
    let data = problem.data;
    let execution = problem.execution;
    let mut state = ParameterState::new(problem.initial_beta());

    log::info!(
        "BFGS: {} rows, {} features, {} partitions.",
        data.n_rows(),
        data.n_features(),
        data.n_partitions()
    );

    let objective = |beta: &Array1<f64>| -> Result<(f64, Array1<f64>), SolverError> {
        let lg = loss_and_gradient(family, data, beta.view(), execution)?;
        Ok((
            lg.loss + reg.value(beta.view()),
            lg.gradient + reg.gradient(beta.view()),
        ))
    };

    if problem.is_cancelled() {
        let (value, _) = objective(state.beta())?;
        let result = OptimizationResult {
            beta: state.into_inner(),
            status: Status::Cancelled,
            iterations: 0,
            final_objective: value,
            solver: SolverKind::Bfgs,
            consensus: None,
        };
        result.log_exit();
        return Ok(result);
    }

    let outcome = run_bfgs(state.beta().clone(), config.tol, config.max_iter, objective)?;
    state.advance(outcome.point);

    let result = OptimizationResult {
        beta: state.into_inner(),
        status: if outcome.converged {
            Status::Converged
        } else {
            Status::MaxIterationsReached
        },
        iterations: outcome.iterations,
        final_objective: outcome.value,
        solver: SolverKind::Bfgs,
        consensus: None,
    };
    result.log_exit();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{Logistic, Poisson};
    use crate::newton::{NewtonConfig, newton};
    use crate::partition::PartitionedData;
    use crate::primitives::gradient;
    use crate::regularizer::Regularizer;
    use ndarray::{Array, Array2};

    fn data() -> PartitionedData {
        let x: Array2<f64> = Array::from_shape_fn((90, 3), |(i, j)| match j {
            0 => 1.0,
            1 => (i as f64 / 30.0) - 1.5,
            _ => ((i * 11) % 9) as f64 / 4.0 - 1.0,
        });
        let y = Array::from_shape_fn(90, |i| if (i * 29) % 13 < 4 + i / 15 { 1.0 } else { 0.0 });
        PartitionedData::from_arrays(x.view(), y.view(), 3).unwrap()
    }

    #[test]
    fn agrees_with_newton_without_a_penalty() {
        let data = data();
        let problem = Problem::new(&Logistic, &data);
        let reference = newton(&problem, &NewtonConfig::default()).unwrap();
        let result = bfgs(&problem, &BfgsConfig { tol: 1e-8, ..Default::default() }).unwrap();
        assert_eq!(result.solver, SolverKind::Bfgs);
        assert!((&result.beta - &reference.beta).iter().all(|d| d.abs() < 1e-4));
    }

    #[test]
    fn ridge_solution_is_stationary() {
        let data = data();
        let reg = Regularizer::l2(3.0);
        let problem = Problem::new(&Logistic, &data).with_regularizer(reg);
        let result = bfgs(&problem, &BfgsConfig { tol: 1e-8, ..Default::default() }).unwrap();
        let g = gradient(&Logistic, &data, result.beta.view(), Default::default()).unwrap()
            + reg.gradient(result.beta.view());
        assert!(g.iter().all(|v| v.abs() < 1e-4), "gradient {g:?}");
    }

    #[test]
    fn lasso_is_refused() {
        let data = data();
        let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(1.0));
        assert!(matches!(
            bfgs(&problem, &BfgsConfig::default()),
            Err(SolverError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn overflowing_trial_points_do_not_abort_the_run() {
        let x = Array2::<f64>::ones((200, 1));
        let y = Array::from_shape_fn(200, |i| (3 + i % 5) as f64);
        let data = PartitionedData::from_arrays(x.view(), y.view(), 4).unwrap();
        let result = bfgs(&Problem::new(&Poisson, &data), &BfgsConfig { tol: 1e-8, ..Default::default() })
            .unwrap();
        assert!(result.final_objective.is_finite());
        assert!((result.beta[0] - 5.0_f64.ln()).abs() < 1e-4, "{:?}", result.beta);
    }
}
