//! Single-partition solvers used as subroutines by the consensus optimizer.
//!
//! Both kernels minimize the augmented local objective
//! `f_i(beta) + (rho / 2) * ||beta - v||^2` where `v = z - u_i`. The quadratic
//! term keeps the problem strongly convex, so the Newton system is always
//! positive definite for `rho > 0`.

use crate::family::Family;
use crate::partition::Partition;
use crate::primitives::{
    partition_gradient_hessian, partition_loss, partition_loss_gradient, solve_symmetric_system,
};
use crate::types::SolverError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Which kernel solves the per-partition sub-problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LocalSolver {
    /// Newton steps with step halving.
    #[default]
    Newton,
    /// Quasi-Newton with a strong-Wolfe line search.
    Bfgs,
}

/// The outcome of one local solve.
#[derive(Debug, Clone)]
pub struct LocalSolution {
    pub beta: Array1<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Tuning knobs shared by both kernels.
#[derive(Debug, Clone, Copy)]
pub struct LocalSettings {
    pub solver: LocalSolver,
    pub max_iter: usize,
    pub tol: f64,
}

const MAX_STEP_HALVINGS: usize = 30;
const LOCAL_MIN_RCOND: f64 = 1e-14;

fn proximity(beta: ArrayView1<f64>, center: ArrayView1<f64>) -> Array1<f64> {
    &beta - &center
}

/// Value of the augmented local objective.
pub fn augmented_objective<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    beta: ArrayView1<f64>,
    center: ArrayView1<f64>,
    rho: f64,
) -> Result<f64, SolverError> {
    let diff = proximity(beta, center);
    Ok(partition_loss(family, index, part, beta)? + 0.5 * rho * diff.dot(&diff))
}

/// Dispatches to the configured kernel.
pub fn solve_local<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    start: ArrayView1<f64>,
    center: ArrayView1<f64>,
    rho: f64,
    settings: &LocalSettings,
) -> Result<LocalSolution, SolverError> {
    match settings.solver {
        LocalSolver::Newton => local_newton(family, index, part, start, center, rho, settings),
        LocalSolver::Bfgs => local_bfgs(family, index, part, start, center, rho, settings),
    }
}

/// Damped Newton on the augmented objective.
///
/// Stops when the gradient's largest component falls below
/// `tol * (1 + |objective|)`, when step halving can no longer decrease the
/// objective, or at `max_iter`.
pub fn local_newton<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    start: ArrayView1<f64>,
    center: ArrayView1<f64>,
    rho: f64,
    settings: &LocalSettings,
) -> Result<LocalSolution, SolverError> {
    let mut beta = start.to_owned();
    let mut objective = augmented_objective(family, index, part, beta.view(), center, rho)?;

    for iter in 1..=settings.max_iter {
        let gh = partition_gradient_hessian(family, index, part, beta.view())?;
        let diff = proximity(beta.view(), center);
        let grad = &gh.gradient + &(rho * &diff);
        let grad_max = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
        if grad_max <= settings.tol * (1.0 + objective.abs()) {
            return Ok(LocalSolution {
                beta,
                objective,
                iterations: iter - 1,
                converged: true,
            });
        }

        let mut hess = gh.hessian;
        hess.diag_mut().mapv_inplace(|d| d + rho);
        let step = solve_symmetric_system(&hess, &grad, LOCAL_MIN_RCOND).map_err(|e| {
            SolverError::LocalSolveFailed {
                partition: index,
                reason: e.to_string(),
            }
        })?;

        let mut scale = 1.0;
        let mut halvings = 0;
        let mut trial = &beta - &step;
        let mut trial_objective =
            augmented_objective(family, index, part, trial.view(), center, rho);
        while !matches!(trial_objective, Ok(v) if v <= objective) && halvings < MAX_STEP_HALVINGS {
            scale *= 0.5;
            halvings += 1;
            trial = &beta - &(scale * &step);
            trial_objective = augmented_objective(family, index, part, trial.view(), center, rho);
        }

        match trial_objective {
            Ok(value) if value <= objective => {
                let decrease = objective - value;
                beta = trial;
                objective = value;
                if decrease <= f64::EPSILON * (1.0 + objective.abs()) {
                    return Ok(LocalSolution {
                        beta,
                        objective,
                        iterations: iter,
                        converged: true,
                    });
                }
            }
            _ => {
                log::debug!(
                    "Partition {index}: local Newton could not decrease the objective after {halvings} halvings."
                );
                return Ok(LocalSolution {
                    beta,
                    objective,
                    iterations: iter,
                    converged: false,
                });
            }
        }
    }

    Ok(LocalSolution {
        beta,
        objective,
        iterations: settings.max_iter,
        converged: false,
    })
}

/// Result of a BFGS run that never hands back a point worse than the best one evaluated.
#[derive(Debug, Clone)]
pub(crate) struct BfgsOutcome {
    pub point: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Runs `wolfe_bfgs` on a fallible objective.
///
/// The optimizer reports cap exhaustion and line-search failure as errors that
/// carry no point, so the objective closure remembers the best finite point it
/// has seen and that point is returned instead. An objective error is only
/// surfaced when no finite point was ever evaluated.
pub(crate) fn run_bfgs<Obj>(
    x0: Array1<f64>,
    tol: f64,
    max_iter: usize,
    objective: Obj,
) -> Result<BfgsOutcome, SolverError>
where
    Obj: Fn(&Array1<f64>) -> Result<(f64, Array1<f64>), SolverError>,
{
    let best: RefCell<Option<(f64, Array1<f64>)>> = RefCell::new(None);
    let failure: RefCell<Option<SolverError>> = RefCell::new(None);

    let wrapped = |x: &Array1<f64>| -> (f64, Array1<f64>) {
        match objective(x) {
            Ok((value, grad)) => {
                let mut slot = best.borrow_mut();
                let improves = slot.as_ref().is_none_or(|(v, _)| value < *v);
                if improves {
                    *slot = Some((value, x.clone()));
                }
                (value, grad)
            }
            Err(e) => {
                log::debug!("BFGS objective evaluation failed: {e}");
                failure.borrow_mut().get_or_insert(e);
                (f64::INFINITY, Array1::zeros(x.len()))
            }
        }
    };

    let run = Bfgs::new(x0, wrapped)
        .with_tolerance(tol)
        .with_max_iterations(max_iter)
        .run();

    match run {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => Ok(BfgsOutcome {
            point: final_point,
            value: final_value,
            iterations,
            converged: true,
        }),
        Err(e) => {
            log::debug!("BFGS stopped early: {e:?}");
            match best.into_inner() {
                Some((value, point)) if value.is_finite() => Ok(BfgsOutcome {
                    point,
                    value,
                    iterations: max_iter,
                    converged: false,
                }),
                _ => Err(failure
                    .into_inner()
                    .unwrap_or_else(|| SolverError::LocalSolveFailed {
                        partition: 0,
                        reason: format!("{e:?}"),
                    })),
            }
        }
    }
}

/// BFGS on the augmented objective.
pub fn local_bfgs<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    start: ArrayView1<f64>,
    center: ArrayView1<f64>,
    rho: f64,
    settings: &LocalSettings,
) -> Result<LocalSolution, SolverError> {
    let objective = |beta: &Array1<f64>| -> Result<(f64, Array1<f64>), SolverError> {
        let lg = partition_loss_gradient(family, index, part, beta.view())?;
        let diff = proximity(beta.view(), center);
        let value = lg.loss + 0.5 * rho * diff.dot(&diff);
        Ok((value, lg.gradient + rho * &diff))
    };
    let outcome = run_bfgs(start.to_owned(), settings.tol, settings.max_iter, objective).map_err(
        |e| match e {
            SolverError::LocalSolveFailed { reason, .. } => SolverError::LocalSolveFailed {
                partition: index,
                reason,
            },
            other => other,
        },
    )?;
    Ok(LocalSolution {
        beta: outcome.point,
        objective: outcome.value,
        iterations: outcome.iterations,
        converged: outcome.converged,
    })
}
