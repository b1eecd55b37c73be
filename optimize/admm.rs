//! Consensus ADMM over row partitions.
//!
//! Every partition keeps its own estimate `beta_i` and scaled dual `u_i`. A
//! round solves all local problems independently, averages them into the
//! consensus variable `z` through the regularizer's proximal operator, and
//! then moves the duals toward agreement. Only `z` is the global parameter
//! state; the per-partition vectors live in [`ConsensusState`].

use crate::family::Family;
use crate::local::{LocalSettings, LocalSolver, solve_local};
use crate::primitives::loss;
use crate::problem::{Problem, check_positive};
use crate::types::{
    ConsensusState, OptimizationResult, ParameterState, SolverError, SolverKind, Status,
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Residual balancing: rho changes when one residual exceeds the other by this factor.
const RHO_BALANCE: f64 = 10.0;
/// Multiplier applied to rho on each adjustment.
const RHO_SCALE: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmConfig {
    /// Augmented-Lagrangian penalty parameter.
    pub rho: f64,
    /// Over-relaxation factor in (0, 2). One disables relaxation.
    pub over_relax: f64,
    pub max_iter: usize,
    pub abstol: f64,
    pub reltol: f64,
    /// Rebalance rho from the primal and dual residuals after every round.
    pub adaptive_rho: bool,
    pub local_solver: LocalSolver,
    pub local_max_iter: usize,
    pub local_tol: f64,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            over_relax: 1.0,
            max_iter: 700,
            abstol: 1e-4,
            reltol: 1e-2,
            adaptive_rho: false,
            local_solver: LocalSolver::Newton,
            local_max_iter: 50,
            local_tol: 1e-10,
        }
    }
}

impl AdmmConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        check_positive("rho", self.rho)?;
        check_positive("abstol", self.abstol)?;
        check_positive("reltol", self.reltol)?;
        check_positive("local_tol", self.local_tol)?;
        if !(self.over_relax > 0.0 && self.over_relax < 2.0) {
            return Err(SolverError::InvalidConfiguration(format!(
                "over_relax must lie in (0, 2), got {}",
                self.over_relax
            )));
        }
        if self.local_max_iter == 0 {
            return Err(SolverError::InvalidConfiguration(
                "local_max_iter must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn local_settings(&self) -> LocalSettings {
        LocalSettings {
            solver: self.local_solver,
            max_iter: self.local_max_iter,
            tol: self.local_tol,
        }
    }
}

/// Primal and dual residuals of one round along with their stopping thresholds.
#[derive(Debug, Clone, Copy)]
struct Residuals {
    primal: f64,
    dual: f64,
    eps_primal: f64,
    eps_dual: f64,
}

impl Residuals {
    fn satisfied(&self) -> bool {
        self.primal < self.eps_primal && self.dual < self.eps_dual
    }
}

fn stacked_norm<'a>(vectors: impl Iterator<Item = &'a Array1<f64>>) -> f64 {
    vectors.map(|v| v.dot(v)).sum::<f64>().sqrt()
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Consensus ADMM starting from zeros (or the problem's warm start) with zero duals.
pub fn admm<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &AdmmConfig,
) -> Result<OptimizationResult, SolverError> {
    run(problem, config, None)
}

/// Consensus ADMM resumed from the per-partition state of an earlier run.
///
/// When the problem has no warm start, the consensus vector starts at the
/// mean of the local estimates.
pub fn admm_resume<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &AdmmConfig,
    state: &ConsensusState,
) -> Result<OptimizationResult, SolverError> {
    run(problem, config, Some(state))
}

fn validate_state(state: &ConsensusState, k: usize, p: usize) -> Result<(), SolverError> {
    if state.betas.len() != k || state.duals.len() != k {
        return Err(SolverError::InvalidConfiguration(format!(
            "consensus state covers {} local estimates and {} duals but the data has {k} partitions",
            state.betas.len(),
            state.duals.len()
        )));
    }
    let all = state.betas.iter().chain(&state.duals);
    for v in all {
        if v.len() != p {
            return Err(SolverError::InvalidConfiguration(format!(
                "consensus state vectors must have {p} coefficients, found {}",
                v.len()
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(SolverError::InvalidConfiguration(
                "consensus state contains non-finite values".to_string(),
            ));
        }
    }
    check_positive("consensus state rho", state.rho)
}

fn run<F: Family + ?Sized>(
    problem: &Problem<'_, F>,
    config: &AdmmConfig,
    resume: Option<&ConsensusState>,
) -> Result<OptimizationResult, SolverError> {
    problem.validate()?;
    config.validate()?;

    let family = problem.family;
    let data = problem.data;
    let execution = problem.execution;
    let reg = problem.regularizer;
    let k = data.n_partitions();
    let p = data.n_features();
    let settings = config.local_settings();
    let alpha = config.over_relax;

    let (mut betas, mut duals, mut rho, z0) = match resume {
        Some(state) => {
            validate_state(state, k, p)?;
            let z0 = match &problem.warm_start {
                Some(beta) => beta.clone(),
                None => {
                    let mut mean = Array1::<f64>::zeros(p);
                    for b in &state.betas {
                        mean += b;
                    }
                    mean / k as f64
                }
            };
            (state.betas.clone(), state.duals.clone(), state.rho, z0)
        }
        None => {
            let z0 = problem.initial_beta();
            (vec![z0.clone(); k], vec![Array1::zeros(p); k], config.rho, z0)
        }
    };
    let mut consensus = ParameterState::new(z0);

    log::info!(
        "ADMM: {} rows, {} features, {} partitions, rho {}, penalty {:?} with lambda {}.",
        data.n_rows(),
        p,
        k,
        rho,
        reg.penalty,
        reg.lambda
    );

    let mut status = Status::MaxIterationsReached;
    let sqrt_k = (k as f64).sqrt();
    let abs_scale = ((p * k) as f64).sqrt() * config.abstol;

    for iter in 0..config.max_iter {
        if problem.is_cancelled() {
            status = Status::Cancelled;
            break;
        }

        let z = consensus.beta().clone();
        let solutions = data.map_partitions(execution, |i, part| {
            let center = &z - &duals[i];
            solve_local(family, i, part, betas[i].view(), center.view(), rho, &settings)
        })?;
        let unconverged = solutions.iter().filter(|s| !s.converged).count();
        if unconverged > 0 {
            log::debug!("ADMM round {}: {unconverged} of {k} local solves hit their cap.", iter + 1);
        }
        betas = solutions.into_iter().map(|s| s.beta).collect();

        let relaxed: Vec<Array1<f64>> = betas
            .iter()
            .map(|b| alpha * b + (1.0 - alpha) * &z)
            .collect();
        let mut average = Array1::<f64>::zeros(p);
        for (b, u) in relaxed.iter().zip(&duals) {
            average += b;
            average += u;
        }
        average /= k as f64;
        let z_next = reg.proximal_operator(average.view(), reg.lambda / (rho * k as f64));
        if z_next.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteUpdate {
                quantity: "consensus estimate",
            });
        }

        for (u, b) in duals.iter_mut().zip(&relaxed) {
            *u += b;
            *u -= &z_next;
        }

        let residuals = Residuals {
            primal: betas
                .iter()
                .map(|b| {
                    let d = b - &z_next;
                    d.dot(&d)
                })
                .sum::<f64>()
                .sqrt(),
            dual: rho * sqrt_k * norm(&(&z_next - &z)),
            eps_primal: abs_scale
                + config.reltol * stacked_norm(betas.iter()).max(sqrt_k * norm(&z_next)),
            eps_dual: abs_scale + config.reltol * rho * stacked_norm(duals.iter()),
        };
        consensus.advance(z_next);

        log::debug!(
            "ADMM iter #{:<3} | primal: {:.3e} (eps {:.3e}) | dual: {:.3e} (eps {:.3e}) | rho: {:.3e}",
            iter + 1,
            residuals.primal,
            residuals.eps_primal,
            residuals.dual,
            residuals.eps_dual,
            rho
        );

        if residuals.satisfied() {
            status = Status::Converged;
            break;
        }

        if config.adaptive_rho {
            if residuals.primal > RHO_BALANCE * residuals.dual {
                rho *= RHO_SCALE;
                duals.iter_mut().for_each(|u| *u /= RHO_SCALE);
            } else if residuals.dual > RHO_BALANCE * residuals.primal {
                rho /= RHO_SCALE;
                duals.iter_mut().for_each(|u| *u *= RHO_SCALE);
            }
        }
    }

    let iterations = consensus.round();
    let beta = consensus.into_inner();
    let final_objective = loss(family, data, beta.view(), execution)? + reg.value(beta.view());
    let result = OptimizationResult {
        beta,
        status,
        iterations,
        final_objective,
        solver: SolverKind::Admm,
        consensus: Some(ConsensusState { betas, duals, rho }),
    };
    result.log_exit();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{Logistic, sigmoid};
    use crate::newton::{NewtonConfig, newton};
    use crate::partition::PartitionedData;
    use crate::primitives::gradient;
    use crate::problem::CancellationToken;
    use crate::regularizer::{Regularizer, kkt_violation};
    use ndarray::{Array2, arr1};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal as Gaussian};

    fn synthetic(n: usize, chunks: usize, seed: u64) -> PartitionedData {
        let mut rng = StdRng::seed_from_u64(seed);
        let gauss = Gaussian::new(0.0, 1.0).unwrap();
        let truth = arr1(&[0.5, 1.0, -1.0, 0.0, 0.0]);
        let x = Array2::from_shape_fn((n, 5), |(_, j)| if j == 0 { 1.0 } else { gauss.sample(&mut rng) });
        let y = x
            .dot(&truth)
            .mapv(|eta| if rng.r#gen::<f64>() < sigmoid(eta) { 1.0 } else { 0.0 });
        PartitionedData::from_arrays(x.view(), y.view(), chunks).unwrap()
    }

    fn tight() -> AdmmConfig {
        AdmmConfig {
            max_iter: 3000,
            abstol: 1e-10,
            reltol: 1e-8,
            adaptive_rho: true,
            ..Default::default()
        }
    }

    #[test]
    fn unpenalized_consensus_matches_newton() {
        let data = synthetic(400, 4, 7);
        let problem = Problem::new(&Logistic, &data);
        let reference = newton(&problem, &NewtonConfig::default()).unwrap();
        let result = admm(&problem, &tight()).unwrap();
        assert_eq!(result.solver, SolverKind::Admm);
        let gap = (&result.beta - &reference.beta).iter().fold(0.0_f64, |m, d| m.max(d.abs()));
        assert!(gap < 1e-3, "ADMM {:?} vs Newton {:?}", result.beta, reference.beta);
    }

    #[test]
    fn lasso_consensus_satisfies_kkt_conditions() {
        let data = synthetic(400, 4, 11);
        let lambda = 4.0;
        let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(lambda));
        let result = admm(&problem, &tight()).unwrap();
        let g = gradient(&Logistic, &data, result.beta.view(), Default::default()).unwrap();
        let violation = kkt_violation(g.view(), result.beta.view(), lambda);
        assert!(violation < 5e-2, "kkt violation {violation}, beta {:?}", result.beta);
    }

    #[test]
    fn resuming_from_converged_state_barely_moves() {
        let data = synthetic(300, 3, 3);
        let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(2.0));
        let first = admm(&problem, &tight()).unwrap();
        let state = first.consensus.clone().unwrap();
        let one_round = AdmmConfig {
            max_iter: 1,
            ..tight()
        };
        let again = admm_resume(
            &Problem::new(&Logistic, &data)
                .with_regularizer(Regularizer::l1(2.0))
                .with_warm_start(first.beta.clone()),
            &one_round,
            &state,
        )
        .unwrap();
        assert_eq!(again.iterations, 1);
        assert!((&again.beta - &first.beta).iter().all(|d| d.abs() < 1e-4));
    }

    #[test]
    fn mismatched_consensus_state_is_rejected() {
        let data = synthetic(60, 3, 5);
        let state = ConsensusState {
            betas: vec![Array1::zeros(5); 2],
            duals: vec![Array1::zeros(5); 2],
            rho: 1.0,
        };
        let err = admm_resume(&Problem::new(&Logistic, &data), &AdmmConfig::default(), &state)
            .unwrap_err();
        assert!(matches!(err, SolverError::InvalidConfiguration(_)));
    }

    #[test]
    fn invalid_relaxation_is_rejected() {
        let data = synthetic(60, 2, 5);
        let config = AdmmConfig {
            over_relax: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            admm(&Problem::new(&Logistic, &data), &config),
            Err(SolverError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn cancellation_returns_the_current_consensus() {
        let data = synthetic(60, 2, 9);
        let token = CancellationToken::new();
        token.cancel();
        let result = admm(
            &Problem::new(&Logistic, &data).with_cancellation(token),
            &AdmmConfig::default(),
        )
        .unwrap();
        assert_eq!(result.status, Status::Cancelled);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.beta, Array1::zeros(5));
    }

    #[test]
    fn over_relaxed_run_reaches_the_same_ridge_solution() {
        let data = synthetic(300, 3, 21);
        let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l2(1.0));
        let plain = admm(&problem, &tight()).unwrap();
        let relaxed = admm(
            &problem,
            &AdmmConfig {
                over_relax: 1.6,
                ..tight()
            },
        )
        .unwrap();
        let gap = (&plain.beta - &relaxed.beta).iter().fold(0.0_f64, |m, d| m.max(d.abs()));
        assert!(gap < 1e-3, "{:?} vs {:?}", plain.beta, relaxed.beta);
    }
}
