use approx::assert_abs_diff_eq;
use chunkglm::admm::{AdmmConfig, admm, admm_resume};
use chunkglm::bfgs::{BfgsConfig, bfgs};
use chunkglm::family::sigmoid;
use chunkglm::gradient::{GradientDescentConfig, gradient_descent};
use chunkglm::newton::{NewtonConfig, newton};
use chunkglm::primitives::gradient;
use chunkglm::proximal::{ProximalGradientConfig, proximal_gradient};
use chunkglm::regularizer::kkt_violation;
use chunkglm::{Execution, Logistic, OptimizationResult, PartitionedData, Problem, Regularizer, Status};
use ndarray::{Array1, Array2, arr1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const N_ROWS: usize = 1_000;
const LAMBDA: f64 = 4.0;

/// Logistic data with an intercept column followed by four standard-normal features.
fn simulate(seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let gauss = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((N_ROWS, 5), |(_, j)| if j == 0 { 1.0 } else { gauss.sample(&mut rng) });
    let truth = arr1(&[0.5, 1.0, -1.0, 0.25, 0.0]);
    let y = x
        .dot(&truth)
        .mapv(|eta| if rng.r#gen::<f64>() < sigmoid(eta) { 1.0 } else { 0.0 });
    (x, y)
}

fn partitioned(seed: u64, chunks: usize) -> PartitionedData {
    let (x, y) = simulate(seed);
    PartitionedData::from_arrays(x.view(), y.view(), chunks).unwrap()
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn grad_at(data: &PartitionedData, result: &OptimizationResult) -> Array1<f64> {
    gradient(&Logistic, data, result.beta.view(), Execution::Sequential).unwrap()
}

fn tight_newton() -> NewtonConfig {
    NewtonConfig {
        tol: 1e-12,
        ..Default::default()
    }
}

fn tight_admm() -> AdmmConfig {
    AdmmConfig {
        max_iter: 3000,
        abstol: 1e-10,
        reltol: 1e-8,
        adaptive_rho: true,
        ..Default::default()
    }
}

fn tight_proximal() -> ProximalGradientConfig {
    ProximalGradientConfig {
        max_iter: 5000,
        tol: 1e-14,
        ..Default::default()
    }
}

#[test]
fn newton_reaches_a_smaller_gradient_than_gradient_descent() {
    let data = partitioned(1, 5);
    let problem = Problem::new(&Logistic, &data);
    let newton_result = newton(&problem, &tight_newton()).unwrap();
    assert!(newton_result.converged());
    let budget = GradientDescentConfig {
        max_iter: newton_result.iterations.max(1),
        ..Default::default()
    };
    let gd_result = gradient_descent(&problem, &budget).unwrap();
    let newton_norm = max_abs(&grad_at(&data, &newton_result));
    let gd_norm = max_abs(&grad_at(&data, &gd_result));
    assert!(newton_norm < 1e-3, "Newton gradient {newton_norm}");
    assert!(newton_norm < gd_norm, "Newton {newton_norm} vs gradient descent {gd_norm}");
}

#[test]
fn fitted_probabilities_sum_to_the_observed_positives() {
    let (x, y) = simulate(2);
    let data = PartitionedData::from_arrays(x.view(), y.view(), 4).unwrap();
    let problem = Problem::new(&Logistic, &data);

    let fitted = newton(&problem, &tight_newton()).unwrap();
    let residual_sum: f64 = x.dot(&fitted.beta).mapv(sigmoid).sum() - y.sum();
    assert!(residual_sum.abs() < 1e-3, "Newton residual sum {residual_sum}");

    let truncated = gradient_descent(
        &problem,
        &GradientDescentConfig {
            max_iter: 1,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(truncated.status, Status::MaxIterationsReached);
    let truncated_sum: f64 = x.dot(&truncated.beta).mapv(sigmoid).sum() - y.sum();
    assert!(truncated_sum.abs() > 1e-3, "truncated residual sum {truncated_sum}");
}

#[test]
fn proximal_gradient_lasso_satisfies_kkt() {
    let data = partitioned(3, 5);
    let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(LAMBDA));
    let result = proximal_gradient(&problem, &tight_proximal()).unwrap();
    let violation = kkt_violation(grad_at(&data, &result).view(), result.beta.view(), LAMBDA);
    assert!(violation < 1e-2, "violation {violation}, beta {:?}", result.beta);
}

#[test]
fn admm_lasso_satisfies_kkt() {
    let data = partitioned(3, 5);
    let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(LAMBDA));
    let result = admm(&problem, &tight_admm()).unwrap();
    let violation = kkt_violation(grad_at(&data, &result).view(), result.beta.view(), LAMBDA);
    assert!(violation < 5e-2, "violation {violation}, beta {:?}", result.beta);
}

#[test]
fn admm_and_proximal_gradient_agree_on_the_lasso() {
    let data = partitioned(4, 5);
    let problem = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(LAMBDA));
    let prox = proximal_gradient(&problem, &tight_proximal()).unwrap();
    let consensus = admm(&problem, &tight_admm()).unwrap();
    for (a, b) in prox.beta.iter().zip(consensus.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-3);
    }
}

#[test]
fn results_do_not_depend_on_the_partitioning() {
    let five = partitioned(5, 5);
    let ten = partitioned(5, 10);
    let lasso = Regularizer::l1(LAMBDA);

    let n5 = newton(&Problem::new(&Logistic, &five), &tight_newton()).unwrap();
    let n10 = newton(&Problem::new(&Logistic, &ten), &tight_newton()).unwrap();
    for (a, b) in n5.beta.iter().zip(n10.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }

    let p5 = proximal_gradient(&Problem::new(&Logistic, &five).with_regularizer(lasso), &tight_proximal())
        .unwrap();
    let p10 = proximal_gradient(&Problem::new(&Logistic, &ten).with_regularizer(lasso), &tight_proximal())
        .unwrap();
    for (a, b) in p5.beta.iter().zip(p10.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }

    let a5 = admm(&Problem::new(&Logistic, &five).with_regularizer(lasso), &tight_admm()).unwrap();
    let a10 = admm(&Problem::new(&Logistic, &ten).with_regularizer(lasso), &tight_admm()).unwrap();
    for (a, b) in a5.beta.iter().zip(a10.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-3);
    }
}

#[test]
fn rerunning_from_a_solution_is_idempotent() {
    let data = partitioned(6, 5);
    let lasso = Regularizer::l1(LAMBDA);

    let first = newton(&Problem::new(&Logistic, &data), &tight_newton()).unwrap();
    let again = newton(
        &Problem::new(&Logistic, &data).with_warm_start(first.beta.clone()),
        &NewtonConfig {
            max_iter: 1,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(max_abs(&(&again.beta - &first.beta)) < 1e-6);

    let again = gradient_descent(
        &Problem::new(&Logistic, &data).with_warm_start(first.beta.clone()),
        &GradientDescentConfig {
            max_iter: 1,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(max_abs(&(&again.beta - &first.beta)) < 1e-6);

    let again = bfgs(
        &Problem::new(&Logistic, &data).with_warm_start(first.beta.clone()),
        &BfgsConfig {
            max_iter: 1,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(max_abs(&(&again.beta - &first.beta)) < 1e-6);

    let first = proximal_gradient(&Problem::new(&Logistic, &data).with_regularizer(lasso), &tight_proximal())
        .unwrap();
    let again = proximal_gradient(
        &Problem::new(&Logistic, &data)
            .with_regularizer(lasso)
            .with_warm_start(first.beta.clone()),
        &ProximalGradientConfig {
            max_iter: 1,
            ..tight_proximal()
        },
    )
    .unwrap();
    assert!(max_abs(&(&again.beta - &first.beta)) < 1e-6);

    let first = admm(&Problem::new(&Logistic, &data).with_regularizer(lasso), &tight_admm()).unwrap();
    let state = first.consensus.clone().unwrap();
    let again = admm_resume(
        &Problem::new(&Logistic, &data)
            .with_regularizer(lasso)
            .with_warm_start(first.beta.clone()),
        &AdmmConfig {
            max_iter: 1,
            ..tight_admm()
        },
        &state,
    )
    .unwrap();
    assert!(max_abs(&(&again.beta - &first.beta)) < 1e-4);
}

#[test]
fn zero_lambda_proximal_gradient_matches_the_unpenalized_optimum() {
    let data = partitioned(7, 5);
    let reference = newton(&Problem::new(&Logistic, &data), &tight_newton()).unwrap();
    let result = proximal_gradient(
        &Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(0.0)),
        &tight_proximal(),
    )
    .unwrap();
    assert!(result.beta.iter().all(|&b| b != 0.0), "{:?}", result.beta);
    for (a, b) in result.beta.iter().zip(reference.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn sequential_and_parallel_execution_agree() {
    let data = partitioned(8, 10);
    let base = Problem::new(&Logistic, &data).with_regularizer(Regularizer::l2(1.0));
    let parallel = admm(&base, &AdmmConfig::default()).unwrap();
    let sequential = admm(
        &Problem::new(&Logistic, &data)
            .with_regularizer(Regularizer::l2(1.0))
            .with_execution(Execution::Sequential),
        &AdmmConfig::default(),
    )
    .unwrap();
    assert_eq!(parallel.iterations, sequential.iterations);
    assert_eq!(parallel.beta, sequential.beta);
}

#[test]
fn results_serialize_with_their_consensus_state() {
    let data = partitioned(9, 3);
    let result = admm(
        &Problem::new(&Logistic, &data).with_regularizer(Regularizer::l1(1.0)),
        &AdmmConfig::default(),
    )
    .unwrap();
    let json = serde_json::to_string(&result).unwrap();
    let back: OptimizationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.status, result.status);
    assert_eq!(back.solver, result.solver);
    assert_eq!(back.iterations, result.iterations);
    for (a, b) in back.beta.iter().zip(result.beta.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
    let (restored, original) = (back.consensus.unwrap(), result.consensus.unwrap());
    assert_eq!(restored.betas.len(), 3);
    assert_eq!(restored.duals.len(), original.duals.len());
    assert_abs_diff_eq!(restored.rho, original.rho, epsilon = 1e-12);
    assert!(json.contains("\"solver\":\"admm\""));
}
