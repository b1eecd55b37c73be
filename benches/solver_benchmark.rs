// ========================================================================================
//
//                 Partitioned solver benchmark for chunkglm
//
// ========================================================================================
//
// Measures how the cost of one full solve scales with the number of row
// partitions, for each algorithm, on a fixed synthetic logistic problem. Partition
// counts on the x-axis show the overhead of splitting the reduction.
//
// ========================================================================================

use chunkglm::family::sigmoid;
use chunkglm::solver::SolverConfig;
use chunkglm::{Execution, Logistic, PartitionedData, Problem, Regularizer, Solver};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

// --- Benchmark Tuning Parameters ---

/// Rows in the simulated design matrix.
const NUM_ROWS: usize = 20_000;
/// Columns, the first of which is the intercept.
const NUM_FEATURES: usize = 10;
/// The partition counts to test.
const PARTITION_COUNTS: [usize; 4] = [1, 4, 16, 64];

fn simulate(seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let gauss = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((NUM_ROWS, NUM_FEATURES), |(_, j)| {
        if j == 0 { 1.0 } else { gauss.sample(&mut rng) }
    });
    let truth = Array1::from_shape_fn(NUM_FEATURES, |j| if j % 3 == 0 { 0.0 } else { 0.5 });
    let y = x
        .dot(&truth)
        .mapv(|eta| if rng.r#gen::<f64>() < sigmoid(eta) { 1.0 } else { 0.0 });
    (x, y)
}

fn benchmark_partition_scaling(c: &mut Criterion) {
    let (x, y) = simulate(42);
    let config = SolverConfig::default();
    let mut group = c.benchmark_group("solve_by_partitions");
    group.sample_size(10);
    group.throughput(Throughput::Elements(NUM_ROWS as u64));

    for &partitions in &PARTITION_COUNTS {
        let data = PartitionedData::from_arrays(x.view(), y.view(), partitions).unwrap();
        for (solver, regularizer) in [
            (Solver::Newton, Regularizer::none()),
            (Solver::GradientDescent, Regularizer::none()),
            (Solver::ProximalGradient, Regularizer::l1(4.0)),
            (Solver::Admm, Regularizer::l1(4.0)),
        ] {
            let problem = Problem::new(&Logistic, &data)
                .with_regularizer(regularizer)
                .with_execution(Execution::Parallel);
            group.bench_with_input(
                BenchmarkId::new(solver.kind().to_string(), partitions),
                &partitions,
                |b, _| b.iter(|| black_box(solver.run(&problem, &config).unwrap())),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_partition_scaling);
criterion_main!(benches);
