#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use chunkglm::data::load_csv;
use chunkglm::estimator::FittedModel;
use chunkglm::solver::SolverConfig;
use chunkglm::{Execution, FamilyKind, GlmEstimator, Penalty, Regularizer, Solver};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

#[derive(Clone, Copy, ValueEnum)]
pub enum FamilyCli {
    Logistic,
    Normal,
    Poisson,
}

impl From<FamilyCli> for FamilyKind {
    fn from(value: FamilyCli) -> Self {
        match value {
            FamilyCli::Logistic => FamilyKind::Logistic,
            FamilyCli::Normal => FamilyKind::Normal,
            FamilyCli::Poisson => FamilyKind::Poisson,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SolverCli {
    Admm,
    Newton,
    GradientDescent,
    ProximalGradient,
    Bfgs,
}

impl From<SolverCli> for Solver {
    fn from(value: SolverCli) -> Self {
        match value {
            SolverCli::Admm => Solver::Admm,
            SolverCli::Newton => Solver::Newton,
            SolverCli::GradientDescent => Solver::GradientDescent,
            SolverCli::ProximalGradient => Solver::ProximalGradient,
            SolverCli::Bfgs => Solver::Bfgs,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PenaltyCli {
    None,
    L1,
    L2,
    ElasticNet,
}

#[derive(Args)]
pub struct FitArgs {
    /// Headered CSV (or .tsv) file with the training data
    pub training_data: PathBuf,

    /// Name of the response column; every other column is a feature
    #[arg(long)]
    pub target: String,

    #[arg(long, value_enum, default_value_t = FamilyCli::Logistic)]
    pub family: FamilyCli,

    #[arg(long, value_enum, default_value_t = SolverCli::Admm)]
    pub solver: SolverCli,

    #[arg(long, value_enum, default_value_t = PenaltyCli::L2)]
    pub penalty: PenaltyCli,

    /// Regularization strength
    #[arg(long, default_value = "1.0")]
    pub lambda: f64,

    /// Share of the L1 term in the elastic-net penalty
    #[arg(long, default_value = "0.5")]
    pub l1_ratio: f64,

    /// Number of row partitions
    #[arg(long, default_value = "1")]
    pub partitions: usize,

    /// Process partitions one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,

    #[arg(long)]
    pub no_intercept: bool,

    #[arg(long)]
    pub no_normalize: bool,

    /// TOML file with per-solver settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "model.toml")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Headered CSV (or .tsv) file with the same feature columns used for fitting
    pub data: PathBuf,

    #[arg(long)]
    pub model: PathBuf,

    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a regularized generalized linear model and save it as TOML
    Fit(FitArgs),
    /// Apply a saved model to new data
    Predict(PredictArgs),
}

#[derive(Parser)]
#[command(name = "chunkglm", version, about = "Partition-parallel GLM solvers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

fn regularizer_from(args: &FitArgs) -> Regularizer {
    let penalty = match args.penalty {
        PenaltyCli::None => Penalty::None,
        PenaltyCli::L1 => Penalty::L1,
        PenaltyCli::L2 => Penalty::L2,
        PenaltyCli::ElasticNet => Penalty::ElasticNet {
            l1_ratio: args.l1_ratio,
        },
    };
    Regularizer {
        penalty,
        lambda: args.lambda,
    }
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_csv(&args.training_data, Some(&args.target))?;
    let y = dataset
        .y
        .ok_or_else(|| format!("column '{}' produced no responses", args.target))?;

    let solver_config = match &args.config {
        Some(path) => SolverConfig::from_toml_file(path)?,
        None => SolverConfig::default(),
    };

    let estimator = GlmEstimator::new(args.family.into())
        .with_solver(args.solver.into())
        .with_regularizer(regularizer_from(&args))
        .with_intercept(!args.no_intercept)
        .with_normalize(!args.no_normalize)
        .with_partitions(args.partitions)
        .with_execution(if args.sequential {
            Execution::Sequential
        } else {
            Execution::Parallel
        })
        .with_solver_config(solver_config);

    let mut model = estimator.fit(dataset.x.view(), y.view())?;
    model.feature_names = dataset.feature_names;

    println!(
        "{} finished with status {:?} after {} iterations (objective {:.6e}).",
        model.summary.solver, model.summary.status, model.summary.iterations, model.summary.final_objective
    );
    println!("Training score: {:.6}", model.score(dataset.x.view(), y.view())?);
    for (name, coef) in model.feature_names.iter().zip(&model.coefficients) {
        println!("  {name:<24} {coef:>14.6}");
    }
    if model.fit_intercept {
        println!("  {:<24} {:>14.6}", "(intercept)", model.intercept);
    }

    model.save(&args.output)?;
    println!("Model saved to {}", args.output.display());
    Ok(())
}

fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = FittedModel::load(&args.model)?;
    let dataset = load_csv(&args.data, None)?;
    if !model.feature_names.is_empty() && model.feature_names != dataset.feature_names {
        return Err(format!(
            "feature columns {:?} do not match the model's {:?}",
            dataset.feature_names, model.feature_names
        )
        .into());
    }

    let mean = model.predict_mean(dataset.x.view())?;
    let labels = model.predict(dataset.x.view())?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&args.output)?;
    writer.write_record(["row", "mean", "prediction"])?;
    for (i, (m, p)) in mean.iter().zip(labels.iter()).enumerate() {
        writer.write_record([(i + 1).to_string(), m.to_string(), p.to_string()])?;
    }
    writer.flush()?;
    println!("Wrote {} predictions to {}", mean.len(), args.output.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Predict(args)) => predict(args),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
