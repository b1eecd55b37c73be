//! Ready-made regression estimators on top of the partitioned solvers.
//!
//! An estimator owns the modelling choices (family, penalty, intercept,
//! column scaling, partitioning) and turns a plain `(X, y)` pair into a
//! [`FittedModel`]. The fitted model works on the original feature scale and
//! can be written to and read back from a human-readable TOML file.

use crate::family::{Family, FamilyKind};
use crate::partition::{Execution, PartitionedData};
use crate::problem::Problem;
use crate::regularizer::Regularizer;
use crate::solver::{Solver, SolverConfig};
use crate::types::{SolverError, SolverKind, Status};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error("Scoring needs one response per row: got {found} responses for {expected} rows.")]
    MismatchedResponseCount { found: usize, expected: usize },
    #[error("Model fitting failed: {0}")]
    Solver(#[from] SolverError),
}

/// Settings for fitting one generalized linear model.
#[derive(Debug, Clone)]
pub struct GlmEstimator {
    pub family: FamilyKind,
    pub solver: Solver,
    pub regularizer: Regularizer,
    pub fit_intercept: bool,
    /// Standardize columns before solving and map the coefficients back afterwards.
    pub normalize: bool,
    pub n_partitions: usize,
    pub execution: Execution,
    pub solver_config: SolverConfig,
}

impl GlmEstimator {
    /// ADMM with a unit ridge penalty, an intercept and column standardization.
    pub fn new(family: FamilyKind) -> Self {
        Self {
            family,
            solver: Solver::Admm,
            regularizer: Regularizer::l2(1.0),
            fit_intercept: true,
            normalize: true,
            n_partitions: 1,
            execution: Execution::default(),
            solver_config: SolverConfig::default(),
        }
    }

    pub fn logistic_regression() -> Self {
        Self::new(FamilyKind::Logistic)
    }

    pub fn linear_regression() -> Self {
        Self::new(FamilyKind::Normal)
    }

    pub fn poisson_regression() -> Self {
        Self::new(FamilyKind::Poisson)
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self
    }

    pub fn with_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_partitions(mut self, n_partitions: usize) -> Self {
        self.n_partitions = n_partitions;
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_solver_config(mut self, config: SolverConfig) -> Self {
        self.solver_config = config;
        self
    }

    /// Fits the model. The intercept, when requested, is the trailing design column.
    pub fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<FittedModel, ModelError> {
        let n_features = x.ncols();
        let design = if self.fit_intercept {
            let ones = Array2::<f64>::ones((x.nrows(), 1));
            concatenate(Axis(1), &[x.view(), ones.view()]).map_err(|e| {
                SolverError::InvalidConfiguration(format!("cannot append intercept column: {e}"))
            })?
        } else {
            x.to_owned()
        };

        let scaling = self
            .normalize
            .then(|| ColumnScaling::fit(design.view(), self.fit_intercept, n_features));
        let design = match &scaling {
            Some(scaling) => scaling.apply(design),
            None => design,
        };

        let data = PartitionedData::from_arrays(design.view(), y, self.n_partitions)?;
        let problem = Problem::new(&self.family, &data)
            .with_regularizer(self.regularizer)
            .with_execution(self.execution);
        log::info!(
            "Fitting {} regression with {} on {} rows in {} partitions.",
            self.family.name(),
            self.solver.kind(),
            data.n_rows(),
            data.n_partitions()
        );
        let result = self.solver.run(&problem, &self.solver_config)?;

        let beta = match &scaling {
            Some(scaling) => scaling.restore(result.beta.view()),
            None => result.beta.clone(),
        };
        let (coefficients, intercept) = if self.fit_intercept {
            (beta.slice(ndarray::s![..n_features]).to_vec(), beta[n_features])
        } else {
            (beta.to_vec(), 0.0)
        };

        Ok(FittedModel {
            family: self.family,
            coefficients,
            intercept,
            fit_intercept: self.fit_intercept,
            feature_names: Vec::new(),
            summary: FitSummary {
                solver: result.solver,
                status: result.status,
                iterations: result.iterations,
                final_objective: result.final_objective,
            },
        })
    }
}

/// Per-column centering and scaling of the design matrix.
///
/// Columns with zero spread, the intercept among them, are left untouched.
/// Centering is only applied when an intercept exists to absorb it.
struct ColumnScaling {
    mean: Array1<f64>,
    std: Array1<f64>,
    intercept: Option<usize>,
}

impl ColumnScaling {
    fn fit(x: ArrayView2<f64>, fit_intercept: bool, intercept_index: usize) -> Self {
        let mut mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let mut std = x.std_axis(Axis(0), 0.0);
        for (m, s) in mean.iter_mut().zip(std.iter_mut()) {
            if !(*s > 0.0 && s.is_finite()) {
                *m = 0.0;
                *s = 1.0;
            }
        }
        if !fit_intercept {
            mean.fill(0.0);
        }
        Self {
            mean,
            std,
            intercept: fit_intercept.then_some(intercept_index),
        }
    }

    fn apply(&self, mut x: Array2<f64>) -> Array2<f64> {
        for (mut column, (&m, &s)) in x.axis_iter_mut(Axis(1)).zip(self.mean.iter().zip(&self.std)) {
            column.mapv_inplace(|v| (v - m) / s);
        }
        x
    }

    /// Maps coefficients fitted on scaled columns back to the original columns.
    fn restore(&self, beta: ArrayView1<f64>) -> Array1<f64> {
        let mut out = &beta / &self.std;
        if let Some(index) = self.intercept {
            let shift: f64 = out.iter().zip(&self.mean).map(|(b, m)| b * m).sum();
            out[index] -= shift;
        }
        out
    }
}

/// How the solver run behind a fitted model ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitSummary {
    pub solver: SolverKind,
    pub status: Status,
    pub iterations: usize,
    pub final_objective: f64,
}

/// Coefficients on the original feature scale plus what is needed to predict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FittedModel {
    pub family: FamilyKind,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub fit_intercept: bool,
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub summary: FitSummary,
}

impl FittedModel {
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Linear predictor `X beta + intercept`.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: self.n_features(),
            });
        }
        let beta = ArrayView1::from(&self.coefficients[..]);
        Ok(x.dot(&beta) + self.intercept)
    }

    /// Fitted means: probabilities for the logistic family, rates for Poisson.
    pub fn predict_mean(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let family = self.family;
        Ok(self.decision_function(x)?.mapv(|eta| family.mean(eta)))
    }

    /// Class labels (threshold 0.5) for the logistic family, fitted means otherwise.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let mean = self.predict_mean(x)?;
        Ok(match self.family {
            FamilyKind::Logistic => mean.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }),
            FamilyKind::Normal | FamilyKind::Poisson => mean,
        })
    }

    /// Accuracy (logistic), R² (normal) or mean Poisson deviance (Poisson).
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, ModelError> {
        if y.len() != x.nrows() {
            return Err(ModelError::MismatchedResponseCount {
                found: y.len(),
                expected: x.nrows(),
            });
        }
        let n = y.len().max(1) as f64;
        let score = match self.family {
            FamilyKind::Logistic => {
                let labels = self.predict(x)?;
                labels
                    .iter()
                    .zip(y.iter())
                    .filter(|(a, b)| a == b)
                    .count() as f64
                    / n
            }
            FamilyKind::Normal => {
                let fitted = self.predict(x)?;
                let y_mean = y.mean().unwrap_or(0.0);
                let ss_res: f64 = fitted.iter().zip(y.iter()).map(|(f, t)| (t - f).powi(2)).sum();
                let ss_tot: f64 = y.iter().map(|t| (t - y_mean).powi(2)).sum();
                if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 }
            }
            FamilyKind::Poisson => {
                let mu = self.predict_mean(x)?;
                let deviance: f64 = mu
                    .iter()
                    .zip(y.iter())
                    .map(|(&m, &t)| {
                        let log_term = if t > 0.0 { t * (t / m).ln() } else { 0.0 };
                        2.0 * (log_term - (t - m))
                    })
                    .sum();
                deviance / n
            }
        };
        Ok(score)
    }

    /// Saves the model to a file in TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}
