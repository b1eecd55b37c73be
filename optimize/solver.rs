//! Solver selection and the TOML-loadable configuration shared by every algorithm.

use crate::admm::{AdmmConfig, admm};
use crate::bfgs::{BfgsConfig, bfgs};
use crate::family::Family;
use crate::gradient::{GradientDescentConfig, gradient_descent};
use crate::newton::{NewtonConfig, newton};
use crate::problem::Problem;
use crate::proximal::{ProximalGradientConfig, proximal_gradient};
use crate::types::{OptimizationResult, SolverError, SolverKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Solver {
    GradientDescent,
    Newton,
    ProximalGradient,
    #[default]
    Admm,
    Bfgs,
}

impl Solver {
    pub fn kind(self) -> SolverKind {
        match self {
            Solver::GradientDescent => SolverKind::GradientDescent,
            Solver::Newton => SolverKind::Newton,
            Solver::ProximalGradient => SolverKind::ProximalGradient,
            Solver::Admm => SolverKind::Admm,
            Solver::Bfgs => SolverKind::Bfgs,
        }
    }

    /// True for the algorithms that honor the problem's regularizer.
    pub fn supports_regularization(self) -> bool {
        !matches!(self, Solver::GradientDescent | Solver::Newton)
    }

    pub fn run<F: Family + ?Sized>(
        self,
        problem: &Problem<'_, F>,
        config: &SolverConfig,
    ) -> Result<OptimizationResult, SolverError> {
        if !self.supports_regularization() && !problem.regularizer.is_inactive() {
            log::warn!(
                "{} does not apply regularization; the {:?} penalty is ignored.",
                self.kind(),
                problem.regularizer.penalty
            );
        }
        match self {
            Solver::GradientDescent => gradient_descent(problem, &config.gradient_descent),
            Solver::Newton => newton(problem, &config.newton),
            Solver::ProximalGradient => proximal_gradient(problem, &config.proximal_gradient),
            Solver::Admm => admm(problem, &config.admm),
            Solver::Bfgs => bfgs(problem, &config.bfgs),
        }
    }
}

/// Per-algorithm settings. Missing tables and keys fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub gradient_descent: GradientDescentConfig,
    pub newton: NewtonConfig,
    pub proximal_gradient: ProximalGradientConfig,
    pub admm: AdmmConfig,
    pub bfgs: BfgsConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read solver configuration: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse solver configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] SolverError),
}

impl SolverConfig {
    /// Parses a TOML document and validates every section.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SolverConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        self.gradient_descent.validate()?;
        self.newton.validate()?;
        self.proximal_gradient.validate()?;
        self.admm.validate()?;
        self.bfgs.validate()
    }
}
