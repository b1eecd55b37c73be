//! Penalties on the coefficient vector and their proximal operators.

use crate::types::SolverError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// The shape of the penalty. The strength lives on [`Regularizer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Penalty {
    #[default]
    None,
    /// `||beta||_1`
    L1,
    /// `0.5 * ||beta||^2`
    L2,
    /// `l1_ratio * ||beta||_1 + (1 - l1_ratio) * 0.5 * ||beta||^2`
    ElasticNet { l1_ratio: f64 },
}

/// A penalty together with its non-negative strength `lambda`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Regularizer {
    #[serde(default)]
    pub penalty: Penalty,
    #[serde(default)]
    pub lambda: f64,
}

/// Elementwise soft-thresholding: `sign(v) * max(|v| - t, 0)`.
#[inline]
pub fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

impl Regularizer {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn l1(lambda: f64) -> Self {
        Self {
            penalty: Penalty::L1,
            lambda,
        }
    }

    pub fn l2(lambda: f64) -> Self {
        Self {
            penalty: Penalty::L2,
            lambda,
        }
    }

    pub fn elastic_net(lambda: f64, l1_ratio: f64) -> Self {
        Self {
            penalty: Penalty::ElasticNet { l1_ratio },
            lambda,
        }
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(SolverError::InvalidConfiguration(format!(
                "regularization strength must be a non-negative number, got {}",
                self.lambda
            )));
        }
        if let Penalty::ElasticNet { l1_ratio } = self.penalty {
            if !(0.0..=1.0).contains(&l1_ratio) {
                return Err(SolverError::InvalidConfiguration(format!(
                    "elastic-net l1_ratio must lie in [0, 1], got {l1_ratio}"
                )));
            }
        }
        Ok(())
    }

    /// True when the penalty contributes nothing to the objective.
    pub fn is_inactive(&self) -> bool {
        self.penalty == Penalty::None || self.lambda == 0.0
    }

    /// True when the penalty is differentiable everywhere.
    pub fn is_smooth(&self) -> bool {
        match self.penalty {
            Penalty::None | Penalty::L2 => true,
            Penalty::L1 => self.lambda == 0.0,
            Penalty::ElasticNet { l1_ratio } => l1_ratio == 0.0 || self.lambda == 0.0,
        }
    }

    /// `lambda * r(beta)`.
    pub fn value(&self, beta: ArrayView1<f64>) -> f64 {
        let l1 = || beta.iter().map(|b| b.abs()).sum::<f64>();
        let l2 = || 0.5 * beta.dot(&beta);
        let raw = match self.penalty {
            Penalty::None => 0.0,
            Penalty::L1 => l1(),
            Penalty::L2 => l2(),
            Penalty::ElasticNet { l1_ratio } => l1_ratio * l1() + (1.0 - l1_ratio) * l2(),
        };
        self.lambda * raw
    }

    /// Gradient of `lambda * r(beta)` for the smooth penalties. For L1 terms the
    /// subgradient `sign(beta)` is used, which is zero at the origin.
    pub fn gradient(&self, beta: ArrayView1<f64>) -> Array1<f64> {
        let sign = |b: f64| if b == 0.0 { 0.0 } else { b.signum() };
        match self.penalty {
            Penalty::None => Array1::zeros(beta.len()),
            Penalty::L1 => beta.mapv(|b| self.lambda * sign(b)),
            Penalty::L2 => beta.mapv(|b| self.lambda * b),
            Penalty::ElasticNet { l1_ratio } => {
                beta.mapv(|b| self.lambda * (l1_ratio * sign(b) + (1.0 - l1_ratio) * b))
            }
        }
    }

    /// Proximal operator of `t * r`, where `t` already includes the strength
    /// and the step size (callers pass `step * lambda`).
    pub fn proximal_operator(&self, v: ArrayView1<f64>, t: f64) -> Array1<f64> {
        match self.penalty {
            Penalty::None => v.to_owned(),
            Penalty::L1 => v.mapv(|vj| soft_threshold(vj, t)),
            Penalty::L2 => v.mapv(|vj| vj / (1.0 + t)),
            Penalty::ElasticNet { l1_ratio } => {
                let shrink = 1.0 + (1.0 - l1_ratio) * t;
                v.mapv(|vj| soft_threshold(vj, l1_ratio * t) / shrink)
            }
        }
    }
}

/// Largest violation of the lasso optimality conditions.
///
/// `grad` is the gradient of the smooth loss only. For `beta_j == 0` the
/// component must lie in `[-lambda, lambda]`; otherwise it must equal
/// `-lambda * sign(beta_j)`.
pub fn kkt_violation(grad: ArrayView1<f64>, beta: ArrayView1<f64>, lambda: f64) -> f64 {
    grad.iter()
        .zip(beta.iter())
        .map(|(&g, &b)| {
            if b == 0.0 {
                (g.abs() - lambda).max(0.0)
            } else {
                (g + lambda * b.signum()).abs()
            }
        })
        .fold(0.0, f64::max)
}
