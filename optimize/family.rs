//! Exponential-family losses and the pointwise primitives the solvers consume.
//!
//! Every family is described by its negative log-likelihood as a function of the
//! linear predictor `eta = X beta`. The solvers only ever see the provided
//! `pointwise_*` methods, so a new family needs nothing beyond the four
//! per-row quantities below.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + exp(z))` without overflow for large positive `z`.
#[inline]
pub fn log1p_exp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// The capability interface every solver depends on.
pub trait Family: Send + Sync {
    fn name(&self) -> &'static str;

    /// Negative log-likelihood summed over the rows of one partition.
    fn loss(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> f64;

    /// Derivative of the per-row loss with respect to `eta`.
    fn loss_derivative(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64>;

    /// Second derivative of the per-row loss with respect to `eta`.
    fn curvature(&self, eta: ArrayView1<f64>) -> Array1<f64>;

    /// Inverse link: the fitted mean for a linear predictor.
    fn mean(&self, eta: f64) -> f64;

    /// Rejects responses outside the family's support.
    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), String>;

    fn pointwise_loss(&self, beta: ArrayView1<f64>, x: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
        let eta = x.dot(&beta);
        self.loss(eta.view(), y)
    }

    fn pointwise_gradient(
        &self,
        beta: ArrayView1<f64>,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Array1<f64> {
        let eta = x.dot(&beta);
        x.t().dot(&self.loss_derivative(eta.view(), y))
    }

    fn pointwise_hessian(
        &self,
        beta: ArrayView1<f64>,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Array2<f64> {
        debug_assert_eq!(x.nrows(), y.len());
        let eta = x.dot(&beta);
        weighted_gram(x, self.curvature(eta.view()).view())
    }
}

/// `X^T diag(w) X`.
pub fn weighted_gram(x: ArrayView2<f64>, w: ArrayView1<f64>) -> Array2<f64> {
    let xw = &x * &w.insert_axis(Axis(1));
    xw.t().dot(&x)
}

/// Binary outcomes with the logit link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logistic;

impl Family for Logistic {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn loss(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        Zip::from(&eta)
            .and(&y)
            .fold(0.0, |acc, &e, &yi| acc + log1p_exp(e) - yi * e)
    }

    fn loss_derivative(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        Zip::from(&eta)
            .and(&y)
            .map_collect(|&e, &yi| sigmoid(e) - yi)
    }

    fn curvature(&self, eta: ArrayView1<f64>) -> Array1<f64> {
        eta.mapv(|e| {
            let p = sigmoid(e);
            p * (1.0 - p)
        })
    }

    fn mean(&self, eta: f64) -> f64 {
        sigmoid(eta)
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), String> {
        match y.iter().find(|&&v| v != 0.0 && v != 1.0) {
            Some(v) => Err(format!(
                "logistic regression requires 0/1 labels, found {v}"
            )),
            None => Ok(()),
        }
    }
}

/// Gaussian outcomes with the identity link; the loss is half the residual sum of squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

impl Family for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn loss(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        0.5 * Zip::from(&eta)
            .and(&y)
            .fold(0.0, |acc, &e, &yi| acc + (e - yi) * (e - yi))
    }

    fn loss_derivative(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        &eta - &y
    }

    fn curvature(&self, eta: ArrayView1<f64>) -> Array1<f64> {
        Array1::ones(eta.len())
    }

    fn mean(&self, eta: f64) -> f64 {
        eta
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), String> {
        if y.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err("responses must be finite".to_string())
        }
    }
}

/// Count outcomes with the log link. The `log(y!)` term is dropped from the loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct Poisson;

impl Family for Poisson {
    fn name(&self) -> &'static str {
        "poisson"
    }

    fn loss(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        Zip::from(&eta)
            .and(&y)
            .fold(0.0, |acc, &e, &yi| acc + e.exp() - yi * e)
    }

    fn loss_derivative(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        Zip::from(&eta)
            .and(&y)
            .map_collect(|&e, &yi| e.exp() - yi)
    }

    fn curvature(&self, eta: ArrayView1<f64>) -> Array1<f64> {
        eta.mapv(f64::exp)
    }

    fn mean(&self, eta: f64) -> f64 {
        eta.exp()
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), String> {
        match y.iter().find(|&&v| !(v.is_finite() && v >= 0.0)) {
            Some(v) => Err(format!(
                "poisson regression requires non-negative counts, found {v}"
            )),
            None => Ok(()),
        }
    }
}

/// The built-in families, selectable from configuration files and the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyKind {
    #[default]
    Logistic,
    Normal,
    Poisson,
}

impl FamilyKind {
    fn as_family(&self) -> &'static dyn Family {
        match self {
            FamilyKind::Logistic => &Logistic,
            FamilyKind::Normal => &Normal,
            FamilyKind::Poisson => &Poisson,
        }
    }
}

impl Family for FamilyKind {
    fn name(&self) -> &'static str {
        self.as_family().name()
    }

    fn loss(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        self.as_family().loss(eta, y)
    }

    fn loss_derivative(&self, eta: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
        self.as_family().loss_derivative(eta, y)
    }

    fn curvature(&self, eta: ArrayView1<f64>) -> Array1<f64> {
        self.as_family().curvature(eta)
    }

    fn mean(&self, eta: f64) -> f64 {
        self.as_family().mean(eta)
    }

    fn validate_response(&self, y: ArrayView1<f64>) -> Result<(), String> {
        self.as_family().validate_response(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn log1p_exp_matches_naive_form_where_it_is_safe() {
        for &z in &[-30.0, -2.5, 0.0, 1.0, 15.0] {
            let naive = (1.0 + f64::exp(z)).ln();
            assert!((log1p_exp(z) - naive).abs() < 1e-12, "z = {z}");
        }
        assert!((log1p_exp(800.0) - 800.0).abs() < 1e-12);
        assert!(log1p_exp(-800.0) >= 0.0);
    }

    #[test]
    fn logistic_loss_is_finite_for_huge_linear_predictors() {
        let x = arr2(&[[1.0, 500.0], [1.0, -500.0]]);
        let y = arr1(&[0.0, 1.0]);
        let beta = arr1(&[0.0, 3.0]);
        let loss = Logistic.pointwise_loss(beta.view(), x.view(), y.view());
        assert!(loss.is_finite());
        assert!((loss - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn logistic_gradient_matches_finite_differences() {
        let x = arr2(&[[1.0, 0.3], [1.0, -1.2], [1.0, 2.0], [1.0, 0.1]]);
        let y = arr1(&[1.0, 0.0, 1.0, 0.0]);
        let beta = arr1(&[0.2, -0.4]);
        let grad = Logistic.pointwise_gradient(beta.view(), x.view(), y.view());
        let h = 1e-6;
        for j in 0..beta.len() {
            let mut plus = beta.clone();
            plus[j] += h;
            let mut minus = beta.clone();
            minus[j] -= h;
            let fd = (Logistic.pointwise_loss(plus.view(), x.view(), y.view())
                - Logistic.pointwise_loss(minus.view(), x.view(), y.view()))
                / (2.0 * h);
            assert!((fd - grad[j]).abs() < 1e-6, "component {j}: {fd} vs {}", grad[j]);
        }
    }

    #[test]
    fn hessian_is_symmetric_and_matches_gradient_differences() {
        let x = arr2(&[[1.0, 0.3, -0.7], [1.0, -1.2, 0.4], [1.0, 2.0, 1.1], [1.0, 0.1, -0.2]]);
        let y = arr1(&[2.0, 0.0, 5.0, 1.0]);
        let beta = arr1(&[0.1, 0.2, -0.3]);
        let hess = Poisson.pointwise_hessian(beta.view(), x.view(), y.view());
        let h = 1e-6;
        for j in 0..3 {
            let mut plus = beta.clone();
            plus[j] += h;
            let mut minus = beta.clone();
            minus[j] -= h;
            let column = (Poisson.pointwise_gradient(plus.view(), x.view(), y.view())
                - Poisson.pointwise_gradient(minus.view(), x.view(), y.view()))
                / (2.0 * h);
            for i in 0..3 {
                assert!((hess[[i, j]] - hess[[j, i]]).abs() < 1e-12);
                assert!((hess[[i, j]] - column[i]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn normal_family_gradient_is_least_squares_residual() {
        let x = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let y = arr1(&[1.0, 1.0]);
        let beta = arr1(&[0.0, 0.0]);
        let grad = Normal.pointwise_gradient(beta.view(), x.view(), y.view());
        assert_eq!(grad, arr1(&[-4.0, -6.0]));
        assert_eq!(Normal.pointwise_loss(beta.view(), x.view(), y.view()), 1.0);
    }

    #[test]
    fn responses_are_checked_against_family_support() {
        assert!(Logistic.validate_response(arr1(&[0.0, 1.0, 1.0]).view()).is_ok());
        assert!(Logistic.validate_response(arr1(&[0.0, 0.5]).view()).is_err());
        assert!(Poisson.validate_response(arr1(&[0.0, 3.0]).view()).is_ok());
        assert!(Poisson.validate_response(arr1(&[-1.0]).view()).is_err());
        assert!(FamilyKind::Normal.validate_response(arr1(&[f64::NAN]).view()).is_err());
    }
}
