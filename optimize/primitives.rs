//! Aggregate loss, gradient and Hessian over a partitioned dataset.
//!
//! Each function computes a partial result per partition, checks it for
//! non-finite values, and sums the partials in partition order.

use crate::family::{Family, weighted_gram};
use crate::partition::{Execution, Partition, PartitionedData};
use crate::types::SolverError;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::{Factorize, ReciprocalConditionNum, Solve};
use std::ops::AddAssign;

/// Loss and gradient accumulated together so each partition computes `X beta` once.
#[derive(Debug, Clone)]
pub struct LossGradient {
    pub loss: f64,
    pub gradient: Array1<f64>,
}

impl<'a> AddAssign<&'a LossGradient> for LossGradient {
    fn add_assign(&mut self, other: &'a LossGradient) {
        self.loss += other.loss;
        self.gradient += &other.gradient;
    }
}

/// Gradient and Hessian accumulated together.
#[derive(Debug, Clone)]
pub struct GradientHessian {
    pub loss: f64,
    pub gradient: Array1<f64>,
    pub hessian: Array2<f64>,
}

impl<'a> AddAssign<&'a GradientHessian> for GradientHessian {
    fn add_assign(&mut self, other: &'a GradientHessian) {
        self.loss += other.loss;
        self.gradient += &other.gradient;
        self.hessian += &other.hessian;
    }
}

fn finite_scalar(value: f64, quantity: &'static str, partition: usize) -> Result<f64, SolverError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SolverError::NonFinite {
            quantity,
            partition,
        })
    }
}

fn finite_array<D: ndarray::Dimension>(
    value: ndarray::Array<f64, D>,
    quantity: &'static str,
    partition: usize,
) -> Result<ndarray::Array<f64, D>, SolverError> {
    if value.iter().all(|v| v.is_finite()) {
        Ok(value)
    } else {
        Err(SolverError::NonFinite {
            quantity,
            partition,
        })
    }
}

/// Loss contribution of a single partition.
pub fn partition_loss<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    beta: ArrayView1<f64>,
) -> Result<f64, SolverError> {
    finite_scalar(family.pointwise_loss(beta, part.x(), part.y()), "loss", index)
}

/// Loss and gradient contribution of a single partition.
pub fn partition_loss_gradient<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    beta: ArrayView1<f64>,
) -> Result<LossGradient, SolverError> {
    let eta = part.x().dot(&beta);
    let loss = finite_scalar(family.loss(eta.view(), part.y()), "loss", index)?;
    let residual = family.loss_derivative(eta.view(), part.y());
    let gradient = finite_array(part.x().t().dot(&residual), "gradient", index)?;
    Ok(LossGradient { loss, gradient })
}

/// Loss, gradient and Hessian contribution of a single partition.
pub fn partition_gradient_hessian<F: Family + ?Sized>(
    family: &F,
    index: usize,
    part: &Partition,
    beta: ArrayView1<f64>,
) -> Result<GradientHessian, SolverError> {
    let eta = part.x().dot(&beta);
    let loss = finite_scalar(family.loss(eta.view(), part.y()), "loss", index)?;
    let residual = family.loss_derivative(eta.view(), part.y());
    let gradient = finite_array(part.x().t().dot(&residual), "gradient", index)?;
    let weights = family.curvature(eta.view());
    let hessian = finite_array(weighted_gram(part.x(), weights.view()), "hessian", index)?;
    Ok(GradientHessian {
        loss,
        gradient,
        hessian,
    })
}

pub fn loss<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<f64, SolverError> {
    data.map_reduce(execution, |i, part| partition_loss(family, i, part, beta))
}

pub fn gradient<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<Array1<f64>, SolverError> {
    Ok(loss_and_gradient(family, data, beta, execution)?.gradient)
}

pub fn hessian<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<Array2<f64>, SolverError> {
    Ok(gradient_and_hessian(family, data, beta, execution)?.hessian)
}

pub fn loss_and_gradient<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<LossGradient, SolverError> {
    data.map_reduce(execution, |i, part| {
        partition_loss_gradient(family, i, part, beta)
    })
}

pub fn gradient_and_hessian<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<GradientHessian, SolverError> {
    data.map_reduce(execution, |i, part| {
        partition_gradient_hessian(family, i, part, beta)
    })
}

/// `X_i beta` for every partition, in partition order.
pub fn linear_predictors(
    data: &PartitionedData,
    beta: ArrayView1<f64>,
    execution: Execution,
) -> Result<Vec<Array1<f64>>, SolverError> {
    data.map_partitions(execution, |_, part| Ok(part.x().dot(&beta)))
}

/// Loss from cached per-partition linear predictors.
pub fn loss_from_predictors<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    etas: &[Array1<f64>],
    execution: Execution,
) -> Result<f64, SolverError> {
    data.map_reduce(execution, |i, part| {
        finite_scalar(family.loss(etas[i].view(), part.y()), "loss", i)
    })
}

/// Loss at a line-search candidate, or `None` when the candidate overflows.
///
/// An overflowing candidate is a rejected step, not a failed solve: callers
/// shrink the step and try again.
pub fn trial_loss<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    etas: &[Array1<f64>],
    execution: Execution,
) -> Result<Option<f64>, SolverError> {
    match loss_from_predictors(family, data, etas, execution) {
        Ok(value) => Ok(Some(value)),
        Err(SolverError::NonFinite { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Gradient from cached per-partition linear predictors.
pub fn gradient_from_predictors<F: Family + ?Sized>(
    family: &F,
    data: &PartitionedData,
    etas: &[Array1<f64>],
    execution: Execution,
) -> Result<Array1<f64>, SolverError> {
    data.map_reduce(execution, |i, part| {
        let residual = family.loss_derivative(etas[i].view(), part.y());
        finite_array(part.x().t().dot(&residual), "gradient", i)
    })
}

/// Solves `h * x = g` through an LU factorization, refusing singular or
/// ill-conditioned systems instead of returning non-finite values.
pub fn solve_symmetric_system(
    h: &Array2<f64>,
    g: &Array1<f64>,
    min_rcond: f64,
) -> Result<Array1<f64>, SolverError> {
    let lu = h
        .factorize()
        .map_err(|_| SolverError::SingularHessian { rcond: 0.0 })?;
    let rcond = lu.rcond()?;
    if !(rcond >= min_rcond) {
        return Err(SolverError::SingularHessian { rcond });
    }
    let step = lu.solve(g)?;
    if step.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::SingularHessian { rcond });
    }
    Ok(step)
}
