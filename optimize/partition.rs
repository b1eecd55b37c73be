//! Row-partitioned design matrices and the map-then-reduce contract over them.
//!
//! A partition is a contiguous block of rows of `X` together with the matching
//! block of `y`. Solvers never look inside this module's storage: they request
//! a per-partition computation and receive the results in partition order, which
//! they then reduce. The reduction is a barrier, every partition must succeed
//! before anything is combined.

use crate::types::SolverError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// How per-partition work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Execution {
    Sequential,
    /// One rayon task per partition.
    #[default]
    Parallel,
}

/// One block of rows.
#[derive(Debug, Clone)]
pub struct Partition {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl Partition {
    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    pub fn n_rows(&self) -> usize {
        self.y.len()
    }
}

/// A feature matrix and label vector split along rows into aligned chunks.
#[derive(Debug, Clone)]
pub struct PartitionedData {
    partitions: Vec<Partition>,
    n_features: usize,
    n_rows: usize,
}

impl PartitionedData {
    /// Builds from pre-chunked blocks. Chunk `i` of `x` must have as many rows as chunk `i` of `y`.
    pub fn from_chunks(x: Vec<Array2<f64>>, y: Vec<Array1<f64>>) -> Result<Self, SolverError> {
        if x.len() != y.len() {
            return Err(SolverError::InvalidConfiguration(format!(
                "X has {} partitions but y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(SolverError::InvalidConfiguration(
                "at least one partition is required".to_string(),
            ));
        }
        let n_features = x[0].ncols();
        let mut partitions = Vec::with_capacity(x.len());
        let mut n_rows = 0;
        for (index, (xi, yi)) in x.into_iter().zip(y).enumerate() {
            if xi.nrows() != yi.len() {
                return Err(SolverError::InvalidConfiguration(format!(
                    "partition {index}: X has {} rows but y has {}",
                    xi.nrows(),
                    yi.len()
                )));
            }
            if xi.ncols() != n_features {
                return Err(SolverError::InvalidConfiguration(format!(
                    "partition {index}: X has {} columns, expected {n_features}",
                    xi.ncols()
                )));
            }
            if xi.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::InvalidConfiguration(format!(
                    "partition {index}: X contains non-finite values"
                )));
            }
            n_rows += yi.len();
            partitions.push(Partition { x: xi, y: yi });
        }
        if n_rows == 0 {
            return Err(SolverError::InvalidConfiguration(
                "the dataset has no rows".to_string(),
            ));
        }
        Ok(Self {
            partitions,
            n_features,
            n_rows,
        })
    }

    /// Splits `x`/`y` into `n_chunks` contiguous, order-preserving blocks of near-equal size.
    pub fn from_arrays(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        n_chunks: usize,
    ) -> Result<Self, SolverError> {
        if x.nrows() != y.len() {
            return Err(SolverError::InvalidConfiguration(format!(
                "X has {} rows but y has {}",
                x.nrows(),
                y.len()
            )));
        }
        if n_chunks == 0 || n_chunks > x.nrows().max(1) {
            return Err(SolverError::InvalidConfiguration(format!(
                "cannot split {} rows into {n_chunks} partitions",
                x.nrows()
            )));
        }
        let n = x.nrows();
        let base = n / n_chunks;
        let extra = n % n_chunks;
        let mut xs = Vec::with_capacity(n_chunks);
        let mut ys = Vec::with_capacity(n_chunks);
        let mut start = 0;
        for i in 0..n_chunks {
            let len = base + usize::from(i < extra);
            xs.push(x.slice(s![start..start + len, ..]).to_owned());
            ys.push(y.slice(s![start..start + len]).to_owned());
            start += len;
        }
        Self::from_chunks(xs, ys)
    }

    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn responses(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.partitions.iter().map(Partition::y)
    }

    /// Runs `f` on every partition and returns the results in partition order.
    ///
    /// The first error aborts the round; no partial result is ever returned.
    pub fn map_partitions<T, F>(&self, execution: Execution, f: F) -> Result<Vec<T>, SolverError>
    where
        T: Send,
        F: Fn(usize, &Partition) -> Result<T, SolverError> + Sync + Send,
    {
        match execution {
            Execution::Sequential => self
                .partitions
                .iter()
                .enumerate()
                .map(|(i, part)| f(i, part))
                .collect(),
            Execution::Parallel => self
                .partitions
                .par_iter()
                .enumerate()
                .map(|(i, part)| f(i, part))
                .collect(),
        }
    }

    /// Maps over partitions, then folds the results together in partition order.
    pub fn map_reduce<T, F>(&self, execution: Execution, f: F) -> Result<T, SolverError>
    where
        T: Send + for<'a> AddAssign<&'a T>,
        F: Fn(usize, &Partition) -> Result<T, SolverError> + Sync + Send,
    {
        let mut pieces = self.map_partitions(execution, f)?.into_iter();
        // from_chunks guarantees at least one partition
        let mut total = match pieces.next() {
            Some(first) => first,
            None => {
                return Err(SolverError::InvalidConfiguration(
                    "at least one partition is required".to_string(),
                ));
            }
        };
        for piece in pieces {
            total += &piece;
        }
        Ok(total)
    }
}
