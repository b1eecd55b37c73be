use crate::family::Family;
use crate::partition::{Execution, PartitionedData};
use crate::regularizer::Regularizer;
use crate::types::SolverError;
use ndarray::Array1;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cooperative cancellation flag, checked by every solver between outer iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a solver needs besides its own tuning knobs.
pub struct Problem<'a, F: Family + ?Sized> {
    pub family: &'a F,
    pub data: &'a PartitionedData,
    pub regularizer: Regularizer,
    pub warm_start: Option<Array1<f64>>,
    pub execution: Execution,
    pub cancellation: Option<CancellationToken>,
}

impl<'a, F: Family + ?Sized> Problem<'a, F> {
    pub fn new(family: &'a F, data: &'a PartitionedData) -> Self {
        Self {
            family,
            data,
            regularizer: Regularizer::none(),
            warm_start: None,
            execution: Execution::default(),
            cancellation: None,
        }
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self
    }

    pub fn with_warm_start(mut self, beta: Array1<f64>) -> Self {
        self.warm_start = Some(beta);
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn n_features(&self) -> usize {
        self.data.n_features()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Eager checks shared by every solver, run before the first iteration.
    pub fn validate(&self) -> Result<(), SolverError> {
        self.regularizer.validate()?;
        for (index, y) in self.data.responses().enumerate() {
            self.family.validate_response(y).map_err(|reason| {
                SolverError::InvalidConfiguration(format!("partition {index}: {reason}"))
            })?;
        }
        if let Some(beta) = &self.warm_start {
            if beta.len() != self.n_features() {
                return Err(SolverError::InvalidConfiguration(format!(
                    "warm start has {} coefficients but X has {} columns",
                    beta.len(),
                    self.n_features()
                )));
            }
            if beta.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::InvalidConfiguration(
                    "warm start contains non-finite coefficients".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The warm start, or zeros.
    pub fn initial_beta(&self) -> Array1<f64> {
        self.warm_start
            .clone()
            .unwrap_or_else(|| Array1::zeros(self.n_features()))
    }
}

/// Rejects tolerances that are not strictly positive.
pub(crate) fn check_positive(name: &str, value: f64) -> Result<(), SolverError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SolverError::InvalidConfiguration(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}
