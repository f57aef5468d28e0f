//! Analytic objectives for exercising a campaign without a solver.

use core::future::Future;
use std::sync::Arc;

use super::{Backend, EvaluationRequest};
use crate::error::{EvaluationFailure, FailureKind};
use crate::space::{ParamSet, ParamValue};

/// Evaluates a synchronous function of the parameters on the blocking pool.
///
/// # Examples
///
/// ```
/// use sledo::backend::test_functions::{FunctionBackend, three_hump_camel};
///
/// let backend = FunctionBackend::new(three_hump_camel);
/// # let _ = backend;
/// ```
pub struct FunctionBackend<F> {
    function: Arc<F>,
}

impl<F> FunctionBackend<F>
where
    F: Fn(&ParamSet) -> Result<f64, EvaluationFailure> + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(function: F) -> Self {
        Self {
            function: Arc::new(function),
        }
    }
}

impl<F> Backend for FunctionBackend<F>
where
    F: Fn(&ParamSet) -> Result<f64, EvaluationFailure> + Send + Sync + 'static,
{
    fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> impl Future<Output = Result<f64, EvaluationFailure>> + Send {
        let function = Arc::clone(&self.function);
        async move {
            tokio::task::spawn_blocking(move || function(&request.parameters))
                .await
                .map_err(|e| EvaluationFailure::crash(format!("objective panicked: {e}")))?
        }
    }
}

fn numeric(params: &ParamSet, name: &str) -> Result<f64, EvaluationFailure> {
    params.get(name).and_then(ParamValue::as_f64).ok_or_else(|| {
        EvaluationFailure::new(
            FailureKind::InvalidParameters,
            format!("missing numeric parameter '{name}'"),
        )
    })
}

/// Sum of squares of every numeric parameter. Minimum `0` at the origin.
///
/// # Errors
///
/// Returns `InvalidParameters` if any parameter is categorical.
pub fn sphere(params: &ParamSet) -> Result<f64, EvaluationFailure> {
    params
        .keys()
        .map(|name| numeric(params, name).map(|v| v * v))
        .sum()
}

/// The three-hump camel function of `x1` and `x2`.
///
/// Global minimum `0` at the origin, two further local minima; the usual
/// domain is `[-5, 5]²`.
///
/// # Errors
///
/// Returns `InvalidParameters` if `x1` or `x2` is missing or categorical.
pub fn three_hump_camel(params: &ParamSet) -> Result<f64, EvaluationFailure> {
    let x = numeric(params, "x1")?;
    let y = numeric(params, "x2")?;
    Ok(2.0 * x.powi(2) - 1.05 * x.powi(4) + x.powi(6) / 6.0 + x * y + y.powi(2))
}
