//! Simulation backends: the code that actually evaluates a design.
//!
//! A [`Backend`] turns an [`EvaluationRequest`] into an objective value or
//! an [`EvaluationFailure`]. Closures returning a future implement the trait
//! directly, which is how tests and in-process models are usually wired:
//!
//! ```
//! use sledo::backend::{Backend, EvaluationRequest};
//! use sledo::EvaluationFailure;
//!
//! let backend = |request: EvaluationRequest| async move {
//!     let x = request.parameters["x"].as_f64().unwrap_or_default();
//!     Ok::<_, EvaluationFailure>((x - 3.0).powi(2))
//! };
//! # fn assert_backend(_: &impl Backend) {}
//! # assert_backend(&backend);
//! ```
//!
//! For external solvers, [`CommandBackend`] renders an input deck with
//! [`InputTemplate`], runs the solver as a child process and reads the
//! objective back with an [`Extractor`].
//!
//! Failures carry a [`FailureKind`](crate::FailureKind): crashes, timeouts
//! and transient I/O errors are retried by the dispatcher, everything else
//! is final.

mod command;
mod extract;
mod template;
pub mod test_functions;

use core::future::Future;

pub use command::CommandBackend;
pub use extract::{CsvColumn, Extractor};
pub use template::InputTemplate;

use crate::error::EvaluationFailure;
use crate::space::ParamSet;

/// One evaluation attempt of one trial.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationRequest {
    pub trial_id: u64,
    /// 1-based attempt number; greater than 1 on retries.
    pub attempt: u32,
    pub parameters: ParamSet,
}

/// Evaluates designs.
///
/// Implementations must be safe to call concurrently from several tasks:
/// the dispatcher runs up to `concurrency` evaluations at once against the
/// same backend.
pub trait Backend: Send + Sync + 'static {
    /// Runs one evaluation attempt.
    ///
    /// The returned future may be dropped before completion when the attempt
    /// times out or the campaign shuts down; implementations holding
    /// external resources should release them on drop.
    fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> impl Future<Output = Result<f64, EvaluationFailure>> + Send;
}

impl<F, Fut> Backend for F
where
    F: Fn(EvaluationRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<f64, EvaluationFailure>> + Send,
{
    fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> impl Future<Output = Result<f64, EvaluationFailure>> + Send {
        self(request)
    }
}
