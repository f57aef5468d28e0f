#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]

//! Orchestration core for simulation-driven design optimization.
//!
//! A campaign pairs an optimizer that proposes parameter sets with a
//! simulation backend that scores them. `sledo` runs the loop between the
//! two: it asks the optimizer for candidates, dispatches them to the
//! backend under a concurrency bound, retries transient failures, tells
//! the optimizer every outcome, checkpoints progress, and stops when a
//! budget or convergence condition is met. A campaign interrupted at any
//! point resumes from its last checkpoint without re-running finished
//! trials.
//!
//! # Getting Started
//!
//! ```
//! use sledo::backend::EvaluationRequest;
//! use sledo::optimizer::CompassEngine;
//! use sledo::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sledo::Result<()> {
//! let space = SearchSpace::builder()
//!     .float("x", -5.0, 5.0)
//!     .float("y", -5.0, 5.0)
//!     .build()?;
//! let config = CampaignConfig::builder("bowl", space)
//!     .concurrency(2)
//!     .max_trials(40)
//!     .target(1e-3)
//!     .build()?;
//!
//! let backend = |req: EvaluationRequest| async move {
//!     let x = req.parameters["x"].as_f64().unwrap_or_default();
//!     let y = req.parameters["y"].as_f64().unwrap_or_default();
//!     Ok::<_, EvaluationFailure>(x * x + y * y)
//! };
//!
//! let outcome = CampaignController::new(config, CompassEngine::new(), backend)?
//!     .run()
//!     .await?;
//! println!("{:?}: best {:?}", outcome.state, outcome.best.map(|t| t.objective));
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`SearchSpace`](space::SearchSpace) | Named, bounded parameters a campaign explores. |
//! | [`Trial`] | One evaluation of one parameter set, with its lifecycle and retry history. |
//! | [`OptimizerAdapter`](optimizer::OptimizerAdapter) | Wraps an [`Engine`](optimizer::Engine) behind ask/tell with validation, deduplication and failure handling. |
//! | [`Backend`](backend::Backend) | Evaluates a parameter set; [`CommandBackend`](backend::CommandBackend) runs an external solver. |
//! | [`SimulationDispatcher`](dispatch::SimulationDispatcher) | Bounded concurrent execution with timeouts and retries. |
//! | [`CheckpointManager`](checkpoint::CheckpointManager) | Atomic snapshots for crash recovery and resume. |
//! | [`ConvergenceEvaluator`](convergence::ConvergenceEvaluator) | Trial budget, wall clock, target and plateau stopping rules. |
//! | [`CampaignController`] | The state machine tying everything together. |
//!
//! # Engines
//!
//! | Engine | Algorithm | Native resume |
//! |--------|-----------|---------------|
//! | [`RandomEngine`](optimizer::RandomEngine) | Uniform sampling (log-uniform for log floats) | seed |
//! | [`CompassEngine`](optimizer::CompassEngine) | Compass pattern search with step halving | full state |
//!
//! Engines without native state are rebuilt on resume by replaying the
//! finalized trials.
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `tracing` | Structured log events via [`tracing`](https://docs.rs/tracing) at campaign, trial and checkpoint lifecycle points | on |

/// Emit a `tracing::info!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_info {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::debug!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::warn!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}

pub mod backend;
mod campaign;
pub mod checkpoint;
mod config;
mod controller;
pub mod convergence;
pub mod dispatch;
mod error;
pub mod journal;
pub mod optimizer;
pub mod space;
mod trial;
mod types;

pub use campaign::{BestTrial, Campaign};
pub use config::{CampaignConfig, CampaignConfigBuilder};
pub use controller::{CampaignController, CampaignOutcome, ShutdownHandle};
pub use error::{Error, EvaluationFailure, FailureKind, OptimizerFailure, Result};
pub use trial::Trial;
pub use types::{CampaignState, Direction, StopReason, TrialStatus};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use sledo::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{Backend, CommandBackend, CsvColumn, EvaluationRequest, InputTemplate};
    pub use crate::campaign::{BestTrial, Campaign};
    pub use crate::checkpoint::CheckpointManager;
    pub use crate::config::{CampaignConfig, CampaignConfigBuilder};
    pub use crate::controller::{CampaignController, CampaignOutcome, ShutdownHandle};
    pub use crate::error::{Error, EvaluationFailure, FailureKind, OptimizerFailure, Result};
    pub use crate::journal::TrialJournal;
    pub use crate::optimizer::{CompassEngine, Engine, FailurePolicy, RandomEngine};
    pub use crate::space::{ParamSet, ParamValue, SearchSpace};
    pub use crate::trial::Trial;
    pub use crate::types::{CampaignState, Direction, StopReason, TrialStatus};
}
