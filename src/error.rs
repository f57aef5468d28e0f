use core::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::TrialStatus;

/// Errors surfaced by campaign construction, persistence, and the controller.
///
/// Per-trial evaluation problems are **not** errors of this type: they are
/// recorded on the trial as an [`EvaluationFailure`] and never abort a
/// campaign.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a search space definition is malformed.
    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),

    /// Returned when a parameter set does not conform to the search space.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Returned when a campaign configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when the optimization engine fails.
    #[error(transparent)]
    Optimizer(#[from] OptimizerFailure),

    /// Returned when a checkpoint cannot be reconstructed.
    #[error("corrupt checkpoint at {}: {reason}", path.display())]
    CorruptCheckpoint {
        /// The checkpoint that failed to load.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Returned when a checkpoint was produced by an incompatible campaign definition.
    #[error("checkpoint schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Returned when another process holds the checkpoint directory lock.
    #[error("checkpoint directory {} is locked by another campaign", .0.display())]
    CheckpointLocked(PathBuf),

    /// Returned when the audit journal cannot be written or read.
    #[error("storage error: {0}")]
    Storage(String),

    /// Returned when a trial is moved through an illegal lifecycle transition.
    #[error("trial {trial_id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// The trial being transitioned.
        trial_id: u64,
        /// Its current status.
        from: TrialStatus,
        /// The requested status.
        to: TrialStatus,
    },

    /// Returned when a filesystem operation fails.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Failure raised by the optimization engine.
///
/// Retryable failures (e.g. a degenerate surrogate fit) are retried by the
/// adapter with growing jitter. Fatal failures abort the campaign.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptimizerFailure {
    /// The engine may succeed if asked again with perturbation.
    #[error("retryable optimizer failure: {0}")]
    Retryable(String),
    /// The engine cannot continue.
    #[error("fatal optimizer failure: {0}")]
    Fatal(String),
}

impl OptimizerFailure {
    /// Returns `true` for the [`Retryable`](Self::Retryable) variant.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Why an evaluation attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend process or task crashed.
    Crash,
    /// The attempt exceeded the per-trial timeout.
    Timeout,
    /// A transient filesystem or process-spawn error.
    TransientIo,
    /// The backend rejected the parameters as structurally invalid.
    InvalidParameters,
    /// The backend returned NaN or an infinite objective.
    NonFiniteObjective,
    /// The objective could not be extracted from the results artifact.
    Extraction,
    /// Any other permanent failure.
    Other,
}

impl FailureKind {
    /// Returns `true` if a failure of this kind is worth retrying.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Crash | Self::Timeout | Self::TransientIo)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Crash => "crash",
            Self::Timeout => "timeout",
            Self::TransientIo => "transient i/o",
            Self::InvalidParameters => "invalid parameters",
            Self::NonFiniteObjective => "non-finite objective",
            Self::Extraction => "extraction",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Structured reason for a failed evaluation attempt, stored on the trial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EvaluationFailure {
    /// Classification driving the retry decision.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl EvaluationFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A transient failure: backend crash.
    #[must_use]
    pub fn crash(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Crash, message)
    }

    /// A transient failure: transient I/O.
    #[must_use]
    pub fn transient_io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientIo, message)
    }

    /// A permanent failure: parameters rejected by the backend.
    #[must_use]
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidParameters, message)
    }

    pub(crate) fn timeout(limit: core::time::Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("attempt exceeded {:.3}s", limit.as_secs_f64()),
        )
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
