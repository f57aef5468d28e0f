//! Trial records and their lifecycle transitions.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Error, EvaluationFailure, Result};
use crate::space::ParamSet;
use crate::types::TrialStatus;

/// One candidate design and its outcome.
///
/// A trial progresses `Pending -> Running -> Completed | Failed`, or ends
/// `Cancelled` when the campaign shuts down. Transitions are checked: an
/// illegal move returns [`Error::InvalidTransition`] and leaves the record
/// untouched.
///
/// # Examples
///
/// ```
/// use sledo::space::{ParamSet, ParamValue};
/// use sledo::{Trial, TrialStatus};
///
/// let params = ParamSet::from([("x".to_string(), ParamValue::Float(1.5))]);
/// let mut trial = Trial::new(0, params);
/// trial.start().unwrap();
/// trial.complete(2.25).unwrap();
///
/// assert_eq!(trial.status, TrialStatus::Completed);
/// assert_eq!(trial.objective, Some(2.25));
/// assert_eq!(trial.attempt_count, 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Dense creation-order identifier, unique within the campaign.
    pub id: u64,
    pub parameters: ParamSet,
    pub status: TrialStatus,
    /// Present only when `Completed`.
    pub objective: Option<f64>,
    /// Present only when `Failed`.
    pub error: Option<EvaluationFailure>,
    /// Dispatch attempts made so far.
    pub attempt_count: u32,
    /// Transient failures that were retried, oldest first.
    #[serde(default)]
    pub retry_history: Vec<EvaluationFailure>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl Trial {
    /// Creates a `Pending` trial.
    #[must_use]
    pub fn new(id: u64, parameters: ParamSet) -> Self {
        Self {
            id,
            parameters,
            status: TrialStatus::Pending,
            objective: None,
            error: None,
            attempt_count: 0,
            retry_history: Vec::new(),
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, allowed: &[TrialStatus], to: TrialStatus) -> Result<()> {
        if allowed.contains(&self.status) {
            self.status = to;
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                trial_id: self.id,
                from: self.status,
                to,
            })
        }
    }

    /// `Pending -> Running`; counts the first attempt of this dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Pending`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[TrialStatus::Pending], TrialStatus::Running)?;
        self.attempt_count += 1;
        self.started_at = Some(SystemTime::now());
        Ok(())
    }

    /// Records a transient failure and counts another attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Running`.
    pub fn retry(&mut self, failure: EvaluationFailure) -> Result<()> {
        self.transition(&[TrialStatus::Running], TrialStatus::Running)?;
        self.retry_history.push(failure);
        self.attempt_count += 1;
        Ok(())
    }

    /// `Running -> Completed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Running`.
    pub fn complete(&mut self, objective: f64) -> Result<()> {
        self.transition(&[TrialStatus::Running], TrialStatus::Completed)?;
        self.objective = Some(objective);
        self.finished_at = Some(SystemTime::now());
        Ok(())
    }

    /// `Running -> Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Running`.
    pub fn fail(&mut self, failure: EvaluationFailure) -> Result<()> {
        self.transition(&[TrialStatus::Running], TrialStatus::Failed)?;
        self.error = Some(failure);
        self.finished_at = Some(SystemTime::now());
        Ok(())
    }

    /// `Pending | Running -> Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Pending` or `Running`.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(
            &[TrialStatus::Pending, TrialStatus::Running],
            TrialStatus::Cancelled,
        )?;
        self.finished_at = Some(SystemTime::now());
        Ok(())
    }

    /// Puts an interrupted `Running` trial back to `Pending` after a resume.
    pub(crate) fn requeue(&mut self) {
        if self.status == TrialStatus::Running {
            self.status = TrialStatus::Pending;
            self.started_at = None;
        }
    }

    /// Returns `true` once the trial can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of retries this trial has used.
    #[must_use]
    pub fn retries_used(&self) -> u32 {
        self.attempt_count.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ParamValue;

    fn trial() -> Trial {
        Trial::new(3, ParamSet::from([("x".to_string(), ParamValue::Int(1))]))
    }

    #[test]
    fn happy_path() {
        let mut t = trial();
        assert_eq!(t.status, TrialStatus::Pending);
        t.start().unwrap();
        assert_eq!(t.status, TrialStatus::Running);
        assert!(t.started_at.is_some());
        t.complete(4.0).unwrap();
        assert!(t.is_terminal());
        assert!(t.finished_at.is_some());
        assert!(t.error.is_none());
    }

    #[test]
    fn retry_counts_attempts_and_keeps_history() {
        let mut t = trial();
        t.start().unwrap();
        t.retry(EvaluationFailure::crash("boom")).unwrap();
        t.fail(EvaluationFailure::crash("boom again")).unwrap();
        assert_eq!(t.attempt_count, 2);
        assert_eq!(t.retries_used(), 1);
        assert_eq!(t.retry_history.len(), 1);
        assert_eq!(t.status, TrialStatus::Failed);
        assert!(t.objective.is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut t = trial();
        assert!(matches!(
            t.complete(1.0),
            Err(Error::InvalidTransition {
                from: TrialStatus::Pending,
                to: TrialStatus::Completed,
                ..
            })
        ));
        t.start().unwrap();
        t.complete(1.0).unwrap();
        assert!(t.cancel().is_err());
        assert!(t.start().is_err());
        assert_eq!(t.status, TrialStatus::Completed);
    }

    #[test]
    fn requeue_only_touches_running() {
        let mut t = trial();
        t.start().unwrap();
        t.requeue();
        assert_eq!(t.status, TrialStatus::Pending);
        assert_eq!(t.attempt_count, 1);

        let mut done = trial();
        done.start().unwrap();
        done.fail(EvaluationFailure::invalid_parameters("bad")).unwrap();
        done.requeue();
        assert_eq!(done.status, TrialStatus::Failed);
    }
}
