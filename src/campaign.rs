//! The campaign aggregate: every trial ever created plus derived bookkeeping.

use core::time::Duration;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::space::{ParamSet, SearchSpace};
use crate::trial::Trial;
use crate::types::{Direction, StopReason, TrialStatus};

/// The best completed trial observed so far.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub trial_id: u64,
    pub objective: f64,
}

/// One optimization run, from initialization to a terminal condition.
///
/// The trial list is append-only and indexed by trial id, so ids are always
/// `0..n`. Only the campaign controller mutates a campaign; everything else
/// gets a shared reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    name: String,
    space: SearchSpace,
    direction: Direction,
    trials: Vec<Trial>,
    iteration: u64,
    best: Option<BestTrial>,
    /// Ids of `Completed`/`Failed` trials in the order they finished.
    completion_order: Vec<u64>,
    /// Active run time accumulated over all sessions.
    elapsed: Duration,
    stop_reason: Option<StopReason>,
    abort_reason: Option<String>,
}

impl Campaign {
    #[must_use]
    pub fn new(name: impl Into<String>, space: SearchSpace, direction: Direction) -> Self {
        Self {
            name: name.into(),
            space,
            direction,
            trials: Vec::new(),
            iteration: 0,
            best: None,
            completion_order: Vec::new(),
            elapsed: Duration::ZERO,
            stop_reason: None,
            abort_reason: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// All trials in creation order (`trials()[i].id == i`).
    #[must_use]
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    #[must_use]
    pub fn trial(&self, id: u64) -> Option<&Trial> {
        usize::try_from(id).ok().and_then(|i| self.trials.get(i))
    }

    #[must_use]
    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    #[must_use]
    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }

    /// `Completed + Failed`: the quantity the trial budget is measured in.
    #[must_use]
    pub fn n_finished(&self) -> usize {
        self.completion_order.len()
    }

    /// Trials that were not cancelled, i.e. that consume trial budget.
    #[must_use]
    pub fn n_budgeted(&self) -> usize {
        self.trials.len() - self.count(TrialStatus::Cancelled)
    }

    #[must_use]
    pub fn completion_order(&self) -> &[u64] {
        &self.completion_order
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    #[must_use]
    pub fn best(&self) -> Option<BestTrial> {
        self.best
    }

    #[must_use]
    pub fn best_trial(&self) -> Option<&Trial> {
        self.best.and_then(|b| self.trial(b.trial_id))
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub(crate) fn next_iteration(&mut self) {
        self.iteration += 1;
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub(crate) fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    pub(crate) fn set_abort_reason(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
    }

    /// Clears terminal markers so a resumed campaign can run again.
    pub(crate) fn reopen(&mut self) {
        self.stop_reason = None;
        self.abort_reason = None;
    }

    /// Appends a new `Pending` trial with the next id.
    pub fn create_trial(&mut self, parameters: ParamSet) -> &Trial {
        let id = self.trials.len() as u64;
        self.trials.push(Trial::new(id, parameters));
        &self.trials[self.trials.len() - 1]
    }

    fn slot(&mut self, id: u64) -> Result<&mut Trial> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.trials.get_mut(i))
            .ok_or_else(|| Error::InvalidParameters(format!("unknown trial id {id}")))
    }

    /// Replaces the stored record with a newer snapshot of the same trial.
    ///
    /// Finished snapshots also update the completion order and best-so-far.
    /// Returns `true` if the snapshot became the new best.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown or the stored record is already
    /// terminal.
    pub fn record(&mut self, snapshot: Trial) -> Result<bool> {
        let id = snapshot.id;
        let status = snapshot.status;
        let objective = snapshot.objective;
        let slot = self.slot(id)?;
        if slot.is_terminal() {
            return Err(Error::InvalidTransition {
                trial_id: id,
                from: slot.status,
                to: status,
            });
        }
        *slot = snapshot;

        if !status.is_finished() {
            return Ok(false);
        }
        self.completion_order.push(id);
        let Some(objective) = objective else {
            return Ok(false);
        };
        let improved = self
            .best
            .is_none_or(|b| self.direction.is_better(objective, b.objective));
        if improved {
            self.best = Some(BestTrial {
                trial_id: id,
                objective,
            });
        }
        Ok(improved)
    }

    /// Resets interrupted trials to `Pending` and returns their ids.
    pub(crate) fn requeue_interrupted(&mut self) -> Vec<u64> {
        self.trials
            .iter_mut()
            .filter(|t| matches!(t.status, TrialStatus::Pending | TrialStatus::Running))
            .map(|t| {
                t.requeue();
                t.id
            })
            .collect()
    }

    /// Best objective recomputed from scratch in completion order.
    fn recompute_best(&self) -> Option<BestTrial> {
        let mut best: Option<BestTrial> = None;
        for &id in &self.completion_order {
            let Some(objective) = self.trial(id).and_then(|t| t.objective) else {
                continue;
            };
            if best.is_none_or(|b| self.direction.is_better(objective, b.objective)) {
                best = Some(BestTrial {
                    trial_id: id,
                    objective,
                });
            }
        }
        best
    }

    /// Checks the aggregate invariants; used when loading checkpoints.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> core::result::Result<(), String> {
        for (index, trial) in self.trials.iter().enumerate() {
            if trial.id != index as u64 {
                return Err(format!("trial at position {index} has id {}", trial.id));
            }
            match trial.status {
                TrialStatus::Completed if trial.objective.is_none() => {
                    return Err(format!("completed trial {} has no objective", trial.id));
                }
                TrialStatus::Failed if trial.error.is_none() => {
                    return Err(format!("failed trial {} has no error", trial.id));
                }
                _ => {}
            }
            if let Err(e) = self.space.validate(&trial.parameters) {
                return Err(format!("trial {}: {e}", trial.id));
            }
        }

        let mut seen = HashSet::new();
        for &id in &self.completion_order {
            let finished = self.trial(id).is_some_and(|t| t.status.is_finished());
            if !finished || !seen.insert(id) {
                return Err(format!("completion order entry {id} is not a finished trial"));
            }
        }
        let n_finished = self.trials.iter().filter(|t| t.status.is_finished()).count();
        if n_finished != self.completion_order.len() {
            return Err("completion order does not cover every finished trial".to_string());
        }

        if self.recompute_best() != self.best {
            return Err("best-so-far does not match the completed trials".to_string());
        }
        Ok(())
    }
}
