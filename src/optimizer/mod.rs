//! Ask/tell adapter around a pluggable optimization engine.
//!
//! The [`Engine`] trait is the seam to the sequential-decision engine (a
//! Bayesian optimizer, a pattern search, ...). [`OptimizerAdapter`] wraps an
//! engine with the campaign-level contract: bounds-checked, de-duplicated
//! batches, retry with jitter on recoverable engine failures, the
//! failed-point [`FailurePolicy`], and checkpointable state with a replay
//! fallback.
//!
//! # Engines shipped with the crate
//!
//! | Engine | Strategy | State |
//! |--------|----------|-------|
//! | [`RandomEngine`] | Uniform sampling | RNG seed |
//! | [`CompassEngine`] | Compass / pattern search in the unit cube | Full |

mod compass;
mod random;

use std::collections::VecDeque;

pub use compass::CompassEngine;
pub use random::RandomEngine;
use serde::{Deserialize, Serialize};

use crate::error::OptimizerFailure;
use crate::space::{ParamSet, SearchSpace};
use crate::trial::Trial;
use crate::types::{Direction, TrialStatus};

/// Upper bound on engine draws per requested candidate in one `ask`.
const DRAWS_PER_CANDIDATE: usize = 8;

/// Jitter added per retryable engine failure.
const JITTER_STEP: f64 = 0.05;

/// A sequential-decision engine.
///
/// All objective values handed to an engine are in *minimization* sense;
/// the adapter negates them for maximizing campaigns.
///
/// Every candidate returned by [`suggest`](Engine::suggest) is eventually
/// reported back exactly once through [`observe`](Engine::observe),
/// [`observe_failure`](Engine::observe_failure) or
/// [`discard`](Engine::discard).
pub trait Engine: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Proposes one candidate, or `None` if no further distinct candidate
    /// can be produced right now.
    ///
    /// `jitter` is `0.0` on a first attempt and grows after each retryable
    /// failure; engines with numerical fits should perturb accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerFailure::Retryable`] for recoverable numerical
    /// problems and [`OptimizerFailure::Fatal`] otherwise.
    fn suggest(
        &mut self,
        space: &SearchSpace,
        jitter: f64,
    ) -> Result<Option<ParamSet>, OptimizerFailure>;

    /// Reports a completed evaluation (minimization sense).
    fn observe(&mut self, space: &SearchSpace, params: &ParamSet, value: f64);

    /// Reports a failed evaluation. Not used for fitting.
    fn observe_failure(&mut self, _space: &SearchSpace, _params: &ParamSet) {}

    /// Reports a suggestion that will never be evaluated.
    fn discard(&mut self, _space: &SearchSpace, _params: &ParamSet) {}

    /// Exports native state, if the engine has a serializable one.
    fn export_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Imports state produced by [`export_state`](Engine::export_state).
    ///
    /// # Errors
    ///
    /// Returns an error if the state does not belong to this engine.
    fn import_state(&mut self, _state: serde_json::Value) -> Result<(), OptimizerFailure> {
        Err(OptimizerFailure::Fatal(format!(
            "{} has no importable state",
            self.name()
        )))
    }
}

/// What the adapter does with failed candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failed points only inform the engine through `observe_failure`.
    #[default]
    Ignore,
    /// Reject new candidates within `radius` (unit-cube Euclidean distance)
    /// of any of the last `memory` failed points.
    Avoid { radius: f64, memory: usize },
}

/// Checkpointable adapter state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Native engine state, when the engine exports one.
    pub engine: Option<serde_json::Value>,
    /// Failed points currently avoided.
    #[serde(default)]
    pub avoided: Vec<ParamSet>,
}

/// Ask/tell wrapper enforcing the campaign contract on an [`Engine`].
pub struct OptimizerAdapter {
    engine: Box<dyn Engine>,
    space: SearchSpace,
    direction: Direction,
    policy: FailurePolicy,
    max_ask_retries: u32,
    avoided: VecDeque<ParamSet>,
}

impl core::fmt::Debug for OptimizerAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OptimizerAdapter")
            .field("engine", &self.engine.name())
            .field("direction", &self.direction)
            .field("policy", &self.policy)
            .field("max_ask_retries", &self.max_ask_retries)
            .field("avoided", &self.avoided.len())
            .finish_non_exhaustive()
    }
}

impl OptimizerAdapter {
    #[must_use]
    pub fn new(engine: impl Engine + 'static, space: SearchSpace, direction: Direction) -> Self {
        Self::from_boxed(Box::new(engine), space, direction)
    }

    #[must_use]
    pub fn from_boxed(engine: Box<dyn Engine>, space: SearchSpace, direction: Direction) -> Self {
        Self {
            engine,
            space,
            direction,
            policy: FailurePolicy::Ignore,
            max_ask_retries: 3,
            avoided: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounded number of re-asks after retryable engine failures.
    #[must_use]
    pub fn max_ask_retries(mut self, retries: u32) -> Self {
        self.max_ask_retries = retries;
        self
    }

    #[must_use]
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    fn is_avoided(&self, candidate: &ParamSet) -> bool {
        match self.policy {
            FailurePolicy::Ignore => false,
            FailurePolicy::Avoid { radius, .. } => self
                .avoided
                .iter()
                .any(|failed| self.space.distance(failed, candidate) <= radius),
        }
    }

    /// Requests up to `n` new, distinct, in-bounds candidates.
    ///
    /// Returns fewer than `n` when the engine runs dry or too many draws are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure once it is fatal or retries are spent.
    /// Candidates drawn before the failure are discarded back to the engine.
    pub fn ask(&mut self, n: usize) -> Result<Vec<ParamSet>, OptimizerFailure> {
        let mut batch: Vec<ParamSet> = Vec::with_capacity(n);
        let max_draws = n.saturating_mul(DRAWS_PER_CANDIDATE);
        let mut draws = 0;
        let mut failures = 0u32;

        while batch.len() < n && draws < max_draws {
            let jitter = f64::from(failures) * JITTER_STEP;
            match self.engine.suggest(&self.space, jitter) {
                Ok(Some(candidate)) => {
                    draws += 1;
                    if let Err(e) = self.space.validate(&candidate) {
                        trace_warn!(engine = self.engine.name(), error = %e, "engine proposed an invalid candidate");
                        self.engine.discard(&self.space, &candidate);
                        continue;
                    }
                    if batch.contains(&candidate) || self.is_avoided(&candidate) {
                        self.engine.discard(&self.space, &candidate);
                        continue;
                    }
                    batch.push(candidate);
                }
                Ok(None) => break,
                Err(failure) if failure.is_retryable() && failures < self.max_ask_retries => {
                    failures += 1;
                    trace_warn!(engine = self.engine.name(), attempt = failures, error = %failure, "retrying ask with jitter");
                }
                Err(failure) => {
                    for candidate in &batch {
                        self.engine.discard(&self.space, candidate);
                    }
                    return Err(failure);
                }
            }
        }

        trace_debug!(requested = n, returned = batch.len(), "ask");
        Ok(batch)
    }

    /// Reports one finished or cancelled trial. Other statuses are ignored.
    pub fn tell(&mut self, trial: &Trial) {
        match (trial.status, trial.objective) {
            (TrialStatus::Completed, Some(value)) => {
                let value = self.direction.to_minimization(value);
                self.engine.observe(&self.space, &trial.parameters, value);
            }
            (TrialStatus::Failed, _) => {
                self.engine.observe_failure(&self.space, &trial.parameters);
                if let FailurePolicy::Avoid { memory, .. } = self.policy
                    && memory > 0
                {
                    self.avoided.push_back(trial.parameters.clone());
                    while self.avoided.len() > memory {
                        self.avoided.pop_front();
                    }
                }
            }
            (TrialStatus::Cancelled, _) => {
                self.engine.discard(&self.space, &trial.parameters);
            }
            _ => {}
        }
    }

    /// Exports the adapter state for checkpointing.
    #[must_use]
    pub fn state(&self) -> OptimizerState {
        OptimizerState {
            engine: self.engine.export_state(),
            avoided: self.avoided.iter().cloned().collect(),
        }
    }

    /// Restores state from a checkpoint.
    ///
    /// Native engine state is imported when present and accepted. Otherwise
    /// the engine is rebuilt by replaying every `Completed`/`Failed` trial of
    /// `history` in creation order, which is deterministic for a freshly
    /// constructed engine.
    pub fn restore(&mut self, state: Option<OptimizerState>, history: &[Trial]) {
        if let Some(state) = state
            && let Some(native) = state.engine
        {
            match self.engine.import_state(native) {
                Ok(()) => {
                    self.avoided = state.avoided.into_iter().collect();
                    trace_info!(engine = self.engine.name(), "restored native engine state");
                    return;
                }
                Err(e) => {
                    trace_warn!(engine = self.engine.name(), error = %e, "native state rejected, replaying history");
                }
            }
        }

        self.avoided.clear();
        let finished: Vec<&Trial> = history.iter().filter(|t| t.status.is_finished()).collect();
        for trial in &finished {
            self.tell(trial);
        }
        trace_info!(engine = self.engine.name(), replayed = finished.len(), "rebuilt engine by replay");
    }
}
