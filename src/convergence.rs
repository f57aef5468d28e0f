//! Stopping conditions.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::campaign::Campaign;
use crate::types::{Direction, StopReason};

/// No-improvement window for [`StoppingConfig::plateau`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plateau {
    /// Consecutive finalized trials without sufficient improvement.
    pub patience: usize,
    /// Improvements not exceeding this amount do not reset the window.
    #[serde(default)]
    pub tolerance: f64,
}

/// Which conditions end a campaign. Unset conditions never fire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoppingConfig {
    /// `Completed + Failed` trials.
    #[serde(default)]
    pub max_trials: Option<usize>,
    /// Accumulated active run time over all sessions.
    #[serde(default)]
    pub max_duration: Option<Duration>,
    /// Objective value that counts as good enough.
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub plateau: Option<Plateau>,
}

impl StoppingConfig {
    /// `true` if at least one condition is configured.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.max_trials.is_some()
            || self.max_duration.is_some()
            || self.target.is_some()
            || self.plateau.is_some()
    }
}

/// Evaluates [`StoppingConfig`] against a campaign.
///
/// Conditions are checked in a fixed order (trial budget, wall clock,
/// target, plateau) and the first that holds is reported.
///
/// # Examples
///
/// ```
/// use sledo::convergence::{ConvergenceEvaluator, StoppingConfig};
/// use sledo::space::SearchSpace;
/// use sledo::{Campaign, Direction, StopReason};
///
/// let space = SearchSpace::builder().float("x", 0.0, 1.0).build().unwrap();
/// let campaign = Campaign::new("demo", space, Direction::Minimize);
///
/// let evaluator = ConvergenceEvaluator::new(StoppingConfig {
///     max_trials: Some(0),
///     ..StoppingConfig::default()
/// });
/// assert_eq!(evaluator.check(&campaign), Some(StopReason::TrialBudget));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceEvaluator {
    config: StoppingConfig,
}

impl ConvergenceEvaluator {
    #[must_use]
    pub fn new(config: StoppingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StoppingConfig {
        &self.config
    }

    /// The first stopping condition that holds, if any.
    #[must_use]
    pub fn check(&self, campaign: &Campaign) -> Option<StopReason> {
        self.check_at(campaign, campaign.elapsed())
    }

    /// Like [`check`](Self::check), with `elapsed` as the current run time.
    #[must_use]
    pub fn check_at(&self, campaign: &Campaign, elapsed: Duration) -> Option<StopReason> {
        if self
            .config
            .max_trials
            .is_some_and(|max| campaign.n_finished() >= max)
        {
            return Some(StopReason::TrialBudget);
        }
        if self.config.max_duration.is_some_and(|max| elapsed >= max) {
            return Some(StopReason::WallClock);
        }
        if let (Some(target), Some(best)) = (self.config.target, campaign.best())
            && reaches(campaign.direction(), best.objective, target)
        {
            return Some(StopReason::TargetReached);
        }
        if let Some(plateau) = self.config.plateau
            && stalled(campaign, plateau)
        {
            return Some(StopReason::Plateau);
        }
        None
    }

    #[must_use]
    pub fn should_stop(&self, campaign: &Campaign) -> bool {
        self.check(campaign).is_some()
    }
}

fn reaches(direction: Direction, best: f64, target: f64) -> bool {
    match direction {
        Direction::Minimize => best <= target,
        Direction::Maximize => best >= target,
    }
}

/// `true` if the last `patience` finalized trials did not improve the best
/// objective by more than `tolerance`.
fn stalled(campaign: &Campaign, plateau: Plateau) -> bool {
    let order = campaign.completion_order();
    if plateau.patience == 0 || order.len() < plateau.patience {
        return false;
    }
    let direction = campaign.direction();
    let objective = |id: u64| campaign.trial(id).and_then(|t| t.objective);
    let split = order.len() - plateau.patience;

    let mut best = order[..split].iter().filter_map(|&id| objective(id)).fold(
        None,
        |best: Option<f64>, v| match best {
            Some(b) if !direction.is_better(v, b) => Some(b),
            _ => Some(v),
        },
    );
    for &id in &order[split..] {
        let Some(v) = objective(id) else { continue };
        match best {
            None => return false,
            Some(b) if direction.improvement(v, b) > plateau.tolerance => return false,
            Some(b) if direction.is_better(v, b) => best = Some(v),
            Some(_) => {}
        }
    }
    best.is_some()
}
