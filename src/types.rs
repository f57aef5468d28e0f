//! Core enums shared across the campaign.

use serde::{Deserialize, Serialize};

/// The direction of optimization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Minimize the objective value.
    #[default]
    Minimize,
    /// Maximize the objective value.
    Maximize,
}

impl Direction {
    /// Returns `true` if `candidate` is strictly better than `incumbent`.
    #[must_use]
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }

    /// Amount by which `candidate` improves on `incumbent` (negative if worse).
    #[must_use]
    pub fn improvement(self, candidate: f64, incumbent: f64) -> f64 {
        match self {
            Self::Minimize => incumbent - candidate,
            Self::Maximize => candidate - incumbent,
        }
    }

    /// Converts an objective into minimization sense for the engine.
    #[must_use]
    pub fn to_minimization(self, value: f64) -> f64 {
        match self {
            Self::Minimize => value,
            Self::Maximize => -value,
        }
    }
}

/// The state of a trial in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Created, waiting for a dispatch slot.
    Pending,
    /// An evaluation attempt is in flight.
    Running,
    /// Finished with an objective value.
    Completed,
    /// Finished without an objective value.
    Failed,
    /// Abandoned during campaign shutdown.
    Cancelled,
}

impl TrialStatus {
    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` for outcomes that count against the trial budget.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Campaign state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Initializing,
    Running,
    Converged,
    BudgetExhausted,
    Aborted,
    Terminated,
}

/// The stopping condition that ended a campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `Completed + Failed` reached the configured maximum.
    TrialBudget,
    /// Accumulated run time reached the configured limit.
    WallClock,
    /// The best objective crossed the configured target.
    TargetReached,
    /// The best objective stopped improving.
    Plateau,
    /// The engine could not propose any further candidates.
    SearchSpaceExhausted,
}

impl StopReason {
    /// The terminal campaign state this reason leads to.
    #[must_use]
    pub fn terminal_state(self) -> CampaignState {
        match self {
            Self::TrialBudget | Self::WallClock => CampaignState::BudgetExhausted,
            Self::TargetReached | Self::Plateau | Self::SearchSpaceExhausted => {
                CampaignState::Converged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_is_better() {
        assert!(Direction::Minimize.is_better(1.0, 2.0));
        assert!(!Direction::Minimize.is_better(2.0, 2.0));
        assert!(Direction::Maximize.is_better(3.0, 2.0));
    }

    #[test]
    fn direction_improvement_sign() {
        assert!((Direction::Minimize.improvement(1.0, 3.0) - 2.0).abs() < 1e-12);
        assert!((Direction::Maximize.improvement(1.0, 3.0) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn stop_reason_maps_to_terminal_state() {
        assert_eq!(
            StopReason::TrialBudget.terminal_state(),
            CampaignState::BudgetExhausted
        );
        assert_eq!(
            StopReason::Plateau.terminal_state(),
            CampaignState::Converged
        );
    }
}
