use sledo::backend::EvaluationRequest;
use sledo::checkpoint::CheckpointManager;
use sledo::optimizer::{CompassEngine, Engine, RandomEngine};
use sledo::space::{ParamSet, SearchSpace};
use sledo::{
    CampaignConfig, CampaignController, CampaignState, EvaluationFailure, FailureKind,
    OptimizerFailure, TrialStatus,
};

use crate::support::{line, shifted, x};

#[tokio::test]
async fn transient_failures_are_retried() {
    // Odd trials crash on their first attempt.
    let backend = |req: EvaluationRequest| async move {
        if req.trial_id % 2 == 1 && req.attempt == 1 {
            return Err(EvaluationFailure::crash("solver segfault"));
        }
        Ok(shifted(&req))
    };
    let config = CampaignConfig::builder("flaky", line())
        .max_retries(1)
        .max_trials(10)
        .build()
        .unwrap();

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.campaign.count(TrialStatus::Completed), 10);
    for trial in outcome.campaign.trials() {
        if trial.id % 2 == 1 {
            assert_eq!(trial.attempt_count, 2);
            assert_eq!(trial.retry_history.len(), 1);
            assert_eq!(trial.retry_history[0].kind, FailureKind::Crash);
        } else {
            assert_eq!(trial.attempt_count, 1);
            assert!(trial.retry_history.is_empty());
        }
    }
}

#[tokio::test]
async fn permanent_failures_are_final_and_count_against_the_budget() {
    let backend = |req: EvaluationRequest| async move {
        if x(&req) > 2.0 {
            return Err(EvaluationFailure::invalid_parameters("mesh does not close"));
        }
        Ok(shifted(&req))
    };
    let config = CampaignConfig::builder("meshing", line())
        .max_retries(3)
        .max_trials(10)
        .build()
        .unwrap();

    let outcome = CampaignController::new(config, RandomEngine::with_seed(11), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::BudgetExhausted);
    assert_eq!(outcome.campaign.n_finished(), 10);
    let failed: Vec<_> = outcome
        .campaign
        .trials()
        .iter()
        .filter(|t| t.status == TrialStatus::Failed)
        .collect();
    assert!(!failed.is_empty());
    for trial in failed {
        assert_eq!(trial.attempt_count, 1);
        assert!(trial.objective.is_none());
        assert_eq!(
            trial.error.as_ref().unwrap().kind,
            FailureKind::InvalidParameters
        );
    }
}

#[tokio::test]
async fn a_panicking_backend_fails_only_its_trial() {
    let backend = |req: EvaluationRequest| async move {
        assert!(req.trial_id != 1, "solver aborted");
        Ok::<_, EvaluationFailure>(shifted(&req))
    };
    let config = CampaignConfig::builder("panics", line())
        .max_trials(4)
        .build()
        .unwrap();

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    let trial = outcome.campaign.trial(1).unwrap();
    assert_eq!(trial.status, TrialStatus::Failed);
    assert_eq!(trial.error.as_ref().unwrap().kind, FailureKind::Crash);
    assert_eq!(outcome.campaign.count(TrialStatus::Completed), 3);
}

/// Proposes `budget` points, then fails fatally.
struct Diverging {
    inner: RandomEngine,
    budget: usize,
}

impl Engine for Diverging {
    fn name(&self) -> &'static str {
        "diverging"
    }

    fn suggest(
        &mut self,
        space: &SearchSpace,
        jitter: f64,
    ) -> Result<Option<ParamSet>, OptimizerFailure> {
        if self.budget == 0 {
            return Err(OptimizerFailure::Fatal("surrogate diverged".to_string()));
        }
        self.budget -= 1;
        self.inner.suggest(space, jitter)
    }

    fn observe(&mut self, space: &SearchSpace, params: &ParamSet, value: f64) {
        self.inner.observe(space, params, value);
    }
}

#[tokio::test]
async fn fatal_optimizer_failure_aborts_and_keeps_the_last_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = CampaignConfig::builder("diverges", line())
        .max_trials(10)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };
    let engine = Diverging {
        inner: RandomEngine::with_seed(2),
        budget: 3,
    };

    let outcome = CampaignController::new(config, engine, backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::Aborted);
    assert!(outcome.abort_reason.unwrap().contains("surrogate diverged"));
    assert_eq!(outcome.stop_reason, None);
    assert_eq!(outcome.campaign.n_finished(), 3);

    let saved = CheckpointManager::new(dir.path()).load().unwrap();
    assert_eq!(saved.campaign.n_finished(), 3);
    assert_eq!(saved.campaign.abort_reason(), None);
}
