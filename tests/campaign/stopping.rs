use std::time::Duration;

use sledo::backend::EvaluationRequest;
use sledo::optimizer::{CompassEngine, RandomEngine};
use sledo::space::SearchSpace;
use sledo::{
    CampaignConfig, CampaignController, CampaignState, EvaluationFailure, StopReason, TrialStatus,
};

use crate::support::{assert_dense_ids, line, shifted};

#[tokio::test]
async fn stops_once_the_target_is_reached() {
    let config = CampaignConfig::builder("target", line())
        .max_trials(100)
        .target(0.05)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::Converged);
    assert_eq!(outcome.stop_reason, Some(StopReason::TargetReached));
    assert!(outcome.best.unwrap().objective.unwrap() <= 0.05);
    assert!(outcome.campaign.n_finished() < 100);
}

#[tokio::test]
async fn stops_on_a_plateau() {
    let config = CampaignConfig::builder("flat", line())
        .max_trials(100)
        .plateau(5, 0.0)
        .build()
        .unwrap();
    let backend = |_: EvaluationRequest| async { Ok::<_, EvaluationFailure>(1.0) };

    let outcome = CampaignController::new(config, RandomEngine::with_seed(4), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, Some(StopReason::Plateau));
    // One trial sets the baseline, five more fail to beat it.
    assert_eq!(outcome.campaign.n_finished(), 6);
}

#[tokio::test]
async fn stops_when_the_space_is_exhausted() {
    let space = SearchSpace::builder()
        .int("layers", 1, 3)
        .categorical("material", ["tungsten", "copper"])
        .build()
        .unwrap();
    let config = CampaignConfig::builder("grid", space)
        .concurrency(2)
        .max_trials(100)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move {
        Ok::<_, EvaluationFailure>(req.parameters["layers"].as_f64().unwrap())
    };

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::Converged);
    assert_eq!(outcome.stop_reason, Some(StopReason::SearchSpaceExhausted));
    assert_eq!(outcome.campaign.n_trials(), 6);
    assert_eq!(outcome.campaign.count(TrialStatus::Completed), 6);
    assert_dense_ids(&outcome.campaign);
}

#[tokio::test(start_paused = true)]
async fn wall_clock_limit_cancels_the_trial_in_flight() {
    let config = CampaignConfig::builder("slow", line())
        .max_trials(100)
        .max_duration(Duration::from_millis(3500))
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<_, EvaluationFailure>(shifted(&req))
    };

    let outcome = CampaignController::new(config, RandomEngine::with_seed(9), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::BudgetExhausted);
    assert_eq!(outcome.stop_reason, Some(StopReason::WallClock));
    assert_eq!(outcome.campaign.n_finished(), 3);
    assert_eq!(outcome.campaign.count(TrialStatus::Cancelled), 1);
    assert!(outcome.campaign.elapsed() >= Duration::from_millis(3500));
}

#[tokio::test]
async fn budget_is_never_overshot_with_parallel_slots() {
    let config = CampaignConfig::builder("parallel", line())
        .concurrency(4)
        .max_trials(10)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let outcome = CampaignController::new(config, RandomEngine::with_seed(5), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.campaign.n_trials(), 10);
    assert_eq!(outcome.campaign.n_finished(), 10);
}
