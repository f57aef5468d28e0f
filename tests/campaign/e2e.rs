use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sledo::backend::EvaluationRequest;
use sledo::backend::test_functions::{FunctionBackend, three_hump_camel};
use sledo::journal::TrialJournal;
use sledo::optimizer::{CompassEngine, RandomEngine};
use sledo::space::SearchSpace;
use sledo::{
    CampaignConfig, CampaignController, CampaignState, EvaluationFailure, StopReason, TrialStatus,
};

use crate::support::{assert_dense_ids, line, shifted, statuses};

#[tokio::test]
async fn compass_finds_the_minimum_of_a_shifted_quadratic() {
    let config = CampaignConfig::builder("quadratic", line())
        .max_trials(20)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, CampaignState::BudgetExhausted);
    assert_eq!(outcome.stop_reason, Some(StopReason::TrialBudget));
    assert_eq!(outcome.campaign.n_trials(), 20);
    assert_eq!(outcome.campaign.count(TrialStatus::Completed), 20);
    assert_dense_ids(&outcome.campaign);

    let best = outcome.best.unwrap();
    assert!(best.objective.unwrap() <= 0.1, "best = {:?}", best.objective);
    let x = best.parameters["x"].as_f64().unwrap();
    assert!((x - 3.0).abs() <= 0.5, "x = {x}");
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_the_concurrency_bound() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let backend = {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        move |req: EvaluationRequest| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50 + req.trial_id % 3 * 10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, EvaluationFailure>(shifted(&req))
            }
        }
    };
    let config = CampaignConfig::builder("bounded", line())
        .concurrency(3)
        .max_trials(12)
        .build()
        .unwrap();

    let outcome = CampaignController::new(config, RandomEngine::with_seed(7), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(running.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.campaign.n_trials(), 12);
    assert_eq!(outcome.campaign.count(TrialStatus::Completed), 12);
    assert_dense_ids(&outcome.campaign);
}

#[tokio::test]
async fn best_follows_the_direction() {
    let config = CampaignConfig::builder("peak", line())
        .maximize()
        .max_trials(15)
        .build()
        .unwrap();
    let backend =
        |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(-shifted(&req)) };

    let outcome = CampaignController::new(config, CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    let highest = outcome
        .campaign
        .trials()
        .iter()
        .filter_map(|t| t.objective)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(outcome.best.unwrap().objective, Some(highest));
    assert!(highest > -0.1);
}

#[tokio::test]
async fn runs_an_analytic_function_on_the_blocking_pool() {
    let space = SearchSpace::builder()
        .float("x1", -5.0, 5.0)
        .float("x2", -5.0, 5.0)
        .build()
        .unwrap();
    let config = CampaignConfig::builder("camel", space)
        .concurrency(4)
        .max_trials(30)
        .build()
        .unwrap();

    let outcome = CampaignController::new(
        config,
        CompassEngine::with_seed(3),
        FunctionBackend::new(three_hump_camel),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.campaign.n_finished(), 30);
    // The centre of the space is the global minimum.
    assert_eq!(outcome.campaign.best().unwrap().objective, 0.0);
}

#[tokio::test]
async fn journal_receives_every_finalized_trial() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("trials.jsonl");
    let config = CampaignConfig::builder("journaled", line())
        .concurrency(2)
        .max_trials(6)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let outcome = CampaignController::new(config, RandomEngine::with_seed(1), backend)
        .unwrap()
        .with_journal(TrialJournal::new(&journal_path))
        .run()
        .await
        .unwrap();

    let mut journaled = TrialJournal::new(&journal_path).read_all().unwrap();
    journaled.sort_by_key(|t| t.id);
    assert_eq!(journaled, outcome.campaign.trials());
    assert!(statuses(&outcome.campaign)
        .iter()
        .all(|s| *s == TrialStatus::Completed));
}
