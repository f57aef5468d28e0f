use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sledo::backend::EvaluationRequest;
use sledo::checkpoint::{Checkpoint, CheckpointManager};
use sledo::journal::TrialJournal;
use sledo::optimizer::{CompassEngine, OptimizerState, RandomEngine};
use sledo::space::{ParamSet, ParamValue};
use sledo::{
    Campaign, CampaignConfig, CampaignController, CampaignState, Direction, Error,
    EvaluationFailure, StopReason, TrialStatus,
};

use crate::support::{assert_dense_ids, line, shifted};

fn quadratic(budget: usize) -> CampaignConfig {
    CampaignConfig::builder("quadratic", line())
        .max_trials(budget)
        .build()
        .unwrap()
}

fn parameters(campaign: &Campaign) -> Vec<ParamSet> {
    campaign.trials().iter().map(|t| t.parameters.clone()).collect()
}

#[tokio::test]
async fn resumed_campaign_matches_an_uninterrupted_one() {
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let reference = CampaignController::new(quadratic(20), CompassEngine::new(), backend)
        .unwrap()
        .run()
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let first = CampaignController::new(quadratic(8), CompassEngine::new(), backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(first.campaign.n_finished(), 8);

    let resumed = CampaignController::resume(
        quadratic(20),
        CompassEngine::new(),
        backend,
        CheckpointManager::new(dir.path()),
    )
    .unwrap();
    assert_eq!(resumed.campaign().n_trials(), 8);
    assert_eq!(resumed.campaign().stop_reason(), None);
    let second = resumed.run().await.unwrap();

    assert_eq!(second.stop_reason, Some(StopReason::TrialBudget));
    assert_eq!(parameters(&second.campaign), parameters(&reference.campaign));
    assert_eq!(second.campaign.best(), reference.campaign.best());
    assert_dense_ids(&second.campaign);
}

#[tokio::test]
async fn interrupted_trials_are_resubmitted_with_their_ids() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path());

    // A crash left trial 0 finished and trial 1 mid-evaluation.
    let mut campaign = Campaign::new("crashed", line(), Direction::Minimize);
    for x in [5.0, 2.5] {
        campaign.create_trial(ParamSet::from([("x".to_string(), ParamValue::Float(x))]));
    }
    let mut done = campaign.trial(0).unwrap().clone();
    done.start().unwrap();
    done.complete(4.0).unwrap();
    campaign.record(done).unwrap();
    let mut running = campaign.trial(1).unwrap().clone();
    running.start().unwrap();
    campaign.record(running).unwrap();
    manager
        .save(&Checkpoint::new(campaign, OptimizerState::default()))
        .unwrap();

    let calls: Arc<Mutex<HashMap<u64, u32>>> = Arc::default();
    let backend = {
        let calls = Arc::clone(&calls);
        move |req: EvaluationRequest| {
            *calls.lock().entry(req.trial_id).or_default() += 1;
            async move { Ok::<_, EvaluationFailure>(shifted(&req)) }
        }
    };

    let outcome = CampaignController::resume(
        quadratic(3),
        RandomEngine::with_seed(8),
        backend,
        manager,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let calls = calls.lock();
    assert!(!calls.contains_key(&0));
    assert_eq!(calls[&1], 1);
    assert_eq!(calls[&2], 1);

    let trial = outcome.campaign.trial(1).unwrap();
    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(trial.parameters["x"], ParamValue::Float(2.5));
    assert_eq!(trial.objective, Some(0.25));
    assert_eq!(outcome.campaign.n_trials(), 3);
    assert!(outcome.best.unwrap().objective.unwrap() <= 0.25);
}

#[tokio::test]
async fn journal_latest_matches_the_resumed_campaign() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path());
    let journal_path = dir.path().join("trials.jsonl");
    let journal = TrialJournal::new(&journal_path);

    // Trial 1 finished and was journaled after the last checkpoint.
    let mut campaign = Campaign::new("crashed", line(), Direction::Minimize);
    for x in [5.0, 2.5] {
        campaign.create_trial(ParamSet::from([("x".to_string(), ParamValue::Float(x))]));
    }
    let mut done = campaign.trial(0).unwrap().clone();
    done.start().unwrap();
    done.complete(4.0).unwrap();
    campaign.record(done.clone()).unwrap();
    let mut late = campaign.trial(1).unwrap().clone();
    late.start().unwrap();
    campaign.record(late.clone()).unwrap();
    manager
        .save(&Checkpoint::new(campaign, OptimizerState::default()))
        .unwrap();
    journal.append(&done).unwrap();
    late.complete(7.0).unwrap();
    journal.append(&late).unwrap();

    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };
    let outcome = CampaignController::resume(quadratic(3), RandomEngine::with_seed(8), backend, manager)
        .unwrap()
        .with_journal(TrialJournal::new(&journal_path))
        .run()
        .await
        .unwrap();

    assert_eq!(journal.read_all().unwrap().len(), 4);
    let latest = journal.latest().unwrap();
    assert_eq!(latest, outcome.campaign.trials());
    assert_eq!(latest[1].objective, Some(0.25));
}

#[tokio::test]
async fn resume_rejects_a_different_search_space() {
    let dir = tempfile::tempdir().unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };
    CampaignController::new(quadratic(2), CompassEngine::new(), backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap()
        .run()
        .await
        .unwrap();

    let wider = sledo::space::SearchSpace::builder()
        .float("x", 0.0, 20.0)
        .build()
        .unwrap();
    let config = CampaignConfig::builder("quadratic", wider)
        .max_trials(4)
        .build()
        .unwrap();
    let err = CampaignController::resume(
        config,
        CompassEngine::new(),
        backend,
        CheckpointManager::new(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
}

#[tokio::test]
async fn a_checkpoint_directory_has_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    let backend = |req: EvaluationRequest| async move { Ok::<_, EvaluationFailure>(shifted(&req)) };

    let owner = CampaignController::new(quadratic(2), CompassEngine::new(), backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap();
    let err = CampaignController::new(quadratic(2), CompassEngine::new(), backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap_err();
    assert!(matches!(err, Error::CheckpointLocked(_)));

    owner.run().await.unwrap();
    assert!(
        CampaignController::new(quadratic(2), CompassEngine::new(), backend)
            .unwrap()
            .with_checkpoints(CheckpointManager::new(dir.path()))
            .is_ok()
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_trials_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = CampaignConfig::builder("interrupted", line())
        .concurrency(2)
        .max_trials(100)
        .build()
        .unwrap();
    let backend = |req: EvaluationRequest| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<_, EvaluationFailure>(shifted(&req))
    };

    let controller = CampaignController::new(config, RandomEngine::with_seed(6), backend)
        .unwrap()
        .with_checkpoints(CheckpointManager::new(dir.path()))
        .unwrap();
    let handle = controller.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.trigger();
    });

    let outcome = controller.run().await.unwrap();

    assert_eq!(outcome.state, CampaignState::Aborted);
    assert_eq!(outcome.abort_reason.as_deref(), Some("shutdown requested"));
    assert_eq!(outcome.campaign.n_finished(), 4);
    assert_eq!(outcome.campaign.count(TrialStatus::Cancelled), 2);

    let saved = CheckpointManager::new(dir.path()).load().unwrap();
    assert_eq!(saved.campaign, outcome.campaign);
}
