//! The campaign state machine.

use core::time::Duration;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::campaign::Campaign;
use crate::checkpoint::{Checkpoint, CheckpointLock, CheckpointManager};
use crate::config::CampaignConfig;
use crate::convergence::ConvergenceEvaluator;
use crate::dispatch::{DispatchEvent, SimulationDispatcher};
use crate::error::{Error, OptimizerFailure, Result};
use crate::journal::TrialJournal;
use crate::optimizer::{Engine, OptimizerAdapter};
use crate::trial::Trial;
use crate::types::{CampaignState, StopReason, TrialStatus};

/// Requests a graceful stop of a running campaign.
///
/// Cloneable and usable from any task or a signal handler. After
/// [`trigger`](Self::trigger) the controller asks for no new candidates,
/// cancels running trials within the configured grace period, writes a
/// final checkpoint and returns with [`CampaignState::Aborted`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// How a campaign run ended.
#[derive(Clone, Debug, PartialEq)]
pub struct CampaignOutcome {
    /// `Converged`, `BudgetExhausted` or `Aborted`.
    pub state: CampaignState,
    pub stop_reason: Option<StopReason>,
    pub abort_reason: Option<String>,
    /// The best completed trial, if any.
    pub best: Option<Trial>,
    /// The full campaign record at termination.
    pub campaign: Campaign,
}

enum Ending {
    Stop(StopReason),
    Optimizer(OptimizerFailure),
    Shutdown,
}

/// Drives one campaign from initialization to a terminal state.
///
/// The controller is the only owner of the [`Campaign`] and the optimizer
/// adapter; evaluations run on dispatcher tasks and come back as events, so
/// every mutation happens on the controller's task.
///
/// # Examples
///
/// ```
/// use sledo::backend::EvaluationRequest;
/// use sledo::optimizer::CompassEngine;
/// use sledo::space::SearchSpace;
/// use sledo::{CampaignConfig, CampaignController, CampaignState, EvaluationFailure};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sledo::Result<()> {
/// let space = SearchSpace::builder().float("x", 0.0, 10.0).build()?;
/// let config = CampaignConfig::builder("quadratic", space)
///     .max_trials(20)
///     .build()?;
/// let backend = |req: EvaluationRequest| async move {
///     let x = req.parameters["x"].as_f64().unwrap_or_default();
///     Ok::<_, EvaluationFailure>((x - 3.0).powi(2))
/// };
///
/// let outcome = CampaignController::new(config, CompassEngine::new(), backend)?
///     .run()
///     .await?;
///
/// assert_eq!(outcome.state, CampaignState::BudgetExhausted);
/// assert!(outcome.best.unwrap().objective.unwrap() < 0.1);
/// # Ok(())
/// # }
/// ```
pub struct CampaignController<B> {
    config: CampaignConfig,
    campaign: Campaign,
    adapter: OptimizerAdapter,
    dispatcher: SimulationDispatcher<B>,
    evaluator: ConvergenceEvaluator,
    checkpoints: Option<CheckpointManager>,
    lock: Option<CheckpointLock>,
    journal: Option<TrialJournal>,
    shutdown: Arc<watch::Sender<bool>>,
    state: CampaignState,
    /// Trials recovered from a checkpoint, submitted before any new ask.
    resubmit: Vec<u64>,
    since_checkpoint: usize,
}

impl<B> core::fmt::Debug for CampaignController<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CampaignController")
            .field("name", &self.campaign.name())
            .field("state", &self.state)
            .field("trials", &self.campaign.n_trials())
            .field("adapter", &self.adapter)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> CampaignController<B> {
    /// Creates a controller for a fresh campaign.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: CampaignConfig, engine: impl Engine + 'static, backend: B) -> Result<Self> {
        let campaign = Campaign::new(config.name.clone(), config.space.clone(), config.direction);
        Self::assemble(config, campaign, Box::new(engine), backend)
    }

    fn assemble(
        config: CampaignConfig,
        campaign: Campaign,
        engine: Box<dyn Engine>,
        backend: B,
    ) -> Result<Self> {
        config.validate()?;
        let adapter = OptimizerAdapter::from_boxed(engine, config.space.clone(), config.direction)
            .failure_policy(config.failure_policy)
            .max_ask_retries(config.max_ask_retries);
        let dispatcher = SimulationDispatcher::new(backend, config.dispatch_settings())?;
        let evaluator = ConvergenceEvaluator::new(config.stopping.clone());
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            campaign,
            adapter,
            dispatcher,
            evaluator,
            checkpoints: None,
            lock: None,
            journal: None,
            shutdown: Arc::new(shutdown),
            state: CampaignState::Initializing,
            resubmit: Vec::new(),
            since_checkpoint: 0,
        })
    }

    /// Checkpoints the campaign into `manager`'s directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CheckpointLocked`] if another controller owns the
    /// directory.
    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Result<Self> {
        self.lock = Some(manager.lock()?);
        self.checkpoints = Some(manager);
        Ok(self)
    }

    /// Appends every finalized trial to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: TrialJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Continues a campaign from its last checkpoint.
    ///
    /// The engine is restored from the checkpointed state when it supports
    /// one, otherwise rebuilt by replaying the finalized trials. Trials that
    /// were pending or running when the checkpoint was written are
    /// resubmitted with their original ids before anything new is asked.
    /// Such a trial may already be in an attached journal from the previous
    /// session; [`TrialJournal::latest`] collapses the repeat.
    ///
    /// Stopping thresholds come from `config` and may differ from the
    /// previous session; the search space and direction may not.
    ///
    /// # Errors
    ///
    /// - [`Error::CheckpointLocked`] if the directory is in use.
    /// - [`Error::CorruptCheckpoint`] / [`Error::SchemaMismatch`] if the
    ///   checkpoint cannot be used with `config`.
    pub fn resume(
        config: CampaignConfig,
        engine: impl Engine + 'static,
        backend: B,
        checkpoints: CheckpointManager,
    ) -> Result<Self> {
        config.validate()?;
        let lock = checkpoints.lock()?;
        let checkpoint = checkpoints.load()?;
        CheckpointManager::check_compatible(&checkpoint, &config)?;

        let Checkpoint {
            mut campaign,
            optimizer,
            ..
        } = checkpoint;
        campaign.reopen();
        let resubmit = campaign.requeue_interrupted();

        let mut controller = Self::assemble(config, campaign, Box::new(engine), backend)?;
        controller
            .adapter
            .restore(Some(optimizer), controller.campaign.trials());
        controller.resubmit = resubmit;
        controller.checkpoints = Some(checkpoints);
        controller.lock = Some(lock);

        trace_info!(
            campaign = controller.campaign.name(),
            trials = controller.campaign.n_trials(),
            resubmitted = controller.resubmit.len(),
            "campaign resumed from checkpoint"
        );
        Ok(controller)
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    #[must_use]
    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    #[must_use]
    pub fn state(&self) -> CampaignState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    fn set_state(&mut self, state: CampaignState) {
        trace_info!(campaign = self.campaign.name(), from = ?self.state, to = ?state, "campaign state");
        self.state = state;
    }

    fn save_checkpoint(&mut self) -> Result<()> {
        self.since_checkpoint = 0;
        if let Some(manager) = &self.checkpoints {
            manager.save(&Checkpoint::new(self.campaign.clone(), self.adapter.state()))?;
        }
        Ok(())
    }

    /// Applies a dispatcher event to the campaign.
    fn apply(&mut self, event: DispatchEvent, periodic_checkpoint: bool) -> Result<()> {
        let trial = match event {
            DispatchEvent::Started(trial) => {
                self.campaign.record(trial)?;
                return Ok(());
            }
            DispatchEvent::Finished(trial) => trial,
        };

        self.adapter.tell(&trial);
        if let Some(journal) = &self.journal
            && let Err(e) = journal.append(&trial)
        {
            trace_warn!(trial_id = trial.id, error = %e, "journal append failed");
        }

        let finished = trial.status.is_finished();
        let improved = self.campaign.record(trial)?;
        if improved && let Some(best) = self.campaign.best() {
            trace_info!(trial_id = best.trial_id, objective = best.objective, "new best");
        }

        if finished && periodic_checkpoint {
            self.since_checkpoint += 1;
            if self.since_checkpoint >= self.config.checkpoint_every {
                self.save_checkpoint()?;
            }
        }
        Ok(())
    }

    /// Asks for up to `n` candidates and submits them as new trials.
    fn ask_and_submit(&mut self, n: usize) -> Result<usize> {
        let batch = self.adapter.ask(n)?;
        self.campaign.next_iteration();
        let asked = batch.len();
        for parameters in batch {
            let trial = self.campaign.create_trial(parameters).clone();
            self.dispatcher.submit(trial)?;
        }
        Ok(asked)
    }

    /// Trials that may still be created without exceeding the trial budget.
    fn budget_left(&self) -> usize {
        self.config
            .stopping
            .max_trials
            .map_or(usize::MAX, |max| max.saturating_sub(self.campaign.n_budgeted()))
    }

    /// Runs the campaign to a terminal state.
    ///
    /// Per-trial failures never end the campaign; they are recorded on the
    /// trials. A fatal optimizer failure aborts without touching the last
    /// checkpoint; every other ending writes a final checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint cannot be written or the campaign
    /// record rejects an update.
    pub async fn run(mut self) -> Result<CampaignOutcome> {
        let session_start = Instant::now();
        let carried = self.campaign.elapsed();
        let deadline = self
            .config
            .stopping
            .max_duration
            .map(|max| session_start + max.saturating_sub(carried));
        let mut shutdown = self.shutdown.subscribe();

        self.set_state(CampaignState::Running);
        for id in core::mem::take(&mut self.resubmit) {
            if let Some(trial) = self.campaign.trial(id) {
                let trial = trial.clone();
                self.dispatcher.submit(trial)?;
            }
        }

        let ending = loop {
            self.campaign.set_elapsed(carried + session_start.elapsed());
            if let Some(reason) = self.evaluator.check(&self.campaign) {
                break Ending::Stop(reason);
            }
            if *shutdown.borrow() {
                break Ending::Shutdown;
            }

            let want = self.dispatcher.free_slots().min(self.budget_left());
            let asked = if want == 0 {
                0
            } else {
                match self.ask_and_submit(want) {
                    Ok(asked) => asked,
                    Err(Error::Optimizer(failure))
                        if failure.is_retryable() && !self.dispatcher.is_idle() =>
                    {
                        trace_warn!(error = %failure, "optimizer unavailable, waiting for results");
                        0
                    }
                    Err(Error::Optimizer(failure)) => break Ending::Optimizer(failure),
                    Err(e) => return Err(e),
                }
            };
            if asked == 0 && self.dispatcher.is_idle() {
                break Ending::Stop(StopReason::SearchSpaceExhausted);
            }

            let event = tokio::select! {
                event = self.dispatcher.next_event() => event,
                Ok(_) = shutdown.wait_for(|triggered| *triggered) => continue,
                () = sleep_until(deadline) => continue,
            };
            if let Some(event) = event {
                self.apply(event, true)?;
            }
            while let Some(event) = self.dispatcher.try_next_event() {
                self.apply(event, true)?;
            }
        };

        self.terminate(ending, carried, session_start).await
    }

    async fn terminate(
        mut self,
        ending: Ending,
        carried: Duration,
        session_start: Instant,
    ) -> Result<CampaignOutcome> {
        let (state, checkpoint) = match ending {
            Ending::Stop(reason) => {
                self.campaign.set_stop_reason(reason);
                (reason.terminal_state(), true)
            }
            Ending::Optimizer(failure) => {
                self.campaign.set_abort_reason(failure.to_string());
                (CampaignState::Aborted, false)
            }
            Ending::Shutdown => {
                self.campaign.set_abort_reason("shutdown requested");
                (CampaignState::Aborted, true)
            }
        };
        self.set_state(state);

        let leftovers = self.dispatcher.shutdown(self.config.shutdown_grace).await;
        for trial in leftovers {
            if trial.status == TrialStatus::Cancelled {
                trace_debug!(trial_id = trial.id, "trial cancelled");
            }
            self.apply(DispatchEvent::Finished(trial), false)?;
        }
        self.campaign.set_elapsed(carried + session_start.elapsed());

        if checkpoint {
            self.save_checkpoint()?;
        } else {
            trace_warn!(
                campaign = self.campaign.name(),
                reason = self.campaign.abort_reason().unwrap_or_default(),
                "campaign aborted, last checkpoint left untouched"
            );
        }

        trace_info!(
            campaign = self.campaign.name(),
            state = ?state,
            trials = self.campaign.n_trials(),
            best = ?self.campaign.best(),
            "campaign finished"
        );
        self.set_state(CampaignState::Terminated);
        drop(self.lock.take());

        Ok(CampaignOutcome {
            state,
            stop_reason: self.campaign.stop_reason(),
            abort_reason: self.campaign.abort_reason().map(str::to_string),
            best: self.campaign.best_trial().cloned(),
            campaign: self.campaign,
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => core::future::pending().await,
    }
}
