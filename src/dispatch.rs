//! Bounded, retrying dispatch of trials to a simulation backend.
//!
//! [`SimulationDispatcher`] owns a tokio [`JoinSet`] with at most
//! `concurrency` evaluation tasks. Each task drives one trial through all of
//! its attempts (timeouts, transient-failure retries with backoff) and
//! returns the finalized [`Trial`]. The controller never shares a trial with
//! a task: it gets snapshots through [`DispatchEvent`]s.

use core::time::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};

use crate::backend::{Backend, EvaluationRequest};
use crate::error::{Error, EvaluationFailure, FailureKind, Result};
use crate::trial::Trial;
use crate::types::TrialStatus;

/// Execution limits for dispatched trials.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchSettings {
    /// Maximum number of trials evaluated at once.
    pub concurrency: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Per-attempt limit; `None` waits forever.
    pub trial_timeout: Option<Duration>,
    /// Pause before a retry.
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 0,
            trial_timeout: None,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// What happened to a submitted trial.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchEvent {
    /// The trial got a slot and its first attempt began (status `Running`).
    Started(Trial),
    /// The trial reached `Completed`, `Failed` or `Cancelled`.
    Finished(Trial),
}

/// Runs trials against a [`Backend`] with a concurrency bound.
///
/// [`submit`](Self::submit) never blocks: trials beyond the bound wait in a
/// FIFO queue, still `Pending`, and start as slots free up.
///
/// # Examples
///
/// ```
/// use sledo::backend::EvaluationRequest;
/// use sledo::dispatch::{DispatchEvent, DispatchSettings, SimulationDispatcher};
/// use sledo::space::{ParamSet, ParamValue};
/// use sledo::{EvaluationFailure, Trial, TrialStatus};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sledo::Result<()> {
/// let backend = |req: EvaluationRequest| async move {
///     Ok::<_, EvaluationFailure>(req.parameters["x"].as_f64().unwrap_or_default() * 2.0)
/// };
/// let mut dispatcher = SimulationDispatcher::new(backend, DispatchSettings::default())?;
///
/// let params = ParamSet::from([("x".to_string(), ParamValue::Float(1.5))]);
/// dispatcher.submit(Trial::new(0, params))?;
///
/// let mut finished = None;
/// while let Some(event) = dispatcher.next_event().await {
///     if let DispatchEvent::Finished(trial) = event {
///         finished = Some(trial);
///     }
/// }
/// let trial = finished.unwrap();
/// assert_eq!(trial.status, TrialStatus::Completed);
/// assert_eq!(trial.objective, Some(3.0));
/// # Ok(())
/// # }
/// ```
pub struct SimulationDispatcher<B> {
    backend: Arc<B>,
    settings: DispatchSettings,
    queue: VecDeque<Trial>,
    /// Launch snapshots of the trials owned by live tasks.
    running: HashMap<Id, Trial>,
    tasks: JoinSet<Trial>,
    ready: VecDeque<DispatchEvent>,
    cancel: watch::Sender<bool>,
}

impl<B> core::fmt::Debug for SimulationDispatcher<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulationDispatcher")
            .field("settings", &self.settings)
            .field("queued", &self.queue.len())
            .field("in_flight", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> SimulationDispatcher<B> {
    /// Creates a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `concurrency` is zero.
    pub fn new(backend: B, settings: DispatchSettings) -> Result<Self> {
        if settings.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let (cancel, _) = watch::channel(false);
        Ok(Self {
            backend: Arc::new(backend),
            settings,
            queue: VecDeque::new(),
            running: HashMap::new(),
            tasks: JoinSet::new(),
            ready: VecDeque::new(),
            cancel,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Trials currently being evaluated.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Trials waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Concurrency slots not taken by running or queued trials.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.settings
            .concurrency
            .saturating_sub(self.running.len() + self.queue.len())
    }

    /// `true` when nothing is running, queued or waiting to be reported.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queue.is_empty() && self.ready.is_empty()
    }

    /// Queues a `Pending` trial and starts it if a slot is free.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the trial is not `Pending`.
    pub fn submit(&mut self, trial: Trial) -> Result<()> {
        if trial.status != TrialStatus::Pending {
            return Err(Error::InvalidTransition {
                trial_id: trial.id,
                from: trial.status,
                to: TrialStatus::Running,
            });
        }
        self.queue.push_back(trial);
        self.fill();
        Ok(())
    }

    fn fill(&mut self) {
        while self.running.len() < self.settings.concurrency {
            let Some(mut trial) = self.queue.pop_front() else {
                break;
            };
            // Queued trials were checked to be `Pending` on submit.
            if trial.start().is_err() {
                continue;
            }
            trace_debug!(trial_id = trial.id, "trial started");
            let snapshot = trial.clone();
            let handle = self.tasks.spawn(run_trial(
                Arc::clone(&self.backend),
                trial,
                self.settings.clone(),
                self.cancel.subscribe(),
            ));
            self.running.insert(handle.id(), snapshot.clone());
            self.ready.push_back(DispatchEvent::Started(snapshot));
        }
    }

    /// Maps a joined task back to its trial.
    fn finish(&mut self, joined: core::result::Result<(Id, Trial), JoinError>) -> Option<Trial> {
        match joined {
            Ok((id, trial)) => {
                self.running.remove(&id);
                Some(trial)
            }
            Err(e) => {
                let mut trial = self.running.remove(&e.id())?;
                // Backend panics are caught per attempt; this is the task itself.
                if e.is_panic() {
                    trace_warn!(trial_id = trial.id, "dispatch task panicked");
                    trial
                        .fail(EvaluationFailure::new(FailureKind::Crash, "dispatch task panicked"))
                        .ok()?;
                } else {
                    trial.cancel().ok()?;
                }
                Some(trial)
            }
        }
    }

    /// Waits for the next event. Returns `None` once the dispatcher is idle.
    ///
    /// Cancel-safe: dropping the future loses no event.
    pub async fn next_event(&mut self) -> Option<DispatchEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            let joined = self.tasks.join_next_with_id().await?;
            if let Some(trial) = self.finish(joined) {
                self.fill();
                return Some(DispatchEvent::Finished(trial));
            }
        }
    }

    /// Returns an event if one is available without waiting.
    pub fn try_next_event(&mut self) -> Option<DispatchEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            let joined = self.tasks.try_join_next_with_id()?;
            if let Some(trial) = self.finish(joined) {
                self.fill();
                return Some(DispatchEvent::Finished(trial));
            }
        }
    }

    /// Cancels every queued and running trial.
    ///
    /// Running tasks are signalled and given `grace` to acknowledge; tasks
    /// still alive afterwards are aborted. Returns the final record of every
    /// trial the dispatcher still owned, sorted by id: normally `Cancelled`,
    /// but a trial that finished within the grace period keeps its real
    /// outcome. Unreported `Started` events are dropped.
    ///
    /// The dispatcher accepts no further work afterwards.
    pub async fn shutdown(&mut self, grace: Duration) -> Vec<Trial> {
        let mut out = Vec::new();
        for mut trial in self.queue.drain(..) {
            if trial.cancel().is_ok() {
                out.push(trial);
            }
        }
        self.ready.clear();
        self.cancel.send_replace(true);

        let deadline = tokio::time::Instant::now() + grace;
        while !self.running.is_empty() {
            match tokio::time::timeout_at(deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(joined)) => out.extend(self.finish(joined)),
                Ok(None) | Err(_) => break,
            }
        }

        if !self.running.is_empty() {
            trace_warn!(
                remaining = self.running.len(),
                "grace period elapsed, aborting evaluations"
            );
            self.tasks.abort_all();
            while let Some(joined) = self.tasks.join_next_with_id().await {
                out.extend(self.finish(joined));
            }
        }
        // Any snapshot left has no task to report it.
        for (_, mut trial) in self.running.drain() {
            if trial.cancel().is_ok() {
                out.push(trial);
            }
        }

        out.sort_by_key(|t| t.id);
        out
    }
}

/// Runs one attempt on a task of its own, so a panicking backend is
/// reported against the live trial. `None` means the backend panicked.
///
/// Dropping the future aborts the attempt.
async fn isolated_attempt<B: Backend>(
    backend: &Arc<B>,
    request: EvaluationRequest,
    limit: Option<Duration>,
) -> Option<core::result::Result<f64, EvaluationFailure>> {
    let backend = Arc::clone(backend);
    let mut task = JoinSet::new();
    task.spawn(async move { backend.evaluate(request).await });
    let joined = async {
        match task.join_next().await {
            Some(Ok(outcome)) => Some(outcome),
            Some(Err(e)) if e.is_panic() => None,
            _ => Some(Err(EvaluationFailure::crash("attempt task was aborted"))),
        }
    };
    match limit {
        Some(limit) => tokio::time::timeout(limit, joined)
            .await
            .unwrap_or_else(|_| Some(Err(EvaluationFailure::timeout(limit)))),
        None => joined.await,
    }
}

/// Drives one `Running` trial to a terminal state.
async fn run_trial<B: Backend>(
    backend: Arc<B>,
    mut trial: Trial,
    settings: DispatchSettings,
    mut cancel: watch::Receiver<bool>,
) -> Trial {
    loop {
        let request = EvaluationRequest {
            trial_id: trial.id,
            attempt: trial.attempt_count,
            parameters: trial.parameters.clone(),
        };
        let outcome = tokio::select! {
            biased;
            Ok(_) = cancel.wait_for(|cancelled| *cancelled) => {
                // Dropping the attempt aborts its task.
                let _ = trial.cancel();
                return trial;
            }
            outcome = isolated_attempt(&backend, request, settings.trial_timeout) => outcome,
        };
        let Some(outcome) = outcome else {
            trace_warn!(trial_id = trial.id, attempt = trial.attempt_count, "backend panicked");
            let _ = trial.fail(EvaluationFailure::new(FailureKind::Crash, "backend panicked"));
            return trial;
        };

        let failure = match outcome {
            Ok(value) if value.is_finite() => {
                let _ = trial.complete(value);
                trace_debug!(trial_id = trial.id, value, "trial completed");
                return trial;
            }
            Ok(value) => EvaluationFailure::new(
                FailureKind::NonFiniteObjective,
                format!("backend returned {value}"),
            ),
            Err(failure) => failure,
        };

        if failure.is_transient() && trial.attempt_count <= settings.max_retries {
            trace_warn!(
                trial_id = trial.id,
                attempt = trial.attempt_count,
                error = %failure,
                "transient failure, retrying"
            );
            let _ = trial.retry(failure);
            if !settings.retry_backoff.is_zero() {
                tokio::select! {
                    biased;
                    Ok(_) = cancel.wait_for(|cancelled| *cancelled) => {
                        let _ = trial.cancel();
                        return trial;
                    }
                    () = tokio::time::sleep(settings.retry_backoff) => {}
                }
            }
            continue;
        }

        trace_debug!(trial_id = trial.id, error = %failure, "trial failed");
        let _ = trial.fail(failure);
        return trial;
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::space::{ParamSet, ParamValue};

    fn trial(id: u64) -> Trial {
        Trial::new(
            id,
            ParamSet::from([("x".to_string(), ParamValue::Float(1.0))]),
        )
    }

    async fn drain<B: Backend>(d: &mut SimulationDispatcher<B>) -> Vec<Trial> {
        let mut finished = Vec::new();
        while let Some(event) = d.next_event().await {
            if let DispatchEvent::Finished(t) = event {
                finished.push(t);
            }
        }
        finished
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let backend = |_: EvaluationRequest| async { Ok::<_, EvaluationFailure>(0.0) };
        let settings = DispatchSettings {
            concurrency: 0,
            ..DispatchSettings::default()
        };
        assert!(matches!(
            SimulationDispatcher::new(backend, settings),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn excess_submissions_stay_pending_in_queue() {
        let backend = |_: EvaluationRequest| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, EvaluationFailure>(1.0)
        };
        let settings = DispatchSettings {
            concurrency: 2,
            ..DispatchSettings::default()
        };
        let mut d = SimulationDispatcher::new(backend, settings).unwrap();
        for id in 0..5 {
            d.submit(trial(id)).unwrap();
        }
        assert_eq!(d.in_flight(), 2);
        assert_eq!(d.queued(), 3);
        assert_eq!(d.free_slots(), 0);

        let finished = drain(&mut d).await;
        assert_eq!(finished.len(), 5);
        assert!(finished.iter().all(|t| t.status == TrialStatus::Completed));
        assert!(d.is_idle());
    }

    #[tokio::test]
    async fn rejects_non_pending_submissions() {
        let backend = |_: EvaluationRequest| async { Ok::<_, EvaluationFailure>(1.0) };
        let mut d = SimulationDispatcher::new(backend, DispatchSettings::default()).unwrap();
        let mut t = trial(0);
        t.start().unwrap();
        assert!(d.submit(t).is_err());
    }

    #[tokio::test]
    async fn non_finite_objective_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let backend = move |_: EvaluationRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, EvaluationFailure>(f64::NAN) }
        };
        let settings = DispatchSettings {
            max_retries: 3,
            ..DispatchSettings::default()
        };
        let mut d = SimulationDispatcher::new(backend, settings).unwrap();
        d.submit(trial(0)).unwrap();
        let t = drain(&mut d).await.remove(0);
        assert_eq!(t.status, TrialStatus::Failed);
        assert_eq!(t.error.unwrap().kind, FailureKind::NonFiniteObjective);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_backend_fails_the_trial() {
        let backend = |req: EvaluationRequest| async move {
            if req.trial_id == 1 {
                panic!("solver segfault");
            }
            Ok::<_, EvaluationFailure>(1.0)
        };
        let settings = DispatchSettings {
            concurrency: 2,
            ..DispatchSettings::default()
        };
        let mut d = SimulationDispatcher::new(backend, settings).unwrap();
        d.submit(trial(0)).unwrap();
        d.submit(trial(1)).unwrap();
        let mut finished = drain(&mut d).await;
        finished.sort_by_key(|t| t.id);
        assert_eq!(finished[0].status, TrialStatus::Completed);
        assert_eq!(finished[1].status, TrialStatus::Failed);
        assert_eq!(finished[1].error.as_ref().unwrap().kind, FailureKind::Crash);
    }

    #[tokio::test]
    async fn panic_on_a_retry_keeps_the_attempt_history() {
        let backend = |req: EvaluationRequest| async move {
            if req.attempt > 1 {
                panic!("mesher aborted");
            }
            Err::<f64, _>(EvaluationFailure::transient_io("license dropped"))
        };
        let settings = DispatchSettings {
            max_retries: 3,
            ..DispatchSettings::default()
        };
        let mut d = SimulationDispatcher::new(backend, settings).unwrap();
        d.submit(trial(0)).unwrap();

        let finished = drain(&mut d).await;
        let t = &finished[0];
        assert_eq!(t.status, TrialStatus::Failed);
        assert_eq!(t.attempt_count, 2);
        assert_eq!(t.retry_history.len(), 1);
        assert_eq!(t.retry_history[0].kind, FailureKind::TransientIo);
        assert_eq!(t.error.as_ref().unwrap().kind, FailureKind::Crash);
    }

    #[tokio::test]
    async fn started_events_precede_finished() {
        let backend = |_: EvaluationRequest| async { Ok::<_, EvaluationFailure>(1.0) };
        let mut d = SimulationDispatcher::new(backend, DispatchSettings::default()).unwrap();
        d.submit(trial(0)).unwrap();
        d.submit(trial(1)).unwrap();

        let mut log = Vec::new();
        while let Some(event) = d.next_event().await {
            log.push(match event {
                DispatchEvent::Started(t) => ("start", t.id, t.status),
                DispatchEvent::Finished(t) => ("finish", t.id, t.status),
            });
        }
        assert_eq!(
            log,
            vec![
                ("start", 0, TrialStatus::Running),
                ("finish", 0, TrialStatus::Completed),
                ("start", 1, TrialStatus::Running),
                ("finish", 1, TrialStatus::Completed),
            ]
        );
    }
}
