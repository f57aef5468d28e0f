//! Compass (pattern) search in the unit cube.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Engine;
use crate::error::OptimizerFailure;
use crate::space::{ParamSet, SearchSpace};

/// Two unit-cube points closer than this in every coordinate are the same.
const SAME_POINT: f64 = 1e-9;

/// Random draws attempted before giving up on finding an unseen point.
const MAX_RANDOM_DRAWS: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CompassState {
    step: f64,
    min_step: f64,
    /// Incumbent point and its value (minimization sense).
    base: Option<(Vec<f64>, f64)>,
    frontier: VecDeque<Vec<f64>>,
    outstanding: usize,
    poll_active: bool,
    poll_improved: bool,
    started: bool,
    /// Canonical encodings of every point suggested or observed.
    seen: Vec<Vec<f64>>,
    rng_seed: u64,
}

/// Deterministic compass search.
///
/// Starts at the centre of the space, then polls `base ± step` along every
/// axis of the unit cube. A poll that finds no improvement halves the step.
/// Once the step falls below `min_step` the engine switches to random
/// exploration of unseen points, and reports exhaustion when it cannot find
/// any.
///
/// Points are snapped through the space's decode/encode round trip, so
/// integer and categorical axes are polled bucket by bucket and never
/// proposed twice. While evaluations of the current poll are still
/// outstanding and the frontier is empty, extra slots are filled with random
/// points near the incumbent.
///
/// The complete search state is exported, so a resumed campaign continues
/// exactly where it stopped.
///
/// # Examples
///
/// ```
/// use sledo::optimizer::{CompassEngine, Engine};
/// use sledo::space::{ParamValue, SearchSpace};
///
/// let space = SearchSpace::builder().float("x", 0.0, 10.0).build().unwrap();
/// let mut engine = CompassEngine::new();
///
/// let first = engine.suggest(&space, 0.0).unwrap().unwrap();
/// assert_eq!(first["x"], ParamValue::Float(5.0));
/// ```
#[derive(Debug)]
pub struct CompassEngine {
    state: CompassState,
    rng: fastrand::Rng,
}

impl CompassEngine {
    /// Creates an engine with step `0.25`, minimum step `1e-4` and seed `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Seed for the random exploration phases.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: CompassState {
                step: 0.25,
                min_step: 1e-4,
                base: None,
                frontier: VecDeque::new(),
                outstanding: 0,
                poll_active: false,
                poll_improved: false,
                started: false,
                seen: Vec::new(),
                rng_seed: seed,
            },
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Initial poll step, as a fraction of each axis.
    #[must_use]
    pub fn initial_step(mut self, step: f64) -> Self {
        self.state.step = step;
        self
    }

    /// Step below which polling stops and random exploration begins.
    #[must_use]
    pub fn min_step(mut self, min_step: f64) -> Self {
        self.state.min_step = min_step;
        self
    }

    /// Current poll step.
    #[must_use]
    pub fn step(&self) -> f64 {
        self.state.step
    }

    fn canonical(space: &SearchSpace, point: &[f64]) -> Vec<f64> {
        space.encode(&space.decode(point))
    }

    fn is_seen(&self, point: &[f64]) -> bool {
        self.state.seen.iter().any(|s| {
            s.iter()
                .zip(point)
                .all(|(a, b)| (a - b).abs() < SAME_POINT)
        })
    }

    fn remember(&mut self, point: Vec<f64>) {
        if !self.is_seen(&point) {
            self.state.seen.push(point);
        }
    }

    fn emit(&mut self, space: &SearchSpace, point: Vec<f64>) -> ParamSet {
        let params = space.decode(&point);
        self.remember(point);
        self.state.outstanding += 1;
        params
    }

    /// Draws an unseen point, within `radius` of `centre` when given.
    fn random_unseen(
        &mut self,
        space: &SearchSpace,
        centre: Option<&[f64]>,
        radius: f64,
    ) -> Option<Vec<f64>> {
        for _ in 0..MAX_RANDOM_DRAWS {
            let raw: Vec<f64> = match centre {
                Some(c) => c
                    .iter()
                    .map(|x| (x + (self.rng.f64() * 2.0 - 1.0) * radius).clamp(0.0, 1.0))
                    .collect(),
                None => (0..space.len()).map(|_| self.rng.f64()).collect(),
            };
            let point = Self::canonical(space, &raw);
            if !self.is_seen(&point) {
                return Some(point);
            }
        }
        None
    }

    /// Queues `base ± step` along every axis, skipping known points.
    fn start_poll(&mut self, space: &SearchSpace, base: &[f64]) {
        let step = self.state.step;
        for axis in 0..base.len() {
            for sign in [1.0, -1.0] {
                let mut raw = base.to_vec();
                raw[axis] = (raw[axis] + sign * step).clamp(0.0, 1.0);
                let point = Self::canonical(space, &raw);
                let queued = self.state.frontier.iter().any(|q| q == &point);
                if !queued && !self.is_seen(&point) {
                    self.state.frontier.push_back(point);
                }
            }
        }
        self.state.poll_active = true;
        self.state.poll_improved = false;
    }
}

impl Default for CompassEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for CompassEngine {
    fn name(&self) -> &'static str {
        "compass"
    }

    fn suggest(
        &mut self,
        space: &SearchSpace,
        _jitter: f64,
    ) -> Result<Option<ParamSet>, OptimizerFailure> {
        if !self.state.started {
            self.state.started = true;
            let centre = Self::canonical(space, &vec![0.5; space.len()]);
            return Ok(Some(self.emit(space, centre)));
        }

        loop {
            while let Some(point) = self.state.frontier.pop_front() {
                if !self.is_seen(&point) {
                    return Ok(Some(self.emit(space, point)));
                }
            }

            let Some(base) = self.state.base.as_ref().map(|(p, _)| p.clone()) else {
                // Only the centre is in flight so far.
                return Ok(self
                    .random_unseen(space, None, 1.0)
                    .map(|p| self.emit(space, p)));
            };

            if self.state.poll_active {
                if self.state.outstanding > 0 {
                    let radius = self.state.step;
                    let point = self
                        .random_unseen(space, Some(base.as_slice()), radius)
                        .or_else(|| self.random_unseen(space, None, 1.0));
                    return Ok(point.map(|p| self.emit(space, p)));
                }
                self.state.poll_active = false;
                if !self.state.poll_improved {
                    self.state.step /= 2.0;
                }
            }

            if self.state.step < self.state.min_step {
                return Ok(self
                    .random_unseen(space, None, 1.0)
                    .map(|p| self.emit(space, p)));
            }

            self.start_poll(space, &base);
            if self.state.frontier.is_empty() {
                // Every neighbour at this step is known already.
                self.state.poll_active = false;
                self.state.step /= 2.0;
            }
        }
    }

    fn observe(&mut self, space: &SearchSpace, params: &ParamSet, value: f64) {
        self.state.outstanding = self.state.outstanding.saturating_sub(1);
        let point = space.encode(params);
        self.remember(point.clone());
        match self.state.base.as_ref().map(|(_, v)| *v) {
            Some(incumbent) if value >= incumbent => {}
            Some(_) => {
                self.state.base = Some((point, value));
                self.state.poll_improved = true;
            }
            None => self.state.base = Some((point, value)),
        }
    }

    fn observe_failure(&mut self, space: &SearchSpace, params: &ParamSet) {
        self.state.outstanding = self.state.outstanding.saturating_sub(1);
        self.remember(space.encode(params));
    }

    fn discard(&mut self, _space: &SearchSpace, _params: &ParamSet) {
        self.state.outstanding = self.state.outstanding.saturating_sub(1);
    }

    fn export_state(&self) -> Option<serde_json::Value> {
        let mut state = self.state.clone();
        state.rng_seed = self.rng.get_seed();
        serde_json::to_value(state).ok()
    }

    fn import_state(&mut self, state: serde_json::Value) -> Result<(), OptimizerFailure> {
        let state: CompassState = serde_json::from_value(state)
            .map_err(|e| OptimizerFailure::Fatal(format!("invalid compass state: {e}")))?;
        self.rng.seed(state.rng_seed);
        self.state = state;
        Ok(())
    }
}
