//! Uniform random search.

use serde_json::json;

use super::Engine;
use crate::error::OptimizerFailure;
use crate::space::{ParamKind, ParamSet, ParamValue, SearchSpace};

/// Samples every parameter independently and uniformly.
///
/// Ignores the history; useful as a baseline and for smoke-testing a
/// simulation pipeline. Continuous log-scale parameters are sampled
/// uniformly in log space.
///
/// The exported state is the RNG seed at the time of export, so a resumed
/// engine continues the exact same sequence.
///
/// # Examples
///
/// ```
/// use sledo::optimizer::{Engine, RandomEngine};
/// use sledo::space::SearchSpace;
///
/// let space = SearchSpace::builder().int("n", 1, 4).build().unwrap();
/// let mut engine = RandomEngine::with_seed(42);
/// let candidate = engine.suggest(&space, 0.0).unwrap().unwrap();
/// assert!(space.validate(&candidate).is_ok());
/// ```
#[derive(Debug)]
pub struct RandomEngine {
    rng: fastrand::Rng,
}

impl RandomEngine {
    /// Creates an engine with a random seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Creates an engine with a fixed seed for reproducibility.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn f64_range(&mut self, low: f64, high: f64) -> f64 {
        low + self.rng.f64() * (high - low)
    }
}

impl Default for RandomEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for RandomEngine {
    fn name(&self) -> &'static str {
        "random"
    }

    fn suggest(
        &mut self,
        space: &SearchSpace,
        _jitter: f64,
    ) -> Result<Option<ParamSet>, OptimizerFailure> {
        let mut params = ParamSet::new();
        for spec in space.params() {
            let value = match &spec.kind {
                ParamKind::Float { low, high, log } => {
                    let v = if *log {
                        self.f64_range(low.ln(), high.ln()).exp()
                    } else {
                        self.f64_range(*low, *high)
                    };
                    ParamValue::Float(v.clamp(*low, *high))
                }
                ParamKind::Int { low, high } => ParamValue::Int(self.rng.i64(*low..=*high)),
                ParamKind::Categorical { choices } => {
                    let index = self.rng.usize(0..choices.len());
                    ParamValue::Choice(choices[index].clone())
                }
            };
            params.insert(spec.name.clone(), value);
        }
        Ok(Some(params))
    }

    fn observe(&mut self, _space: &SearchSpace, _params: &ParamSet, _value: f64) {}

    fn export_state(&self) -> Option<serde_json::Value> {
        Some(json!({ "seed": self.rng.get_seed() }))
    }

    fn import_state(&mut self, state: serde_json::Value) -> Result<(), OptimizerFailure> {
        let seed = state
            .get("seed")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| OptimizerFailure::Fatal("random engine state has no seed".into()))?;
        self.rng.seed(seed);
        Ok(())
    }
}
