//! Declarative campaign configuration.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergence::{Plateau, StoppingConfig};
use crate::dispatch::DispatchSettings;
use crate::error::{Error, Result};
use crate::optimizer::FailurePolicy;
use crate::space::SearchSpace;
use crate::types::Direction;

fn one() -> usize {
    1
}

fn default_max_ask_retries() -> u32 {
    3
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

/// Everything a campaign needs besides the engine and the backend.
///
/// Usually built with [`CampaignConfig::builder`], or deserialized from
/// JSON with [`CampaignConfig::from_json`]. Both paths validate.
///
/// # Defaults
///
/// - direction: minimize
/// - concurrency: 1
/// - max retries: 0, no trial timeout, no retry backoff
/// - checkpoint every finalized trial
/// - shutdown grace: 10 s
/// - failure policy: [`FailurePolicy::Ignore`]
/// - optimizer re-asks after recoverable failures: 3
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub name: String,
    pub space: SearchSpace,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "one")]
    pub concurrency: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub trial_timeout: Option<Duration>,
    #[serde(default)]
    pub retry_backoff: Duration,
    pub stopping: StoppingConfig,
    /// Save a checkpoint after this many finalized trials.
    #[serde(default = "one")]
    pub checkpoint_every: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_max_ask_retries")]
    pub max_ask_retries: u32,
}

impl CampaignConfig {
    /// Starts a builder for a campaign over `space`.
    #[must_use]
    pub fn builder(name: impl Into<String>, space: SearchSpace) -> CampaignConfigBuilder {
        CampaignConfigBuilder::new(name.into(), space)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document is malformed, holds
    /// an invalid search space, or fails validation.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1");
        }
        if self.checkpoint_every == 0 {
            return invalid("checkpoint_every must be at least 1");
        }
        if !self.stopping.is_bounded() {
            return invalid("at least one stopping condition is required");
        }
        if let Some(plateau) = self.stopping.plateau
            && (plateau.patience == 0 || plateau.tolerance.is_nan() || plateau.tolerance < 0.0)
        {
            return invalid("plateau needs patience >= 1 and a non-negative tolerance");
        }
        if self.stopping.target.is_some_and(|t| !t.is_finite()) {
            return invalid("target must be finite");
        }
        if self.trial_timeout.is_some_and(|d| d.is_zero()) {
            return invalid("trial_timeout must be positive");
        }
        if let FailurePolicy::Avoid { radius, .. } = self.failure_policy
            && (radius.is_nan() || radius < 0.0)
        {
            return invalid("failure policy radius must be non-negative");
        }
        Ok(())
    }

    /// Dispatcher limits derived from this configuration.
    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            trial_timeout: self.trial_timeout,
            retry_backoff: self.retry_backoff,
        }
    }
}

/// Fluent builder for [`CampaignConfig`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sledo::space::SearchSpace;
/// use sledo::{CampaignConfig, Direction};
///
/// let space = SearchSpace::builder().float("x", 0.0, 10.0).build().unwrap();
/// let config = CampaignConfig::builder("quadratic", space)
///     .concurrency(4)
///     .max_retries(1)
///     .trial_timeout(Duration::from_secs(600))
///     .max_trials(100)
///     .plateau(20, 1e-6)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.direction, Direction::Minimize);
/// assert_eq!(config.dispatch_settings().concurrency, 4);
/// ```
#[derive(Clone, Debug)]
pub struct CampaignConfigBuilder {
    config: CampaignConfig,
}

impl CampaignConfigBuilder {
    fn new(name: String, space: SearchSpace) -> Self {
        Self {
            config: CampaignConfig {
                name,
                space,
                direction: Direction::Minimize,
                concurrency: 1,
                max_retries: 0,
                trial_timeout: None,
                retry_backoff: Duration::ZERO,
                stopping: StoppingConfig::default(),
                checkpoint_every: 1,
                shutdown_grace: default_shutdown_grace(),
                failure_policy: FailurePolicy::Ignore,
                max_ask_retries: default_max_ask_retries(),
            },
        }
    }

    #[must_use]
    pub fn minimize(self) -> Self {
        self.direction(Direction::Minimize)
    }

    #[must_use]
    pub fn maximize(self) -> Self {
        self.direction(Direction::Maximize)
    }

    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.config.direction = direction;
        self
    }

    /// Maximum number of trials evaluated at once.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Retries for transient evaluation failures.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    #[must_use]
    pub fn trial_timeout(mut self, timeout: Duration) -> Self {
        self.config.trial_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn max_trials(mut self, max: usize) -> Self {
        self.config.stopping.max_trials = Some(max);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, max: Duration) -> Self {
        self.config.stopping.max_duration = Some(max);
        self
    }

    #[must_use]
    pub fn target(mut self, target: f64) -> Self {
        self.config.stopping.target = Some(target);
        self
    }

    #[must_use]
    pub fn plateau(mut self, patience: usize, tolerance: f64) -> Self {
        self.config.stopping.plateau = Some(Plateau {
            patience,
            tolerance,
        });
        self
    }

    #[must_use]
    pub fn stopping(mut self, stopping: StoppingConfig) -> Self {
        self.config.stopping = stopping;
        self
    }

    #[must_use]
    pub fn checkpoint_every(mut self, trials: usize) -> Self {
        self.config.checkpoint_every = trials;
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn max_ask_retries(mut self, retries: u32) -> Self {
        self.config.max_ask_retries = retries;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// See [`CampaignConfig::validate`].
    pub fn build(self) -> Result<CampaignConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
