//! Distributor configuration: defaults, guardrails, env overrides.
//!
//! Values can be set programmatically or layered from the environment:
//!
//! - `KEYLANE_EXPECTED_CONCURRENCY` - stripe pool sizing hint
//! - `KEYLANE_MAX_TASKS_PER_CYCLE` - fairness budget per worker cycle
//!
//! Parsing is intentionally minimal: unparseable values are logged and
//! ignored rather than aborting startup.

use crate::error::Error;
use tracing::warn;

/// Default expected number of threads submitting distinct keys in parallel.
pub const DEFAULT_EXPECTED_CONCURRENCY: usize = 16;

/// Cycle budget meaning "never yield".
pub const UNBOUNDED_TASKS_PER_CYCLE: usize = usize::MAX;

const ENV_EXPECTED_CONCURRENCY: &str = "KEYLANE_EXPECTED_CONCURRENCY";
const ENV_MAX_TASKS_PER_CYCLE: &str = "KEYLANE_MAX_TASKS_PER_CYCLE";

/// Tunables for a [`KeyedDistributor`](crate::KeyedDistributor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributorConfig {
    /// Expected level of submission concurrency; sizes the stripe pool.
    pub expected_concurrency: usize,
    /// Maximum tasks one key runs per backend cycle before yielding so
    /// other keys get a turn. Lower is fairer but less efficient: the
    /// worker gives up its thread and must be re-scheduled, and partial
    /// queue drains copy instead of swap.
    pub max_tasks_per_cycle: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            expected_concurrency: DEFAULT_EXPECTED_CONCURRENCY,
            max_tasks_per_cycle: UNBOUNDED_TASKS_PER_CYCLE,
        }
    }
}

impl DistributorConfig {
    /// Sets the expected submission concurrency.
    #[must_use]
    pub fn expected_concurrency(mut self, value: usize) -> Self {
        self.expected_concurrency = value;
        self
    }

    /// Sets the per-cycle task budget.
    #[must_use]
    pub fn max_tasks_per_cycle(mut self, value: usize) -> Self {
        self.max_tasks_per_cycle = value;
        self
    }

    /// Returns true when the cycle budget never forces a yield.
    #[must_use]
    pub fn is_unbounded_cycle(&self) -> bool {
        self.max_tasks_per_cycle == UNBOUNDED_TASKS_PER_CYCLE
    }

    /// Validates guardrail invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either value is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.expected_concurrency == 0 {
            return Err(Error::invalid_argument("expected_concurrency must be > 0"));
        }
        if self.max_tasks_per_cycle == 0 {
            return Err(Error::invalid_argument("max_tasks_per_cycle must be > 0"));
        }
        Ok(())
    }

    /// Builds a config from defaults layered with environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Applies environment overrides on top of this config.
    #[must_use]
    pub fn overlay_env(mut self) -> Self {
        if let Some(value) = read_env_usize(ENV_EXPECTED_CONCURRENCY) {
            self.expected_concurrency = value;
        }
        if let Some(value) = read_env_usize(ENV_MAX_TASKS_PER_CYCLE) {
            self.max_tasks_per_cycle = value;
        }
        self
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        Ok(_) | Err(_) => {
            warn!(var = name, value = %raw, "ignoring unusable env override");
            None
        }
    }
}
