//! Per-reason bounded sampling of rejected items.
//!
//! Rejection counts are always exact. Only the detail payloads are sampled:
//! every reason keeps at least `min_per_reason` examples (so rare reasons are
//! never lost), at most `max_per_reason` examples, and in between each
//! rejection is retained with probability `sample_rate`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::ConfigError;

use super::types::CaptureMode;

/// Default probability of retaining a rejection between the floor and the cap.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.01;

/// Samples always retained per reason.
pub const MIN_SAMPLES_PER_REASON: usize = 5;

/// Hard cap on samples retained per reason.
pub const MAX_SAMPLES_PER_REASON: usize = 20;

/// Source of uniform random numbers in `[0, 1)`.
///
/// Injected into the [`Sampler`] so tests can drive the stochastic tail
/// deterministically.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

impl RandomSource for ChaCha8Rng {
    fn next_f64(&mut self) -> f64 {
        self.random::<f64>()
    }
}

/// Numeric knobs for `sample` capture mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    pub sample_rate: f64,
    pub min_per_reason: usize,
    pub max_per_reason: usize,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_per_reason: MIN_SAMPLES_PER_REASON,
            max_per_reason: MAX_SAMPLES_PER_REASON,
        }
    }
}

impl SamplingPolicy {
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_min_per_reason(mut self, min: usize) -> Self {
        self.min_per_reason = min;
        self
    }

    pub fn with_max_per_reason(mut self, max: usize) -> Self {
        self.max_per_reason = max;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if the rate is outside `[0, 1]`
    /// or the floor exceeds the cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::ValidationFailed(
                "sample_rate must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.min_per_reason > self.max_per_reason {
            return Err(ConfigError::ValidationFailed(format!(
                "min_per_reason ({}) cannot exceed max_per_reason ({})",
                self.min_per_reason, self.max_per_reason
            )));
        }

        Ok(())
    }
}

/// Rejection sampler for a single step.
///
/// Tracks the exhaustive count and the number of retained samples for every
/// reason it has seen.
pub struct Sampler {
    mode: CaptureMode,
    policy: SamplingPolicy,
    rng: Box<dyn RandomSource>,
    counts: BTreeMap<String, u64>,
    retained: HashMap<String, usize>,
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("counts", &self.counts)
            .field("retained", &self.retained)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    /// Creates a sampler seeded from OS entropy.
    pub fn new(mode: CaptureMode, policy: SamplingPolicy) -> Self {
        Self::with_source(
            mode,
            policy,
            Box::new(ChaCha8Rng::from_rng(&mut rand::rng())),
        )
    }

    /// Creates a sampler whose tail sampling is reproducible for `seed`.
    pub fn with_seed(mode: CaptureMode, policy: SamplingPolicy, seed: u64) -> Self {
        Self::with_source(mode, policy, Box::new(ChaCha8Rng::seed_from_u64(seed)))
    }

    /// Creates a sampler drawing from an arbitrary random source.
    pub fn with_source(
        mode: CaptureMode,
        policy: SamplingPolicy,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            mode,
            policy,
            rng,
            counts: BTreeMap::new(),
            retained: HashMap::new(),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Decides whether the next rejection for `reason` should be retained.
    ///
    /// No mode retains more than `max_per_reason` samples for one reason;
    /// `full` keeps everything up to that cap. Does not change any counters;
    /// see [`Sampler::record`].
    pub fn should_sample(&mut self, reason: &str) -> bool {
        match self.mode {
            CaptureMode::Full => self.retained(reason) < self.policy.max_per_reason,
            CaptureMode::None => false,
            CaptureMode::Sample => {
                let kept = self.retained(reason);
                if kept < self.policy.min_per_reason {
                    true
                } else if kept >= self.policy.max_per_reason {
                    false
                } else {
                    self.rng.next_f64() < self.policy.sample_rate
                }
            }
        }
    }

    /// Records one rejection for `reason`.
    ///
    /// The exhaustive count is always incremented. Returns `true` when the
    /// caller should keep the rejection's details, in which case the retained
    /// count is incremented as well.
    pub fn record(&mut self, reason: &str) -> bool {
        *self.counts.entry(reason.to_string()).or_insert(0) += 1;

        let keep = self.should_sample(reason);
        if keep {
            *self.retained.entry(reason.to_string()).or_insert(0) += 1;
        }
        keep
    }

    /// Exact number of rejections recorded for `reason`.
    pub fn count(&self, reason: &str) -> u64 {
        self.counts.get(reason).copied().unwrap_or(0)
    }

    /// Number of samples retained for `reason`.
    pub fn retained(&self, reason: &str) -> usize {
        self.retained.get(reason).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    /// Consumes the sampler, returning the exhaustive per-reason counts.
    pub fn into_counts(self) -> BTreeMap<String, u64> {
        self.counts
    }
}
