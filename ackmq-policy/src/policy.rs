use crate::errors::PolicyError;
use std::time::Duration;

/// Upper bound applied to computed redelivery delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaximumDelay {
    Unbounded,
    Bounded(Duration),
}

impl MaximumDelay {
    /// Negative values mean unbounded, matching the broker convention of `-1`.
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Ok(millis) => MaximumDelay::Bounded(Duration::from_millis(millis)),
            Err(_) => MaximumDelay::Unbounded,
        }
    }

    fn clamp(&self, delay: Duration) -> Duration {
        match self {
            MaximumDelay::Unbounded => delay,
            MaximumDelay::Bounded(max) => delay.min(*max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedeliveryPolicy {
    max_redeliveries: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    use_exponential_backoff: bool,
    maximum_delay: MaximumDelay,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: 10,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
            maximum_delay: MaximumDelay::Unbounded,
        }
    }
}

impl RedeliveryPolicy {
    pub fn new(
        max_redeliveries: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        use_exponential_backoff: bool,
        maximum_delay: MaximumDelay,
    ) -> Result<Self, PolicyError> {
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }

        Ok(Self {
            max_redeliveries,
            initial_delay,
            backoff_multiplier,
            use_exponential_backoff,
            maximum_delay,
        })
    }

    pub fn max_redeliveries(&self) -> u32 {
        self.max_redeliveries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn use_exponential_backoff(&self) -> bool {
        self.use_exponential_backoff
    }

    pub fn maximum_delay(&self) -> MaximumDelay {
        self.maximum_delay
    }

    /// True once a message has been redelivered more often than allowed.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count > self.max_redeliveries
    }

    /// Delay before redelivering a message whose `attempt_count`-th delivery
    /// (0-indexed) failed.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let delay = if !self.use_exponential_backoff || self.initial_delay.is_zero() {
            self.initial_delay
        } else {
            let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
            scale(self.initial_delay, self.backoff_multiplier.powi(exponent))
        };
        self.maximum_delay.clamp(delay)
    }
}

/// `delay * factor` for `factor >= 1`, saturating at `Duration::MAX`.
fn scale(delay: Duration, factor: f64) -> Duration {
    if factor == 1.0 {
        return delay;
    }

    let nanos = delay.as_nanos() as f64 * factor;
    let scaled = if !nanos.is_finite() {
        Duration::MAX
    } else if nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos.round() as u64)
    } else {
        Duration::try_from_secs_f64(nanos / 1e9).unwrap_or(Duration::MAX)
    };
    scaled.max(delay)
}
