use std::time::Duration;

/// How a task is polled until it reaches a terminal state.
///
/// The default is fixed-interval polling (`backoff_multiplier = 1.0`) with a
/// bounded number of attempts. A multiplier above 1.0 turns it into capped
/// exponential backoff; `deadline` bounds the whole wait regardless of
/// attempts.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay before the first poll
    pub interval: Duration,
    /// Polls allowed before the task counts as timed out
    pub max_attempts: u32,
    /// Growth factor applied to the delay after each poll
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay
    pub max_interval: Duration,
    /// Overall bound on the wait
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
            backoff_multiplier: 1.0,
            max_interval: Duration::from_secs(30),
            deadline: None,
        }
    }
}

impl PollPolicy {
    /// Fixed-interval polling with a bounded attempt count
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay to wait before poll number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let delay_ms = self.interval.as_millis() as f64 * multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        std::cmp::min(delay, self.max_interval.max(self.interval))
    }

    /// Worst-case time spent polling before giving up
    pub fn budget(&self) -> Duration {
        let polling: Duration = (0..self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum();
        match self.deadline {
            Some(deadline) => polling.min(deadline),
            None => polling,
        }
    }
}
