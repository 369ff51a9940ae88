use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;

/// Exponential backoff bounded by an overall deadline. Used wherever a branch
/// waits on something outside its control: the registry filling up, a peer's
/// listener or the observer coming online.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
    started: Instant,
    deadline: Instant,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, timeout: Duration) -> Self {
        let started = Instant::now();
        Backoff {
            delay: initial,
            max: max.max(initial),
            started,
            deadline: started + timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Backoff::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Sleeps for the current delay, then doubles it up to the cap.
    /// Returns `false` without sleeping once the deadline has passed.
    pub async fn wait(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.delay.min(self.deadline - now)).await;
        self.delay = (self.delay * 2).min(self.max);
        true
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
