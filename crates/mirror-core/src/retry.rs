use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Fixed-delay, bounded retry used to absorb notification/registration races.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 8, delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Runs `lookup` until it yields a value or the attempts run out.
    /// Sleeps `delay` between attempts, never after the last one.
    pub async fn until_found<T, F, Fut>(&self, mut lookup: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(found) = lookup().await {
                return Some(found);
            }
            if attempt < attempts {
                sleep(self.delay).await;
            }
        }
        None
    }
}
