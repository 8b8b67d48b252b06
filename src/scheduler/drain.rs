use std::time::Duration;

use tracing::info;

/// Fixed-duration pause after the event source is exhausted.
///
/// It cannot observe individual timers: a callback whose delay outlasts the
/// grace period resolves after the caller has moved on.
#[derive(Debug, Clone, Copy)]
pub struct DrainBarrier {
    grace: Duration,
}

impl DrainBarrier {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Sleep for the grace period.
    pub async fn wait(&self) {
        info!(grace = ?self.grace, "waiting for remaining callbacks");
        tokio::time::sleep(self.grace).await;
    }
}
