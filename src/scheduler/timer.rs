use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::event::EntityEvent;
use crate::export::health::HealthMetrics;

/// Terminal state of a callback timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Fired,
    Cancelled,
}

/// Emitted exactly once per timer when it resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub entity_id: String,
    pub version: i64,
    pub outcome: Outcome,
}

/// Signals cancellation to one callback timer.
///
/// Cancelling is idempotent and a no-op once the timer has resolved.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawns per-event callback timers.
///
/// Each timer races its delay against its cancellation token on its own
/// task and reports the winner outward; it never touches scheduler state.
pub struct CallbackTimer {
    tracker: TaskTracker,
    observations: Option<mpsc::UnboundedSender<Observation>>,
    health: Option<Arc<HealthMetrics>>,
}

impl CallbackTimer {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            observations: None,
            health: None,
        }
    }

    /// Deliver every observation to `tx` in addition to logging it.
    pub fn with_observations(mut self, tx: mpsc::UnboundedSender<Observation>) -> Self {
        self.observations = Some(tx);
        self
    }

    /// Record timer outcomes in the given metrics.
    pub fn with_health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Start a timer for `event` and return its cancellation handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, event: &EntityEvent) -> CancelHandle {
        let token = CancellationToken::new();
        let handle = CancelHandle {
            token: token.clone(),
        };

        let entity_id = event.entity_id.clone();
        let version = event.version;
        let delay = event.callback_delay();
        let observations = self.observations.clone();
        let health = self.health.clone();

        if let Some(h) = &health {
            h.callbacks_scheduled.inc();
            h.callbacks_in_flight.inc();
        }

        self.tracker.spawn(async move {
            // Cancellation is polled first so a signal that is already
            // pending when the delay also elapses wins.
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Outcome::Cancelled,
                _ = tokio::time::sleep(delay) => Outcome::Fired,
            };

            match outcome {
                Outcome::Fired => info!(id = %entity_id, version, "callback fires"),
                Outcome::Cancelled => info!(id = %entity_id, version, "callback cancelled"),
            }

            if let Some(h) = &health {
                match outcome {
                    Outcome::Fired => h.callbacks_fired.inc(),
                    Outcome::Cancelled => h.callbacks_cancelled.inc(),
                }
                h.callbacks_in_flight.dec();
            }

            if let Some(tx) = observations {
                // Receiver may be gone; observations are best-effort outward.
                let _ = tx.send(Observation {
                    entity_id,
                    version,
                    outcome,
                });
            }
        });

        handle
    }

    /// Number of timers not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every timer started so far has resolved.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for CallbackTimer {
    fn default() -> Self {
        Self::new()
    }
}
