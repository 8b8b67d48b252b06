pub mod drain;
pub mod timer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::IndexerError;
use crate::event::EntityEvent;
use crate::export::health::HealthMetrics;
use crate::source::EventSource;
use crate::storage::{HighestMetric, PersistedRecord, Store};

use self::drain::DrainBarrier;
use self::timer::{CallbackTimer, CancelHandle};

/// Sequential driver that persists events and keeps at most one tracked
/// callback timer per entity.
///
/// All bookkeeping lives here and is only mutated by the driving task;
/// timers report outward and never write back.
pub struct EntityScheduler<S> {
    store: S,
    timer: CallbackTimer,
    latest_version: HashMap<String, i64>,
    active: HashMap<String, CancelHandle>,
    health: Option<Arc<HealthMetrics>>,
}

impl<S: Store> EntityScheduler<S> {
    pub fn new(store: S, timer: CallbackTimer) -> Self {
        Self {
            store,
            timer,
            latest_version: HashMap::new(),
            active: HashMap::new(),
            health: None,
        }
    }

    /// Record ingestion metrics in the given registry.
    pub fn with_health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Persist one event, supersede the entity's pending callback if the
    /// version moved forward, and start the event's own callback.
    pub async fn process_event(&mut self, event: EntityEvent) -> Result<(), IndexerError> {
        let started = Instant::now();

        if let Some(h) = &self.health {
            h.events_received.inc();
        }

        self.persist(&event).await?;

        info!(
            id = %event.entity_id,
            entity_type = %event.entity_type,
            version = event.version,
            "indexed entity snapshot",
        );

        // Compared against the last recorded version, not a running maximum:
        // a lower version still overwrites the record below.
        if let Some(&last) = self.latest_version.get(&event.entity_id) {
            if last < event.version {
                if let Some(prev) = self.active.get(&event.entity_id) {
                    // No-op if the previous callback already resolved.
                    prev.cancel();
                    debug!(
                        id = %event.entity_id,
                        previous_version = last,
                        version = event.version,
                        "superseding pending callback",
                    );
                    if let Some(h) = &self.health {
                        h.supersessions.inc();
                    }
                }
            }
        }

        let handle = self.timer.start(&event);

        self.latest_version
            .insert(event.entity_id.clone(), event.version);
        self.active.insert(event.entity_id, handle);

        if let Some(h) = &self.health {
            h.tracked_entities.set(self.active.len() as f64);
            h.event_processing_duration
                .observe(started.elapsed().as_secs_f64());
        }

        Ok(())
    }

    async fn persist(&self, event: &EntityEvent) -> Result<(), IndexerError> {
        let result = match PersistedRecord::from_event(event) {
            Ok(record) => self.store.append(&record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Some(h) = &self.health {
                    h.records_persisted.inc();
                }
                Ok(())
            }
            Err(source) => {
                if let Some(h) = &self.health {
                    h.persist_errors.inc();
                }
                Err(IndexerError::Persistence {
                    entity_id: event.entity_id.clone(),
                    version: event.version,
                    source,
                })
            }
        }
    }

    /// Consume `source` until exhausted, pause for the drain barrier, then
    /// query the highest-metric entity.
    ///
    /// Returns [`IndexerError::Interrupted`] if `shutdown` fires first.
    pub async fn drive<E: EventSource>(
        &mut self,
        source: &mut E,
        drain: &DrainBarrier,
        shutdown: &CancellationToken,
    ) -> Result<HighestMetric, IndexerError> {
        info!(store = self.store.name(), "ingesting entity events");

        let mut processed = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(IndexerError::Interrupted),
                next = source.next_event() => next,
            };

            let Some(event) = next else {
                break;
            };

            self.process_event(event).await?;
            processed += 1;
        }

        info!(
            processed,
            entities = self.latest_version.len(),
            in_flight = self.in_flight(),
            "event source exhausted",
        );

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(IndexerError::Interrupted),
            _ = drain.wait() => {}
        }

        info!(
            in_flight = self.in_flight(),
            "finished ingesting events and processing event callbacks",
        );

        let highest = self
            .store
            .highest_metric_entity()
            .await
            .map_err(IndexerError::AggregateQuery)?;

        info!(
            id = %highest.entity_id,
            metric = highest.metric,
            version = highest.version,
            "highest metric entity",
        );

        Ok(highest)
    }

    /// Number of callback timers not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.timer.in_flight()
    }

    /// Wait until every callback started so far has fired or been cancelled.
    pub async fn wait_for_timers(&self) {
        self.timer.wait_idle().await;
    }

    /// Number of distinct entities seen.
    pub fn tracked_entities(&self) -> usize {
        self.latest_version.len()
    }

    /// Last recorded version for `entity_id`.
    pub fn latest_version(&self, entity_id: &str) -> Option<i64> {
        self.latest_version.get(entity_id).copied()
    }

    /// Handle of the most recently started callback for `entity_id`.
    pub fn active_handle(&self, entity_id: &str) -> Option<&CancelHandle> {
        self.active.get(entity_id)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
