use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, StorageBackend};
use crate::export::health::HealthMetrics;
use crate::migrate::ClickHouseMigrator;
use crate::scheduler::drain::DrainBarrier;
use crate::scheduler::timer::CallbackTimer;
use crate::scheduler::EntityScheduler;
use crate::source::{self, Arrival, ReplaySource};
use crate::storage::{Backend, ClickHouseStore, HighestMetric, MemoryStore};

/// Indexer wires configuration into the store, event source, scheduler and
/// drain barrier, and runs one pass over the configured events.
pub struct Indexer {
    cfg: Config,
    health: Option<Arc<HealthMetrics>>,
    cancel: CancellationToken,
}

impl Indexer {
    /// Creates a new Indexer, registering health metrics if enabled.
    pub fn new(cfg: Config) -> Result<Self> {
        let health = if cfg.health.enabled {
            Some(Arc::new(
                HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?,
            ))
        } else {
            None
        };

        Ok(Self {
            cfg,
            health,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that interrupts [`Indexer::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load events, ingest them, drain, and return the highest-metric entity.
    pub async fn run(&mut self) -> Result<HighestMetric> {
        if let Some(health) = &self.health {
            health
                .start()
                .await
                .context("starting health metrics server")?;
        }

        let result = self.run_inner().await;

        if let Err(e) = self.stop().await {
            warn!(error = %e, "indexer shutdown failed");
        }

        result
    }

    async fn run_inner(&mut self) -> Result<HighestMetric> {
        let events = source::load_events(&self.cfg.source.path)?;

        let store = self.open_store().await?;

        let mut timer = CallbackTimer::new();
        if let Some(health) = &self.health {
            timer = timer.with_health(Arc::clone(health));
        }

        let mut scheduler = EntityScheduler::new(store, timer);
        if let Some(health) = &self.health {
            scheduler = scheduler.with_health(Arc::clone(health));
        }

        let arrival = Arrival::from_max_jitter(self.cfg.source.max_jitter);
        let mut source = ReplaySource::new(events, arrival);
        let drain = DrainBarrier::new(self.cfg.drain.grace_period);

        info!(
            path = %self.cfg.source.path.display(),
            events = source.remaining(),
            ?arrival,
            grace = ?drain.grace(),
            "scheduling periodic index",
        );

        let highest = scheduler
            .drive(&mut source, &drain, &self.cancel)
            .await
            .context("driving entity scheduler")?;

        let late = scheduler.in_flight();
        if late > 0 {
            warn!(
                in_flight = late,
                "callbacks still pending after drain grace period",
            );
        }

        Ok(highest)
    }

    /// Open the configured backend, running migrations when enabled.
    async fn open_store(&self) -> Result<Backend> {
        match self.cfg.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory snapshot store");
                Ok(Backend::Memory(MemoryStore::new()))
            }
            StorageBackend::ClickHouse => {
                let ch_cfg = &self.cfg.storage.clickhouse;

                let store = ClickHouseStore::connect(ch_cfg)
                    .await
                    .with_context(|| format!("connecting to ClickHouse at {}", ch_cfg.dsn()))?;

                if let Some(health) = &self.health {
                    health.clickhouse_connected.set(1.0);
                }

                if ch_cfg.migrations.enabled {
                    ClickHouseMigrator::new(store.pool().clone(), ch_cfg.table.clone())
                        .up()
                        .await
                        .context("running migrations")?;
                }

                Ok(Backend::ClickHouse(store))
            }
        }
    }

    /// Stop the health server. The store's pool is dropped with the scheduler.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(health) = &self.health {
            health.clickhouse_connected.set(0.0);
            health
                .stop()
                .await
                .context("stopping health metrics server")?;
        }

        info!("indexer stopped");

        Ok(())
    }
}
