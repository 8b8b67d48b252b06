pub mod clickhouse;
pub mod error;
pub mod memory;
pub mod record;

use std::collections::hash_map::Entry;
use std::collections::HashMap;

pub use self::clickhouse::ClickHouseStore;
pub use self::error::StoreError;
pub use self::memory::MemoryStore;
pub use self::record::{HighestMetric, PersistedRecord};

/// Append-only store of entity snapshots plus the highest-metric query.
///
/// Only sequential single-writer use is required of implementations.
pub trait Store: Send + Sync {
    /// Returns the store's name for logging.
    fn name(&self) -> &str;

    /// Durably append one snapshot. No dedup.
    fn append(
        &self,
        record: &PersistedRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Entity whose latest-version metric is maximal across all entities.
    ///
    /// Ties on metric resolve to the lexicographically smallest entity id.
    /// Fails with [`StoreError::Empty`] when nothing is stored.
    fn highest_metric_entity(
        &self,
    ) -> impl std::future::Future<Output = Result<HighestMetric, StoreError>> + Send;
}

/// Backend dispatches to the configured store without trait objects.
pub enum Backend {
    Memory(MemoryStore),
    ClickHouse(ClickHouseStore),
}

impl Store for Backend {
    fn name(&self) -> &str {
        match self {
            Self::Memory(s) => s.name(),
            Self::ClickHouse(s) => s.name(),
        }
    }

    async fn append(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.append(record).await,
            Self::ClickHouse(s) => s.append(record).await,
        }
    }

    async fn highest_metric_entity(&self) -> Result<HighestMetric, StoreError> {
        match self {
            Self::Memory(s) => s.highest_metric_entity().await,
            Self::ClickHouse(s) => s.highest_metric_entity().await,
        }
    }
}

impl<S: Store> Store for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn append(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        (**self).append(record).await
    }

    async fn highest_metric_entity(&self) -> Result<HighestMetric, StoreError> {
        (**self).highest_metric_entity().await
    }
}

/// Pick the highest-metric entity from records in insertion order.
///
/// Each entity is represented by its maximum-version row; among equal versions
/// the most recently appended row wins. Equal metrics resolve to the smallest
/// entity id.
pub fn select_highest(records: &[PersistedRecord]) -> Option<HighestMetric> {
    let mut latest: HashMap<&str, &PersistedRecord> = HashMap::with_capacity(records.len());

    for r in records {
        match latest.entry(r.entity_id.as_str()) {
            Entry::Occupied(mut e) => {
                if r.version >= e.get().version {
                    e.insert(r);
                }
            }
            Entry::Vacant(e) => {
                e.insert(r);
            }
        }
    }

    latest
        .into_values()
        .max_by(|a, b| {
            a.metric
                .cmp(&b.metric)
                .then_with(|| b.entity_id.cmp(&a.entity_id))
        })
        .map(HighestMetric::from)
}
