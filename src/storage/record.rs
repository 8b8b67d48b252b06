use chrono::{DateTime, Utc};

use crate::event::EntityEvent;

use super::StoreError;

/// Storage-side projection of an [`EntityEvent`].
///
/// Created once per processed event and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub metric: i64,
    pub callback_delay_ms: i64,
    pub version: i64,
    /// Event payload serialized as JSON.
    pub data: String,
    pub inserted_at: DateTime<Utc>,
}

impl PersistedRecord {
    /// Project an event into a record stamped with the current time.
    pub fn from_event(event: &EntityEvent) -> Result<Self, StoreError> {
        Self::from_event_at(event, Utc::now())
    }

    /// Project an event into a record stamped with `inserted_at`.
    pub fn from_event_at(
        event: &EntityEvent,
        inserted_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let data = serde_json::to_string(&event.data)?;

        Ok(Self {
            entity_id: event.entity_id.clone(),
            entity_type: event.entity_type.as_str().to_string(),
            metric: event.metric,
            callback_delay_ms: event.callback_delay_ms,
            version: event.version,
            data,
            inserted_at,
        })
    }
}

/// Result of the highest-metric aggregate query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighestMetric {
    pub entity_id: String,
    pub metric: i64,
    pub version: i64,
}

impl From<&PersistedRecord> for HighestMetric {
    fn from(r: &PersistedRecord) -> Self {
        Self {
            entity_id: r.entity_id.clone(),
            metric: r.metric,
            version: r.version,
        }
    }
}
