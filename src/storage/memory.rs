use parking_lot::Mutex;

use super::{select_highest, HighestMetric, PersistedRecord, Store, StoreError};

/// In-process append-only store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records in insertion order.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn highest_metric_entity(&self) -> Result<HighestMetric, StoreError> {
        let records = self.records.lock();
        select_highest(&records).ok_or(StoreError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EntityEvent, EntityType};

    fn record(id: &str, metric: i64, version: i64) -> PersistedRecord {
        let ev = EntityEvent::new(id, EntityType::Account, metric, 0, version);
        PersistedRecord::from_event(&ev).expect("project")
    }

    #[tokio::test]
    async fn test_append_preserves_insertion_order() {
        let store = MemoryStore::new();
        store.append(&record("b", 1, 1)).await.expect("append");
        store.append(&record("a", 2, 1)).await.expect("append");
        store.append(&record("b", 3, 2)).await.expect("append");

        let ids: Vec<_> = store
            .records()
            .into_iter()
            .map(|r| (r.entity_id, r.version))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("b".to_string(), 1),
                ("a".to_string(), 1),
                ("b".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_store_query_fails() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        let err = store.highest_metric_entity().await.unwrap_err();
        assert!(matches!(err, StoreError::Empty));
    }

    #[tokio::test]
    async fn test_highest_metric_three_entities() {
        let store = MemoryStore::new();
        store.append(&record("x", 10, 1)).await.expect("append");
        store.append(&record("y", 50, 1)).await.expect("append");
        store.append(&record("z", 30, 1)).await.expect("append");

        let top = store.highest_metric_entity().await.expect("query");
        assert_eq!(top.entity_id, "y");
        assert_eq!(top.metric, 50);
        assert_eq!(store.len(), 3);
    }
}
