use thiserror::Error;

use crate::storage::StoreError;

/// Fatal errors surfaced by the entity scheduler's driving loop.
///
/// Source exhaustion and timer races are not errors.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("persisting {entity_id} version {version}: {source}")]
    Persistence {
        entity_id: String,
        version: i64,
        #[source]
        source: StoreError,
    },

    #[error("querying highest-metric entity: {0}")]
    AggregateQuery(#[source] StoreError),

    #[error("interrupted before the event source was drained")]
    Interrupted,
}
