use thiserror::Error;

/// Errors returned by [`Store`](super::Store) implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("serializing entity payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("clickhouse: {0}")]
    ClickHouse(#[from] clickhouse_rs::errors::Error),

    #[error("no entity snapshots stored")]
    Empty,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
