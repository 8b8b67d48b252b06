use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use clickhouse_rs::Pool;
use tracing::{debug, info};

use crate::config::ClickHouseConfig;

use super::{HighestMetric, PersistedRecord, Store, StoreError};

/// ClickHouse-backed snapshot store.
///
/// One INSERT per append. Each row carries the process-local append sequence
/// so equal-version rows written within the same millisecond still order by
/// arrival; the aggregate query resolves every entity to its latest row with
/// `argMax` and orders metric ties by entity id.
pub struct ClickHouseStore {
    pool: Pool,
    database: String,
    table: String,
    seq: AtomicU64,
}

impl ClickHouseStore {
    /// Creates a store writing to `database.table` through `pool`.
    pub fn new(pool: Pool, database: String, table: String) -> Self {
        Self {
            pool,
            database,
            table,
            seq: AtomicU64::new(0),
        }
    }

    /// Opens a pool for `cfg` and pings the server before returning.
    pub async fn connect(cfg: &ClickHouseConfig) -> Result<Self, StoreError> {
        let pool = Pool::new(native_dsn(cfg));

        let mut handle = pool.get_handle().await?;
        handle.ping().await?;

        info!(
            endpoint = %cfg.endpoint,
            database = %cfg.database,
            table = %cfg.table,
            "connected to clickhouse",
        );

        Ok(Self::new(pool, cfg.database.clone(), cfg.table.clone()))
    }

    /// Connection pool shared with the migrator.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn insert_sql(&self, record: &PersistedRecord, seq: u64) -> String {
        let table = self.qualified_table();
        let mut sql = String::with_capacity(176 + table.len() + record.data.len());
        let _ = write!(
            sql,
            "INSERT INTO {table} (inserted_at, seq, entity_id, entity_type, metric, callback_delay_ms, version, data) \
             VALUES ({}, {seq}, '{}', '{}', {}, {}, {}, '{}')",
            format_datetime(record.inserted_at),
            escape_sql(&record.entity_id),
            escape_sql(&record.entity_type),
            record.metric,
            record.callback_delay_ms,
            record.version,
            escape_sql(&record.data),
        );
        sql
    }

    fn highest_sql(&self) -> String {
        format!(
            "SELECT entity_id, \
                    argMax(metric, (version, inserted_at, seq)) AS latest_metric, \
                    max(version) AS latest_version \
             FROM {} \
             GROUP BY entity_id \
             ORDER BY latest_metric DESC, entity_id ASC \
             LIMIT 1",
            self.qualified_table()
        )
    }
}

impl Store for ClickHouseStore {
    fn name(&self) -> &str {
        "clickhouse"
    }

    async fn append(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let sql = self.insert_sql(record, seq);
        let mut handle = self.pool.get_handle().await?;
        handle.execute(sql.as_str()).await?;

        debug!(
            id = %record.entity_id,
            version = record.version,
            seq,
            "snapshot inserted into clickhouse",
        );

        Ok(())
    }

    async fn highest_metric_entity(&self) -> Result<HighestMetric, StoreError> {
        let sql = self.highest_sql();
        let mut handle = self.pool.get_handle().await?;
        let block = handle.query(sql.as_str()).fetch_all().await?;

        let Some(row) = block.rows().next() else {
            return Err(StoreError::Empty);
        };

        Ok(HighestMetric {
            entity_id: row.get("entity_id")?,
            metric: row.get("latest_metric")?,
            version: row.get("latest_version")?,
        })
    }
}

/// Native TCP DSN for clickhouse-rs: `tcp://[user[:pass]@]host:port/db?opts`.
///
/// A single sequential writer only ever needs one connection.
fn native_dsn(cfg: &ClickHouseConfig) -> String {
    let auth = match (cfg.username.is_empty(), cfg.password.is_empty()) {
        (true, _) => String::new(),
        (false, true) => format!("{}@", cfg.username),
        (false, false) => format!("{}:{}@", cfg.username, cfg.password),
    };

    format!(
        "tcp://{auth}{}/{}?compression=lz4&pool_min=1&pool_max=1",
        cfg.endpoint, cfg.database
    )
}

/// Formats a timestamp as a ClickHouse DateTime64(3) literal.
fn format_datetime(t: DateTime<Utc>) -> String {
    format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.3f"))
}

/// Escapes a string value for SQL insertion (single-quote escaping).
fn escape_sql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::event::{EntityEvent, EntityType};

    fn store() -> ClickHouseStore {
        let pool = Pool::new("tcp://localhost:9000/indexer".to_string());
        ClickHouseStore::new(pool, "indexer".to_string(), "entity_snapshots".to_string())
    }

    #[test]
    fn test_format_datetime() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(format_datetime(t), "'1970-01-01 00:00:00.000'");
    }

    #[test]
    fn test_escape_sql() {
        assert_eq!(escape_sql("hello"), "hello");
        assert_eq!(escape_sql("it's"), "it\\'s");
        assert_eq!(escape_sql("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_native_dsn_auth_variants() {
        let mut cfg = ClickHouseConfig {
            database: "idx".to_string(),
            ..Default::default()
        };
        assert_eq!(
            native_dsn(&cfg),
            "tcp://localhost:9000/idx?compression=lz4&pool_min=1&pool_max=1"
        );

        cfg.username = "writer".to_string();
        assert!(native_dsn(&cfg).starts_with("tcp://writer@localhost:9000/idx?"));

        cfg.password = "pw".to_string();
        assert!(native_dsn(&cfg).starts_with("tcp://writer:pw@localhost:9000/idx?"));
    }

    #[tokio::test]
    async fn test_insert_sql_escapes_payload() {
        let mut ev = EntityEvent::new("e'1", EntityType::Auction, 5, 100, 2);
        ev.data = serde_json::json!({"img": "o'neil.png"});
        let at = Utc.timestamp_opt(0, 0).unwrap();
        let rec = PersistedRecord::from_event_at(&ev, at).expect("project");

        let sql = store().insert_sql(&rec, 7);
        assert!(sql.starts_with("INSERT INTO indexer.entity_snapshots ("));
        assert!(sql.contains("'1970-01-01 00:00:00.000', 7, 'e\\'1', 'auction', 5, 100, 2,"));
        assert!(sql.contains("o\\'neil.png"));
    }

    #[tokio::test]
    async fn test_same_millisecond_rows_get_increasing_seq() {
        let store = store();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = PersistedRecord::from_event_at(
            &EntityEvent::new("e1", EntityType::Mint, 90, 0, 1),
            at,
        )
        .expect("project");
        let second = PersistedRecord::from_event_at(
            &EntityEvent::new("e1", EntityType::Mint, 20, 0, 1),
            at,
        )
        .expect("project");

        // Mirrors what append does before each INSERT.
        let a = store.seq.fetch_add(1, Ordering::Relaxed);
        let b = store.seq.fetch_add(1, Ordering::Relaxed);
        assert!(b > a);

        let sql_a = store.insert_sql(&first, a);
        let sql_b = store.insert_sql(&second, b);
        assert!(sql_a.contains(&format!("'2023-11-14 22:13:20.000', {a}, 'e1'")));
        assert!(sql_b.contains(&format!("'2023-11-14 22:13:20.000', {b}, 'e1'")));

        // The sequence breaks the (version, inserted_at) tie in the query.
        assert!(store
            .highest_sql()
            .contains("argMax(metric, (version, inserted_at, seq))"));
    }

    #[tokio::test]
    async fn test_highest_sql_orders_ties_by_entity_id() {
        let sql = store().highest_sql();
        assert!(sql.contains("FROM indexer.entity_snapshots"));
        assert!(sql.contains("ORDER BY latest_metric DESC, entity_id ASC"));
        assert!(sql.ends_with("LIMIT 1"));
    }
}
