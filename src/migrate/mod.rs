use anyhow::{bail, Context, Result};
use clickhouse_rs::{ClientHandle, Pool};
use tracing::info;

/// Forward-only schema step. `{table}` is replaced with the snapshot table.
struct Step {
    version: i64,
    sql: &'static str,
}

static STEPS: &[Step] = &[Step {
    version: 1,
    sql: include_str!("sql/001_entity_snapshots.up.sql"),
}];

/// Brings the snapshot table up to the newest embedded schema.
///
/// Progress is tracked in a golang-migrate style `schema_migrations` table,
/// so that tool can take over an existing deployment.
pub struct ClickHouseMigrator {
    pool: Pool,
    table: String,
}

impl ClickHouseMigrator {
    pub fn new(pool: Pool, table: String) -> Self {
        Self { pool, table }
    }

    /// Apply every step newer than the recorded version.
    ///
    /// Refuses to run when a previous attempt left the version dirty.
    pub async fn up(&self) -> Result<()> {
        let mut handle = self
            .pool
            .get_handle()
            .await
            .context("getting ClickHouse handle for migrations")?;

        handle
            .execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version Int64,
                    dirty UInt8,
                    sequence UInt64
                ) ENGINE = TinyLog",
            )
            .await
            .context("creating schema_migrations table")?;

        let (mut current, dirty) = recorded_version(&mut handle).await?;
        if dirty {
            bail!("schema version {current} is dirty; fix the table and reset schema_migrations");
        }

        let pending: Vec<&Step> = STEPS.iter().filter(|s| s.version > current).collect();
        if pending.is_empty() {
            info!(version = current, table = %self.table, "snapshot schema up to date");
            return Ok(());
        }

        for step in pending {
            info!(version = step.version, table = %self.table, "applying schema step");

            record_version(&mut handle, step.version, true).await?;
            for statement in statements(&render(step.sql, &self.table)) {
                handle
                    .execute(statement)
                    .await
                    .with_context(|| format!("schema step {} failed", step.version))?;
            }
            record_version(&mut handle, step.version, false).await?;

            current = step.version;
        }

        info!(version = current, "snapshot schema migrated");
        Ok(())
    }
}

async fn recorded_version(handle: &mut ClientHandle) -> Result<(i64, bool)> {
    let block = handle
        .query("SELECT version, dirty FROM schema_migrations ORDER BY sequence DESC LIMIT 1")
        .fetch_all()
        .await
        .context("reading schema_migrations")?;

    let Some(row) = block.rows().next() else {
        return Ok((0, false));
    };

    let version: i64 = row.get("version")?;
    let dirty: u8 = row.get("dirty")?;
    Ok((version, dirty != 0))
}

/// golang-migrate keeps a single row: truncate, then insert.
async fn record_version(handle: &mut ClientHandle, version: i64, dirty: bool) -> Result<()> {
    handle
        .execute("TRUNCATE TABLE schema_migrations")
        .await
        .context("truncating schema_migrations")?;

    let sql = format!(
        "INSERT INTO schema_migrations (version, dirty, sequence) VALUES ({version}, {}, 1)",
        u8::from(dirty)
    );
    handle
        .execute(sql.as_str())
        .await
        .context("recording schema version")?;

    Ok(())
}

fn render(sql: &str, table: &str) -> String {
    sql.replace("{table}", table)
}

fn statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}
