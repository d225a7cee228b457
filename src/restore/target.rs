//! Databases a restore can replay into.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::{Executor, Postgres};
use tokio::sync::{Mutex, Semaphore};

use super::sql::RESTORE_TABLES;
use super::{RestoreError, RestoreResult};

/// Opens a dedicated session for one restore run.
#[async_trait]
pub trait RestoreTarget: Send + Sync + 'static {
    async fn connect(&self) -> RestoreResult<Box<dyn RestoreSession>>;
}

/// One connection, used for the whole run so session settings stick.
#[async_trait]
pub trait RestoreSession: Send {
    /// Stop foreign keys and triggers from firing for this session.
    async fn disable_constraints(&mut self) -> RestoreResult<()>;

    async fn enable_constraints(&mut self) -> RestoreResult<()>;

    async fn begin(&mut self) -> RestoreResult<()>;

    async fn commit(&mut self) -> RestoreResult<()>;

    async fn rollback(&mut self) -> RestoreResult<()>;

    /// Delete every row of a restorable table. Returns rows removed.
    async fn clear_table(&mut self, table: &str) -> RestoreResult<u64>;

    async fn execute(&mut self, statement: &str) -> RestoreResult<()>;
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// PostgresRestoreTarget
// =============================================================================

pub struct PostgresRestoreTarget {
    pool: PgPool,
}

impl PostgresRestoreTarget {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RestoreTarget for PostgresRestoreTarget {
    async fn connect(&self) -> RestoreResult<Box<dyn RestoreSession>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PostgresRestoreSession { conn }))
    }
}

struct PostgresRestoreSession {
    conn: PoolConnection<Postgres>,
}

impl PostgresRestoreSession {
    async fn run(&mut self, sql: &str) -> RestoreResult<u64> {
        let result = (&mut *self.conn).execute(sql).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RestoreSession for PostgresRestoreSession {
    async fn disable_constraints(&mut self) -> RestoreResult<()> {
        self.run("SET session_replication_role = replica").await?;
        Ok(())
    }

    async fn enable_constraints(&mut self) -> RestoreResult<()> {
        self.run("SET session_replication_role = DEFAULT").await?;
        Ok(())
    }

    async fn begin(&mut self) -> RestoreResult<()> {
        self.run("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> RestoreResult<()> {
        self.run("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> RestoreResult<()> {
        self.run("ROLLBACK").await?;
        Ok(())
    }

    async fn clear_table(&mut self, table: &str) -> RestoreResult<u64> {
        assert!(
            RESTORE_TABLES.contains(&table),
            "refusing to clear non-restorable table {table}"
        );
        self.run(&format!("DELETE FROM {}", quote_ident(table))).await
    }

    async fn execute(&mut self, statement: &str) -> RestoreResult<()> {
        self.run(statement).await?;
        Ok(())
    }
}

// =============================================================================
// UnconfiguredRestoreTarget
// =============================================================================

/// Used when the service runs without a database.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRestoreTarget;

#[async_trait]
impl RestoreTarget for UnconfiguredRestoreTarget {
    async fn connect(&self) -> RestoreResult<Box<dyn RestoreSession>> {
        Err(RestoreError::Database("no database is configured".to_string()))
    }
}

// =============================================================================
// SimRestoreTarget
// =============================================================================

/// Records every session call. Can fail on a chosen statement and can hold
/// `connect` until released.
#[derive(Clone, Default)]
pub struct SimRestoreTarget {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl SimRestoreTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any statement containing `needle`.
    #[must_use]
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            fail_on: Some(needle.into()),
            ..Self::default()
        }
    }

    /// `connect` waits until [`release`](Self::release) is called.
    #[must_use]
    pub fn paused() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RestoreTarget for SimRestoreTarget {
    async fn connect(&self) -> RestoreResult<Box<dyn RestoreSession>> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| RestoreError::Database(e.to_string()))?
                .forget();
        }
        self.calls.lock().await.push("connect".to_string());
        Ok(Box::new(SimRestoreSession {
            calls: self.calls.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct SimRestoreSession {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl SimRestoreSession {
    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl RestoreSession for SimRestoreSession {
    async fn disable_constraints(&mut self) -> RestoreResult<()> {
        self.record("disable_constraints".to_string()).await;
        Ok(())
    }

    async fn enable_constraints(&mut self) -> RestoreResult<()> {
        self.record("enable_constraints".to_string()).await;
        Ok(())
    }

    async fn begin(&mut self) -> RestoreResult<()> {
        self.record("begin".to_string()).await;
        Ok(())
    }

    async fn commit(&mut self) -> RestoreResult<()> {
        self.record("commit".to_string()).await;
        Ok(())
    }

    async fn rollback(&mut self) -> RestoreResult<()> {
        self.record("rollback".to_string()).await;
        Ok(())
    }

    async fn clear_table(&mut self, table: &str) -> RestoreResult<u64> {
        assert!(
            RESTORE_TABLES.contains(&table),
            "refusing to clear non-restorable table {table}"
        );
        self.record(format!("clear {table}")).await;
        Ok(0)
    }

    async fn execute(&mut self, statement: &str) -> RestoreResult<()> {
        if self
            .fail_on
            .as_deref()
            .is_some_and(|needle| statement.contains(needle))
        {
            return Err(RestoreError::Database(format!(
                "simulated failure executing: {statement}"
            )));
        }
        self.record(format!("execute {statement}")).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn test_db_url() -> Option<String> {
        env::var("TEST_POSTGRES_URL").ok()
    }

    macro_rules! require_db {
        () => {
            match test_db_url() {
                Some(url) => url,
                None => {
                    eprintln!("Skipping test: TEST_POSTGRES_URL not set");
                    return;
                }
            }
        };
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("EventLink"), "\"EventLink\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn test_sim_records_calls() {
        let target = SimRestoreTarget::new();
        let mut session = target.connect().await.unwrap();
        session.begin().await.unwrap();
        session.clear_table("Tag").await.unwrap();
        session.execute("INSERT 1").await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(
            target.calls().await,
            vec!["connect", "begin", "clear Tag", "execute INSERT 1", "commit"]
        );
    }

    #[tokio::test]
    #[should_panic(expected = "refusing to clear non-restorable table")]
    async fn test_sim_refuses_audit_tables() {
        let target = SimRestoreTarget::new();
        let mut session = target.connect().await.unwrap();
        let _ = session.clear_table("BackupHistory").await;
    }

    #[tokio::test]
    async fn test_postgres_session_replays_insert() {
        use crate::storage::PostgresBackend;

        let url = require_db!();
        let backend = PostgresBackend::new(&url).await.unwrap();
        let target = PostgresRestoreTarget::new(backend.pool().clone());

        let name = format!("restore-{}", uuid::Uuid::new_v4());
        let insert = format!(
            "INSERT INTO \"Tag\" (\"TagID\", \"TagName\") VALUES ('{}', '{}') ON CONFLICT DO NOTHING",
            uuid::Uuid::new_v4(),
            name
        );

        let mut session = target.connect().await.unwrap();
        session.begin().await.unwrap();
        session.execute(&insert).await.unwrap();
        session.rollback().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM \"Tag\" WHERE \"TagName\" = $1")
            .bind(&name)
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(count, 0, "rolled back insert must not persist");

        backend.close().await;
    }
}
