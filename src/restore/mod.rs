//! Restore - replay a backup over the live data
//!
//! TigerStyle: One run at a time, progress recorded at every step,
//! constraints re-enabled on every path.
//!
//! # Progress
//!
//! ```text
//!  10 download ─► 20 plan ─► 30 disable constraints ─► 40 clear tables
//!     ─► 40..90 replay ─► 95 commit ─► 100 completed
//! ```
//!
//! Any failure rolls the transaction back and marks the operation failed.

mod sql;
mod target;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{BackupHistory, RestoreOperation, RestoreStatus, User};
use crate::objstore::{ObjectError, ObjectStore};
use crate::storage::{StorageBackend, StorageError};

pub use sql::{
    classify, patch_insert, split_statements, RestorePlan, SkipCounts, StatementKind,
    AUDIT_TABLES, BOOKKEEPING_TABLES, RESTORE_TABLES,
};
pub use target::{
    PostgresRestoreTarget, RestoreSession, RestoreTarget, SimRestoreTarget,
    UnconfiguredRestoreTarget,
};

// =============================================================================
// TigerStyle Constants
// =============================================================================

pub const PROGRESS_DOWNLOADED: i32 = 10;
pub const PROGRESS_PLANNED: i32 = 20;
pub const PROGRESS_CONSTRAINTS_DISABLED: i32 = 30;
pub const PROGRESS_TABLES_CLEARED: i32 = 40;
pub const PROGRESS_REPLAYED: i32 = 90;
pub const PROGRESS_COMMITTED: i32 = 95;

pub const MSG_BACKUP_NOT_FOUND: &str = "Backup not found.";
pub const MSG_NOT_RESTORABLE: &str = "Only completed backups with a backup file can be restored.";
pub const MSG_RESTORE_NOT_FOUND: &str = "Restore operation not found.";
pub const MSG_INTERRUPTED: &str = "Restore interrupted by a server restart.";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotRestorable(String),

    #[error("A restore is already in progress.")]
    AlreadyRunning(Uuid),

    #[error("backup file is not valid UTF-8 SQL: {0}")]
    InvalidScript(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RestoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type RestoreResult<T> = Result<T, RestoreError>;

// =============================================================================
// Types
// =============================================================================

/// Polled by clients while a restore runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreProgress {
    pub status: RestoreStatus,
    pub progress: i32,
    pub message: Option<String>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&RestoreOperation> for RestoreProgress {
    fn from(op: &RestoreOperation) -> Self {
        Self {
            status: op.status,
            progress: op.progress,
            message: op.message.clone(),
            completed_at: op.completed_at,
        }
    }
}

/// A restore that has been accepted and is running in the background.
pub struct StartedRestore {
    pub operation: RestoreOperation,
    pub task: JoinHandle<()>,
}

// =============================================================================
// RestoreService
// =============================================================================

pub struct RestoreService {
    storage: Arc<dyn StorageBackend>,
    objects: Arc<dyn ObjectStore>,
    target: Arc<dyn RestoreTarget>,
    clock: Arc<dyn Clock>,
    /// Serializes the in-progress check with the insert
    start_lock: Mutex<()>,
}

impl RestoreService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        objects: Arc<dyn ObjectStore>,
        target: Arc<dyn RestoreTarget>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            objects,
            target,
            clock,
            start_lock: Mutex::new(()),
        }
    }

    /// Mark restores left in progress by a previous process as failed.
    pub async fn recover_interrupted(&self) -> RestoreResult<usize> {
        let mut recovered = 0;
        for mut op in self.storage.list_restores().await? {
            if op.is_in_progress() {
                op.fail(MSG_INTERRUPTED, self.clock.now());
                self.storage.update_restore(&op).await?;
                tracing::warn!(restore_id = %op.id, "marked interrupted restore as failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Validate the request, record an in-progress operation and spawn the run.
    pub async fn start_restore(
        self: &Arc<Self>,
        admin: &User,
        backup_id: Uuid,
    ) -> RestoreResult<StartedRestore> {
        if !admin.is_admin {
            return Err(RestoreError::Forbidden(
                "Access denied. Admin privileges required.".to_string(),
            ));
        }

        let backup = self
            .storage
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| RestoreError::NotFound(MSG_BACKUP_NOT_FOUND.to_string()))?;
        let Some(file_key) = backup.file_key.clone().filter(|_| backup.is_restorable()) else {
            return Err(RestoreError::NotRestorable(MSG_NOT_RESTORABLE.to_string()));
        };

        let operation = {
            let _guard = self.start_lock.lock().await;
            if let Some(running) = self
                .storage
                .list_restores()
                .await?
                .into_iter()
                .find(RestoreOperation::is_in_progress)
            {
                return Err(RestoreError::AlreadyRunning(running.id));
            }
            let operation = RestoreOperation::start(backup.id, self.clock.now());
            self.storage.insert_restore(&operation).await?;
            operation
        };

        tracing::info!(
            restore_id = %operation.id,
            backup = %backup.name,
            admin_id = %admin.id,
            "restore started"
        );

        let service = Arc::clone(self);
        let running = operation.clone();
        let task = tokio::spawn(async move {
            service.run(running, backup, file_key).await;
        });

        Ok(StartedRestore { operation, task })
    }

    /// Execute a restore to completion and record the final state.
    pub async fn run(&self, mut operation: RestoreOperation, backup: BackupHistory, file_key: String) {
        assert!(operation.is_in_progress(), "restore already finished");

        let result = self.execute(&mut operation, &backup, &file_key).await;
        let now = self.clock.now();
        match result {
            Ok(summary) => {
                tracing::info!(restore_id = %operation.id, "{summary}");
                operation.complete(summary, now);
            }
            Err(e) => {
                tracing::error!(restore_id = %operation.id, error = %e, "restore failed");
                operation.fail(format!("Restore failed: {e}"), now);
            }
        }

        if let Err(e) = self.storage.update_restore(&operation).await {
            tracing::error!(restore_id = %operation.id, error = %e, "failed to record restore outcome");
        }
    }

    async fn report(
        &self,
        operation: &mut RestoreOperation,
        progress: i32,
        message: &str,
    ) -> RestoreResult<()> {
        operation.advance(progress, message);
        self.storage.update_restore(operation).await?;
        tracing::debug!(restore_id = %operation.id, progress, "{message}");
        Ok(())
    }

    async fn execute(
        &self,
        operation: &mut RestoreOperation,
        backup: &BackupHistory,
        file_key: &str,
    ) -> RestoreResult<String> {
        let bytes = self.objects.get(file_key).await?;
        self.report(operation, PROGRESS_DOWNLOADED, "Backup file downloaded.")
            .await?;

        let script = String::from_utf8(bytes).map_err(|e| RestoreError::InvalidScript(e.to_string()))?;
        let plan = RestorePlan::from_script(&script);
        self.report(
            operation,
            PROGRESS_PLANNED,
            &format!("Prepared {} statements.", plan.statements.len()),
        )
        .await?;

        let mut session = self.target.connect().await?;
        session.disable_constraints().await?;

        let replayed = self.replay(session.as_mut(), &plan, operation).await;
        let enabled = session.enable_constraints().await;
        if let Err(e) = &enabled {
            tracing::error!(restore_id = %operation.id, error = %e, "failed to re-enable constraints");
        }
        replayed?;
        enabled?;

        Ok(format!(
            "Restore from {} completed: {} rows restored into {} tables, {} statements skipped.",
            backup.name,
            plan.inserts,
            plan.tables.len(),
            plan.skipped.total()
        ))
    }

    /// Clear and replay inside one transaction.
    async fn replay(
        &self,
        session: &mut dyn RestoreSession,
        plan: &RestorePlan,
        operation: &mut RestoreOperation,
    ) -> RestoreResult<()> {
        self.report(operation, PROGRESS_CONSTRAINTS_DISABLED, "Constraints disabled.")
            .await?;
        session.begin().await?;

        match self.apply(session, plan, operation).await {
            Ok(()) => {
                session.commit().await?;
                self.report(operation, PROGRESS_COMMITTED, "Changes committed.")
                    .await
            }
            Err(e) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::error!(restore_id = %operation.id, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        session: &mut dyn RestoreSession,
        plan: &RestorePlan,
        operation: &mut RestoreOperation,
    ) -> RestoreResult<()> {
        let mut cleared = 0;
        for table in RESTORE_TABLES {
            cleared += session.clear_table(table).await?;
        }
        self.report(
            operation,
            PROGRESS_TABLES_CLEARED,
            &format!("Deleted {cleared} existing rows."),
        )
        .await?;

        let total = plan.statements.len();
        let span = i64::from(PROGRESS_REPLAYED - PROGRESS_TABLES_CLEARED);
        let mut reported = PROGRESS_TABLES_CLEARED;
        for (done, statement) in plan.statements.iter().enumerate() {
            session.execute(statement).await?;

            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let progress = PROGRESS_TABLES_CLEARED
                + (span * (done as i64 + 1) / total as i64) as i32;
            if progress > reported {
                reported = progress;
                self.report(
                    operation,
                    progress,
                    &format!("Replayed {} of {total} statements.", done + 1),
                )
                .await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn status(&self, id: Uuid) -> RestoreResult<RestoreProgress> {
        self.storage
            .get_restore(id)
            .await?
            .map(|op| RestoreProgress::from(&op))
            .ok_or_else(|| RestoreError::NotFound(MSG_RESTORE_NOT_FOUND.to_string()))
    }

    /// All restore operations, newest first.
    pub async fn operations(&self) -> RestoreResult<Vec<RestoreOperation>> {
        Ok(self.storage.list_restores().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::models::{BackupStatus, RoleName};
    use crate::objstore::FsObjectStore;
    use crate::storage::SimStorageBackend;
    use chrono::{TimeZone, Utc};

    const KEY: &str = "backups/2025-06-02/db_backup_20250602_003005.sql";

    const SCRIPT: &str = r#"SET client_encoding = 'UTF8';
INSERT INTO public."Role" ("RoleID", "RoleName") VALUES ('6f1c9e1a-8d4b-4c8e-9a57-1f0e2d3c4b5a', 'Admin');
INSERT INTO public."Event" ("EventID", "EventTitle") VALUES ('0b7e4c1d-2a3f-4e5d-8c9b-a1b2c3d4e5f6', 'Career Fair');
INSERT INTO public."RestoreOperation" ("RestoreID") VALUES ('1b7e4c1d-2a3f-4e5d-8c9b-a1b2c3d4e5f6');
"#;

    struct Fixture {
        service: Arc<RestoreService>,
        storage: Arc<SimStorageBackend>,
        admin: User,
        backup: BackupHistory,
        _bucket: tempfile::TempDir,
    }

    async fn fixture(target: SimRestoreTarget) -> Fixture {
        let bucket = tempfile::tempdir().unwrap();
        let objects = Arc::new(FsObjectStore::new(bucket.path()));
        objects.put(KEY, SCRIPT.as_bytes().to_vec()).await.unwrap();

        let storage = Arc::new(SimStorageBackend::new());
        let clock = Arc::new(SimClock::at(
            Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap(),
        ));

        let backup = BackupHistory::new(
            "Backup_20250602_003005".to_string(),
            BackupStatus::Completed,
            clock.now(),
            Some("0.01 MB".to_string()),
            Some(KEY.to_string()),
            Some("logs/2025-06-02/backup_log_20250602_003005.txt".to_string()),
        );
        storage.insert_backup(&backup).await.unwrap();

        let role = storage.get_or_create_role(RoleName::Admin.as_str()).await.unwrap();
        let mut admin = User::new(
            role.id,
            "Ada Admin".to_string(),
            "ada@cit.edu".to_string(),
            "$argon2id$x".to_string(),
            clock.now(),
        );
        admin.is_admin = true;
        admin.is_active = true;

        let service = Arc::new(RestoreService::new(
            storage.clone(),
            objects,
            Arc::new(target),
            clock,
        ));
        Fixture {
            service,
            storage,
            admin,
            backup,
            _bucket: bucket,
        }
    }

    #[tokio::test]
    async fn test_successful_restore() {
        let target = SimRestoreTarget::new();
        let fx = fixture(target.clone()).await;

        let started = fx.service.start_restore(&fx.admin, fx.backup.id).await.unwrap();
        assert_eq!(started.operation.progress, 0);
        started.task.await.unwrap();

        let status = fx.service.status(started.operation.id).await.unwrap();
        assert_eq!(status.status, RestoreStatus::Completed);
        assert_eq!(status.progress, 100);
        assert!(status.completed_at.is_some());
        assert_eq!(
            status.message.as_deref(),
            Some(
                "Restore from Backup_20250602_003005 completed: 2 rows restored into 2 tables, \
                 2 statements skipped."
            )
        );

        let calls = target.calls().await;
        assert_eq!(calls[0], "connect");
        assert_eq!(calls[1], "disable_constraints");
        assert_eq!(calls[2], "begin");
        assert_eq!(calls[3], "clear EventLink");
        assert_eq!(calls[10], "clear Role");
        assert!(calls[11].starts_with("execute INSERT INTO public.\"Role\""));
        assert!(calls[11].ends_with("ON CONFLICT DO NOTHING"));
        assert_eq!(&calls[13..], ["commit", "enable_constraints"]);
        assert!(!calls.iter().any(|c| c.contains("RestoreOperation")));
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_and_reenables() {
        let target = SimRestoreTarget::failing_on("Career Fair");
        let fx = fixture(target.clone()).await;

        let started = fx.service.start_restore(&fx.admin, fx.backup.id).await.unwrap();
        started.task.await.unwrap();

        let op = fx.storage.get_restore(started.operation.id).await.unwrap().unwrap();
        assert_eq!(op.status, RestoreStatus::Failed);
        assert!(op.completed_at.is_some());
        assert!(op
            .message
            .as_deref()
            .unwrap()
            .starts_with("Restore failed: database error: simulated failure"));
        assert!(op.progress >= PROGRESS_TABLES_CLEARED && op.progress < 100);

        let calls = target.calls().await;
        assert!(!calls.contains(&"commit".to_string()));
        assert_eq!(&calls[calls.len() - 2..], ["rollback", "enable_constraints"]);
    }

    #[tokio::test]
    async fn test_refuses_concurrent_restore() {
        let target = SimRestoreTarget::paused();
        let fx = fixture(target.clone()).await;

        let first = fx.service.start_restore(&fx.admin, fx.backup.id).await.unwrap();
        let err = fx
            .service
            .start_restore(&fx.admin, fx.backup.id)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RestoreError::AlreadyRunning(id) if id == first.operation.id));

        target.release();
        first.task.await.unwrap();
        assert!(fx.service.start_restore(&fx.admin, fx.backup.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_unusable_backups() {
        let fx = fixture(SimRestoreTarget::new()).await;

        let err = fx.service.start_restore(&fx.admin, Uuid::new_v4()).await.err().unwrap();
        assert!(matches!(err, RestoreError::NotFound(_)));

        let failed = BackupHistory::failed("Backup_bad".to_string(), Utc::now());
        fx.storage.insert_backup(&failed).await.unwrap();
        let err = fx.service.start_restore(&fx.admin, failed.id).await.err().unwrap();
        assert_eq!(err.to_string(), MSG_NOT_RESTORABLE);

        let mut staff = fx.admin.clone();
        staff.is_admin = false;
        let err = fx.service.start_restore(&staff, fx.backup.id).await.err().unwrap();
        assert!(matches!(err, RestoreError::Forbidden(_)));

        assert!(fx.service.operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let fx = fixture(SimRestoreTarget::new()).await;
        let stale = RestoreOperation::start(fx.backup.id, Utc::now());
        fx.storage.insert_restore(&stale).await.unwrap();

        assert_eq!(fx.service.recover_interrupted().await.unwrap(), 1);
        let status = fx.service.status(stale.id).await.unwrap();
        assert_eq!(status.status, RestoreStatus::Failed);
        assert_eq!(status.message.as_deref(), Some(MSG_INTERRUPTED));
    }
}
