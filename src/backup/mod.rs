//! Backup - data-only dumps shipped to object storage
//!
//! TigerStyle: Every attempt leaves an audit row; local files never outlive the run.
//!
//! # Flow
//!
//! ```text
//! Dumper ──► {backup_dir}/db_backup_{ts}.sql ──► ObjectStore backups/{date}/…
//!                                                         │
//! BackupLog ─► {log_dir}/backup_log_{ts}.txt ─► ObjectStore logs/{date}/…
//!                                                         │
//!                                              StorageBackend.insert_backup
//! ```

mod dump;
mod log;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{BackupHistory, BackupStatus, RestoreOperation};
use crate::objstore::{key_filename, object_key, ObjectError, ObjectStore, BACKUPS_FOLDER, LOGS_FOLDER};
use crate::storage::{StorageBackend, StorageError};

pub use dump::{DumpError, Dumper, PgDump, UnconfiguredDumper};
pub use log::{BackupLog, LogLevel};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Bytes per reported megabyte
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub const MSG_BACKUP_NOT_FOUND: &str = "Backup not found.";
pub const MSG_BACKUP_FILE_MISSING: &str = "Backup file not available.";
pub const MSG_LOG_FILE_MISSING: &str = "Log file not available.";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BackupResult<T> = Result<T, BackupError>;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result of one backup run as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    pub backup: BackupHistory,
}

/// A backup row with its display label.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    #[serde(flatten)]
    pub backup: BackupHistory,
    /// `"{name} - {YYYY-MM-DD HH:MM:SS}"`
    pub display: String,
}

/// Totals and latest activity for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct BackupDashboard {
    pub total_backups: usize,
    pub completed_backups: usize,
    pub failed_backups: usize,
    pub latest_backup: Option<BackupEntry>,
    pub latest_restore: Option<RestoreOperation>,
}

/// A downloaded dump.
#[derive(Debug, Clone)]
pub struct BackupFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Where local files go and how times are shown.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub display_offset: FixedOffset,
}

// =============================================================================
// BackupService
// =============================================================================

pub struct BackupService {
    storage: Arc<dyn StorageBackend>,
    objects: Arc<dyn ObjectStore>,
    dumper: Arc<dyn Dumper>,
    clock: Arc<dyn Clock>,
    settings: BackupSettings,
}

/// Names derived from one run's timestamp.
struct RunNames {
    name: String,
    backup_path: PathBuf,
    log_path: PathBuf,
    date: NaiveDate,
}

impl BackupService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        objects: Arc<dyn ObjectStore>,
        dumper: Arc<dyn Dumper>,
        clock: Arc<dyn Clock>,
        settings: BackupSettings,
    ) -> Self {
        Self {
            storage,
            objects,
            dumper,
            clock,
            settings,
        }
    }

    fn run_names(&self) -> RunNames {
        let local = self.clock.now_in(self.settings.display_offset);
        let ts = local.format("%Y%m%d_%H%M%S").to_string();
        RunNames {
            name: format!("Backup_{ts}"),
            backup_path: self.settings.backup_dir.join(format!("db_backup_{ts}.sql")),
            log_path: self.settings.log_dir.join(format!("backup_log_{ts}.txt")),
            date: local.date_naive(),
        }
    }

    /// Dump, upload, and record one backup. Only storage failures while
    /// recording the audit row surface as `Err`.
    pub async fn run_backup(&self) -> BackupResult<BackupOutcome> {
        let names = self.run_names();
        let mut log = BackupLog::new(self.clock.clone(), self.settings.display_offset);
        log.info("Starting backup...");

        let result = self.dump_and_upload(&names, &mut log).await;

        remove_if_exists(&names.backup_path).await;
        remove_if_exists(&names.log_path).await;

        let outcome = match result {
            Ok(backup) => {
                self.storage.insert_backup(&backup).await?;
                log.info("Backup record saved in the database.");
                if backup.status == BackupStatus::Completed {
                    BackupOutcome {
                        status: OutcomeStatus::Success,
                        message: format!("{} completed!", backup.name),
                        backup,
                    }
                } else {
                    BackupOutcome {
                        status: OutcomeStatus::Error,
                        message: format!("{} failed: upload did not complete.", backup.name),
                        backup,
                    }
                }
            }
            Err(message) => {
                let backup = BackupHistory::failed(names.name.clone(), self.clock.now());
                self.storage.insert_backup(&backup).await?;
                BackupOutcome {
                    status: OutcomeStatus::Error,
                    message,
                    backup,
                }
            }
        };

        tracing::info!(
            backup = %outcome.backup.name,
            status = %outcome.backup.status.as_str(),
            "backup run finished"
        );
        Ok(outcome)
    }

    /// `Err` carries the message shown to the user.
    async fn dump_and_upload(
        &self,
        names: &RunNames,
        log: &mut BackupLog,
    ) -> Result<BackupHistory, String> {
        for dir in [&self.settings.backup_dir, &self.settings.log_dir] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                log.error(format!("An error occurred during backup: {e}"));
                return Err(e.to_string());
            }
        }

        let filename = key_filename(&names.backup_path.display().to_string()).to_string();
        log.info(format!("Creating backup file: {filename}"));

        if let Err(e) = self.dumper.dump(&names.backup_path).await {
            let detail = e.detail();
            log.error(format!("Backup failed:\n{detail}"));
            return Err(detail);
        }
        log.info(format!("Data backup completed successfully: {filename}"));

        let size_bytes = match tokio::fs::metadata(&names.backup_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                log.error(format!("An error occurred during backup: {e}"));
                return Err(e.to_string());
            }
        };

        log.info("Uploading backup file to cloud...");
        let file_key = self
            .upload(&names.backup_path, BACKUPS_FOLDER, names.date, log)
            .await;

        if let Err(e) = tokio::fs::write(&names.log_path, log.contents()).await {
            log.error(format!("An error occurred during backup: {e}"));
            return Err(e.to_string());
        }
        let log_key = self.upload(&names.log_path, LOGS_FOLDER, names.date, log).await;

        let status = if file_key.is_some() && log_key.is_some() {
            BackupStatus::Completed
        } else {
            BackupStatus::Failed
        };

        #[allow(clippy::cast_precision_loss)]
        let size = format!("{:.2} MB", size_bytes as f64 / BYTES_PER_MB);

        Ok(BackupHistory::new(
            names.name.clone(),
            status,
            self.clock.now(),
            Some(size),
            file_key,
            log_key,
        ))
    }

    /// Upload one local file. Failures are logged and yield `None`.
    async fn upload(
        &self,
        path: &Path,
        folder: &str,
        date: NaiveDate,
        log: &mut BackupLog,
    ) -> Option<String> {
        match self.objects.ensure_bucket().await {
            Ok(true) => log.info(format!("Created {}.", self.objects.describe())),
            Ok(false) => {}
            Err(e) => {
                log.error(e.to_string());
                return None;
            }
        }

        let display = path.display().to_string();
        let filename = key_filename(&display);
        let body = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log.error(format!("File not found: {display}"));
                return None;
            }
            Err(e) => {
                log.error(format!("Upload failed: {e}"));
                return None;
            }
        };

        let key = object_key(folder, date, filename);
        log.info(format!("Uploading {filename} to {}...", self.objects.describe()));
        match self.objects.put(&key, body).await {
            Ok(()) => {
                log.info(format!("Upload successful: {}", self.objects.location(&key)));
                Some(key)
            }
            Err(e) => {
                log.error(format!("Upload failed: {e}"));
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn entry(&self, backup: BackupHistory) -> BackupEntry {
        let display = backup.display(self.settings.display_offset);
        BackupEntry { backup, display }
    }

    /// All backups, newest first.
    pub async fn list(&self) -> BackupResult<Vec<BackupEntry>> {
        let backups = self.storage.list_backups().await?;
        Ok(backups.into_iter().map(|b| self.entry(b)).collect())
    }

    /// Backups that can feed a restore, newest first.
    pub async fn restorable(&self) -> BackupResult<Vec<BackupEntry>> {
        let backups = self.storage.list_backups().await?;
        Ok(backups
            .into_iter()
            .filter(BackupHistory::is_restorable)
            .map(|b| self.entry(b))
            .collect())
    }

    pub async fn dashboard(&self) -> BackupResult<BackupDashboard> {
        let backups = self.storage.list_backups().await?;
        let completed_backups = backups
            .iter()
            .filter(|b| b.status == BackupStatus::Completed)
            .count();
        let failed_backups = backups
            .iter()
            .filter(|b| b.status == BackupStatus::Failed)
            .count();
        let total_backups = backups.len();
        let latest_backup = backups.into_iter().next().map(|b| self.entry(b));
        let latest_restore = self.storage.list_restores().await?.into_iter().next();

        assert_eq!(total_backups, completed_backups + failed_backups);
        Ok(BackupDashboard {
            total_backups,
            completed_backups,
            failed_backups,
            latest_backup,
            latest_restore,
        })
    }

    async fn backup(&self, id: Uuid) -> BackupResult<BackupHistory> {
        self.storage
            .get_backup(id)
            .await?
            .ok_or_else(|| BackupError::NotFound(MSG_BACKUP_NOT_FOUND.to_string()))
    }

    /// The dump file of a backup.
    pub async fn download(&self, id: Uuid) -> BackupResult<BackupFile> {
        let backup = self.backup(id).await?;
        let key = backup
            .file_key
            .ok_or_else(|| BackupError::NotFound(MSG_BACKUP_FILE_MISSING.to_string()))?;
        let bytes = self.objects.get(&key).await?;
        Ok(BackupFile {
            filename: key_filename(&key).to_string(),
            bytes,
        })
    }

    /// The run log of a backup as text.
    pub async fn view_log(&self, id: Uuid) -> BackupResult<String> {
        let backup = self.backup(id).await?;
        let key = backup
            .log_key
            .ok_or_else(|| BackupError::NotFound(MSG_LOG_FILE_MISSING.to_string()))?;
        let bytes = self.objects.get(&key).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove local file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::objstore::{FsObjectStore, UnconfiguredObjectStore};
    use crate::storage::SimStorageBackend;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    const DUMP_SQL: &str = "INSERT INTO public.\"Role\" (\"RoleID\", \"RoleName\") VALUES (1, 'Admin');\n";

    /// Writes fixed SQL, or fails like pg_dump would.
    struct StubDumper {
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Dumper for StubDumper {
        async fn dump(&self, output: &Path) -> Result<(), DumpError> {
            if let Some(stderr) = &self.fail_with {
                return Err(DumpError::Failed {
                    program: "pg_dump".to_string(),
                    code: Some(1),
                    stderr: stderr.clone(),
                });
            }
            tokio::fs::write(output, DUMP_SQL).await.unwrap();
            Ok(())
        }
    }

    struct Fixture {
        service: BackupService,
        storage: Arc<SimStorageBackend>,
        work: tempfile::TempDir,
        _bucket: tempfile::TempDir,
    }

    fn fixture(fail_with: Option<&str>, configured: bool) -> Fixture {
        let work = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let storage = Arc::new(SimStorageBackend::new());
        let objects: Arc<dyn ObjectStore> = if configured {
            Arc::new(FsObjectStore::new(bucket.path()))
        } else {
            Arc::new(UnconfiguredObjectStore)
        };
        let clock = Arc::new(SimClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 16, 30, 5).unwrap(),
        ));
        let settings = BackupSettings {
            backup_dir: work.path().join("backups"),
            log_dir: work.path().join("logs"),
            display_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
        };
        let service = BackupService::new(
            storage.clone(),
            objects,
            Arc::new(StubDumper {
                fail_with: fail_with.map(str::to_string),
            }),
            clock,
            settings,
        );
        Fixture {
            service,
            storage,
            work,
            _bucket: bucket,
        }
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).map_or(true, |mut d| d.next().is_none())
    }

    #[tokio::test]
    async fn test_successful_backup() {
        let fx = fixture(None, true);
        let outcome = fx.service.run_backup().await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.message, "Backup_20250602_003005 completed!");
        assert_eq!(
            outcome.backup.file_key.as_deref(),
            Some("backups/2025-06-02/db_backup_20250602_003005.sql")
        );
        assert_eq!(
            outcome.backup.log_key.as_deref(),
            Some("logs/2025-06-02/backup_log_20250602_003005.txt")
        );
        assert_eq!(outcome.backup.size.as_deref(), Some("0.00 MB"));

        let stored = fx.storage.list_backups().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_restorable());

        // Local artifacts are gone.
        assert!(dir_is_empty(&fx.work.path().join("backups")));
        assert!(dir_is_empty(&fx.work.path().join("logs")));

        let file = fx.service.download(outcome.backup.id).await.unwrap();
        assert_eq!(file.filename, "db_backup_20250602_003005.sql");
        assert_eq!(file.bytes, DUMP_SQL.as_bytes());

        let log = fx.service.view_log(outcome.backup.id).await.unwrap();
        assert!(log.starts_with("[2025-06-02 00:30:05] INFO: Starting backup..."));
        assert!(log.contains("Upload successful: file://"));
    }

    #[tokio::test]
    async fn test_dump_failure_records_failed_row() {
        let fx = fixture(Some("pg_dump: error: connection refused"), true);
        let outcome = fx.service.run_backup().await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.message, "pg_dump: error: connection refused");
        assert_eq!(outcome.backup.status, BackupStatus::Failed);
        assert_eq!(outcome.backup.size.as_deref(), Some("0 MB"));
        assert!(outcome.backup.file_key.is_none());

        let err = fx.service.download(outcome.backup.id).await.unwrap_err();
        assert_eq!(err.to_string(), MSG_BACKUP_FILE_MISSING);
    }

    #[tokio::test]
    async fn test_missing_credentials_marks_failed() {
        let fx = fixture(None, false);
        let outcome = fx.service.run_backup().await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.backup.status, BackupStatus::Failed);
        assert!(outcome.backup.file_key.is_none());
        assert!(outcome.backup.log_key.is_none());
        assert!(dir_is_empty(&fx.work.path().join("backups")));
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let fx = fixture(None, true);
        fx.service.run_backup().await.unwrap();
        fx.storage
            .insert_backup(&BackupHistory::failed(
                "Backup_old".to_string(),
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ))
            .await
            .unwrap();

        let dashboard = fx.service.dashboard().await.unwrap();
        assert_eq!(dashboard.total_backups, 2);
        assert_eq!(dashboard.completed_backups, 1);
        assert_eq!(dashboard.failed_backups, 1);
        assert_eq!(
            dashboard.latest_backup.unwrap().display,
            "Backup_20250602_003005 - 2025-06-02 00:30:05"
        );
        assert!(dashboard.latest_restore.is_none());

        assert_eq!(fx.service.restorable().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_backup_is_not_found() {
        let fx = fixture(None, true);
        let err = fx.service.view_log(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }
}
