//! Backup and restore audit rows.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum backup name length in bytes
pub const BACKUP_NAME_BYTES_MAX: usize = 100;

/// Progress value of a finished restore
pub const RESTORE_PROGRESS_MAX: i32 = 100;

// =============================================================================
// BackupHistory
// =============================================================================

/// Outcome of one dump attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
}

impl BackupStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit row for a single dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupHistory {
    pub id: Uuid,
    pub name: String,
    pub status: BackupStatus,
    pub timestamp: DateTime<Utc>,
    /// Human-readable size such as `"1.25 MB"`
    pub size: Option<String>,
    /// Object key of the run log
    pub log_key: Option<String>,
    /// Object key of the SQL dump
    pub file_key: Option<String>,
}

impl BackupHistory {
    /// A failed attempt: nothing uploaded, size `"0 MB"`.
    #[must_use]
    pub fn failed(name: String, timestamp: DateTime<Utc>) -> Self {
        Self::new(name, BackupStatus::Failed, timestamp, Some("0 MB".to_string()), None, None)
    }

    #[must_use]
    pub fn new(
        name: String,
        status: BackupStatus,
        timestamp: DateTime<Utc>,
        size: Option<String>,
        file_key: Option<String>,
        log_key: Option<String>,
    ) -> Self {
        assert!(!name.is_empty(), "backup name cannot be empty");
        assert!(
            name.len() <= BACKUP_NAME_BYTES_MAX,
            "backup name {} bytes exceeds max {}",
            name.len(),
            BACKUP_NAME_BYTES_MAX
        );

        Self {
            id: Uuid::new_v4(),
            name,
            status,
            timestamp,
            size,
            log_key,
            file_key,
        }
    }

    /// Can be used as a restore source.
    #[must_use]
    pub fn is_restorable(&self) -> bool {
        self.status == BackupStatus::Completed && self.file_key.is_some()
    }

    /// `"{name} - {YYYY-MM-DD HH:MM:SS}"` in the display offset.
    #[must_use]
    pub fn display(&self, offset: FixedOffset) -> String {
        format!(
            "{} - {}",
            self.name,
            self.timestamp.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S")
        )
    }
}

// =============================================================================
// RestoreOperation
// =============================================================================

/// State of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    InProgress,
    Completed,
    Failed,
}

impl RestoreStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit row for a single restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOperation {
    pub id: Uuid,
    pub backup_id: Uuid,
    pub status: RestoreStatus,
    /// 0..=100
    pub progress: i32,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RestoreOperation {
    #[must_use]
    pub fn start(backup_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backup_id,
            status: RestoreStatus::InProgress,
            progress: 0,
            message: None,
            started_at,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.status == RestoreStatus::InProgress
    }

    /// Record progress. Progress never moves backwards.
    pub fn advance(&mut self, progress: i32, message: impl Into<String>) {
        assert!(self.is_in_progress(), "can only advance an in-progress restore");
        assert!(
            (0..=RESTORE_PROGRESS_MAX).contains(&progress),
            "progress {} out of range",
            progress
        );
        self.progress = self.progress.max(progress);
        self.message = Some(message.into());
    }

    pub fn complete(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        assert!(self.is_in_progress(), "restore already finished");
        self.status = RestoreStatus::Completed;
        self.progress = RESTORE_PROGRESS_MAX;
        self.message = Some(message.into());
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        assert!(self.is_in_progress(), "restore already finished");
        self.status = RestoreStatus::Failed;
        self.message = Some(message.into());
        self.completed_at = Some(at);
    }
}
