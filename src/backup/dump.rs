//! Database dump producers.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DatabaseParams;

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("no database is configured")]
    NotConfigured,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl DumpError {
    /// What the user is shown: the tool's stderr when it ran, else the error.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Writes a data-only SQL dump to a file.
#[async_trait]
pub trait Dumper: Send + Sync + 'static {
    async fn dump(&self, output: &Path) -> Result<(), DumpError>;
}

// =============================================================================
// PgDump
// =============================================================================

/// Runs `pg_dump` as a child process.
#[derive(Debug, Clone)]
pub struct PgDump {
    program: String,
    params: DatabaseParams,
}

impl PgDump {
    #[must_use]
    pub fn new(program: impl Into<String>, params: DatabaseParams) -> Self {
        let program = program.into();
        assert!(!program.is_empty(), "pg_dump path cannot be empty");
        Self { program, params }
    }

    /// Arguments for a data-only dump with one INSERT per row.
    #[must_use]
    pub fn args(&self, output: &Path) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.params.host.clone(),
            "-p".to_string(),
            self.params.port.to_string(),
            "-U".to_string(),
            self.params.user.clone(),
            "-d".to_string(),
            self.params.name.clone(),
            "--data-only".to_string(),
            "--column-inserts".to_string(),
            "-f".to_string(),
            output.display().to_string(),
            "--no-password".to_string(),
        ]
    }
}

#[async_trait]
impl Dumper for PgDump {
    async fn dump(&self, output: &Path) -> Result<(), DumpError> {
        tracing::debug!(program = %self.program, output = %output.display(), "running dump");

        let result = Command::new(&self.program)
            .args(self.args(output))
            .env("PGPASSWORD", &self.params.password)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DumpError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(DumpError::Failed {
                program: self.program.clone(),
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Used when the service runs without a database.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredDumper;

#[async_trait]
impl Dumper for UnconfiguredDumper {
    async fn dump(&self, _output: &Path) -> Result<(), DumpError> {
        Err(DumpError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DatabaseParams {
        DatabaseParams {
            host: "db.internal".to_string(),
            port: 5433,
            user: "arcasys".to_string(),
            password: "s3cret".to_string(),
            name: "arcasys".to_string(),
        }
    }

    #[test]
    fn test_args() {
        let dump = PgDump::new("pg_dump", params());
        let args = dump.args(Path::new("/tmp/backups/db_backup_x.sql"));
        assert_eq!(
            args.join(" "),
            "-h db.internal -p 5433 -U arcasys -d arcasys --data-only --column-inserts \
             -f /tmp/backups/db_backup_x.sql --no-password"
        );
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let dump = PgDump::new("/nonexistent/pg_dump", params());
        let err = dump.dump(&dir.path().join("out.sql")).await.unwrap_err();
        assert!(matches!(err, DumpError::Spawn { .. }));
    }

    #[test]
    fn test_failed_detail_is_stderr() {
        let err = DumpError::Failed {
            program: "pg_dump".to_string(),
            code: Some(1),
            stderr: "connection refused".to_string(),
        };
        assert_eq!(err.detail(), "connection refused");
        assert_eq!(DumpError::NotConfigured.detail(), "no database is configured");
    }
}
