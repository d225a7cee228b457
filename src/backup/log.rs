//! Human-readable backup run log.
//!
//! Lines look like `[2025-06-02 00:30:05] INFO: Starting backup...` in display
//! time. Each line is also emitted through `tracing`.

use std::fmt;
use std::sync::Arc;

use chrono::FixedOffset;

use crate::clock::Clock;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Accumulates a run log in memory until it is written and uploaded.
pub struct BackupLog {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    buffer: String,
}

impl BackupLog {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            clock,
            offset,
            buffer: String::new(),
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.line(LogLevel::Info, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.line(LogLevel::Error, message.as_ref());
    }

    fn line(&mut self, level: LogLevel, message: &str) {
        let timestamp = self.clock.now_in(self.offset).format("%Y-%m-%d %H:%M:%S");
        self.buffer
            .push_str(&format!("[{timestamp}] {level}: {message}\n"));

        match level {
            LogLevel::Info => tracing::info!(target: "arcasys::backup", "{message}"),
            LogLevel::Error => tracing::error!(target: "arcasys::backup", "{message}"),
        }
    }

    #[must_use]
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_line_format_uses_display_offset() {
        let clock = Arc::new(SimClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 16, 30, 5).unwrap(),
        ));
        let manila = FixedOffset::east_opt(8 * 3600).unwrap();
        let mut log = BackupLog::new(clock.clone(), manila);
        assert!(log.is_empty());

        log.info("Starting backup...");
        clock.advance_secs(2);
        log.error("Backup failed:\nconnection refused");

        assert_eq!(
            log.contents(),
            "[2025-06-02 00:30:05] INFO: Starting backup...\n\
             [2025-06-02 00:30:07] ERROR: Backup failed:\nconnection refused\n"
        );
    }
}
