//! Clock - Injectable Time
//!
//! TigerStyle: Deterministic, controllable time for tests.
//!
//! Services never call `Utc::now()` directly. Backup names, object keys,
//! token expiry and audit timestamps all come from a [`Clock`], so tests can
//! pin them with [`SimClock`].

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Milliseconds per second
pub const TIME_MS_PER_SEC: i64 = 1_000;

/// Largest single advance allowed on a simulated clock (one year)
pub const SIM_TIME_ADVANCE_MS_MAX: i64 = 365 * 24 * 60 * 60 * TIME_MS_PER_SEC;

// =============================================================================
// Clock Trait
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current instant shifted into the display offset.
    fn now_in(&self, offset: FixedOffset) -> DateTime<FixedOffset> {
        self.now().with_timezone(&offset)
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// SimClock
// =============================================================================

/// A simulated clock for deterministic testing.
///
/// TigerStyle:
/// - Time only moves forward
/// - All time operations are explicit
/// - No reliance on system time
///
/// Shared through `Arc`, so the current time lives in an atomic.
#[derive(Debug)]
pub struct SimClock {
    /// Current time in milliseconds since the Unix epoch
    current_ms: AtomicI64,
}

impl SimClock {
    /// Create a clock starting at the given instant.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            current_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Create a clock starting at the given milliseconds since epoch.
    #[must_use]
    pub fn at_ms(start_ms: i64) -> Self {
        assert!(start_ms >= 0, "start_ms must be non-negative, got {}", start_ms);
        Self {
            current_ms: AtomicI64::new(start_ms),
        }
    }

    /// Get current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Advance time by the given milliseconds.
    ///
    /// # Panics
    /// Panics if ms is negative or exceeds `SIM_TIME_ADVANCE_MS_MAX`.
    pub fn advance_ms(&self, ms: i64) -> i64 {
        // Preconditions
        assert!(ms >= 0, "advance_ms({}) must be non-negative", ms);
        assert!(
            ms <= SIM_TIME_ADVANCE_MS_MAX,
            "advance_ms({}) exceeds max ({})",
            ms,
            SIM_TIME_ADVANCE_MS_MAX
        );

        let old_time = self.current_ms.fetch_add(ms, Ordering::SeqCst);
        let new_time = old_time.saturating_add(ms);

        // Postcondition
        assert!(new_time >= old_time, "time must not go backwards");

        new_time
    }

    /// Advance time by the given seconds.
    pub fn advance_secs(&self, secs: i64) -> i64 {
        self.advance_ms(secs.saturating_mul(TIME_MS_PER_SEC))
    }

    /// Set time to absolute value.
    ///
    /// # Panics
    /// Panics if new time is less than current time.
    pub fn set_ms(&self, ms: i64) {
        let current = self.now_ms();
        assert!(
            ms >= current,
            "cannot set time backwards: {} < {}",
            ms,
            current
        );
        self.current_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_starts_at_given_instant() {
        let start = Utc.with_ymd_and_hms(2025, 3, 14, 8, 30, 0).unwrap();
        let clock = SimClock::at(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_advance_secs() {
        let clock = SimClock::at_ms(0);

        let new_time = clock.advance_secs(90);

        assert_eq!(new_time, 90_000);
        assert_eq!(clock.now_ms(), 90_000);
    }

    #[test]
    fn test_multiple_advances() {
        let clock = SimClock::at_ms(0);

        clock.advance_ms(100);
        clock.advance_ms(200);
        clock.advance_ms(300);

        assert_eq!(clock.now_ms(), 600);
    }

    #[test]
    #[should_panic(expected = "advance_ms")]
    fn test_advance_exceeds_max() {
        let clock = SimClock::at_ms(0);
        clock.advance_ms(SIM_TIME_ADVANCE_MS_MAX + 1);
    }

    #[test]
    #[should_panic(expected = "cannot set time backwards")]
    fn test_set_ms_backwards() {
        let clock = SimClock::at_ms(0);
        clock.advance_ms(1000);
        clock.set_ms(500);
    }

    #[test]
    fn test_now_in_offset() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 20, 0, 0).unwrap();
        let clock = SimClock::at(start);
        let manila = FixedOffset::east_opt(8 * 3600).unwrap();

        let local = clock.now_in(manila);

        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2025-02-01 04:00");
    }
}
