// crates/entitlement-gate-core/src/core/time.rs
// ============================================================================
// Module: Entitlement Gate Calendar
// Description: Clock abstraction and calendar date helpers.
// Purpose: Keep date arithmetic deterministic and injectable.
// Dependencies: time
// ============================================================================

//! ## Overview
//! All dates are computed in a single local calendar chosen by configuration
//! (a fixed UTC offset). Durable records store dates as `YYYY-MM-DD` and
//! history timestamps as `YYYY-MM-DD HH:MM:SS`, both through `time`'s
//! format descriptions. The [`Clock`] trait lets tests pin the current moment
//! with [`FixedClock`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;

use time::Date;
use time::Duration;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::Time;
use time::UtcOffset;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current local date and time.
pub trait Clock: Send + Sync {
    /// Returns the current local moment.
    fn now(&self) -> PrimitiveDateTime;

    /// Returns the current local calendar date.
    fn today(&self) -> Date {
        self.now().date()
    }
}

/// Wall clock reporting time at a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    /// Offset applied to the current UTC instant.
    offset: UtcOffset,
}

impl SystemClock {
    /// Creates a wall clock for the given UTC offset.
    #[must_use]
    pub const fn new(offset: UtcOffset) -> Self {
        Self {
            offset,
        }
    }

    /// Creates a wall clock from an offset in minutes, falling back to UTC when
    /// the offset is out of range.
    #[must_use]
    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
            .unwrap_or(UtcOffset::UTC);
        Self::new(offset)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

/// Manually controlled clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    /// Current moment reported by the clock.
    now: Mutex<PrimitiveDateTime>,
}

impl FixedClock {
    /// Creates a clock pinned to `now`.
    #[must_use]
    pub const fn new(now: PrimitiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a clock pinned to noon on the given date.
    #[must_use]
    pub const fn at_noon(date: Date) -> Self {
        Self::new(PrimitiveDateTime::new(date, NOON))
    }

    /// Moves the clock to a new moment.
    pub fn set(&self, now: PrimitiveDateTime) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut guard = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = guard.saturating_add(delta);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> PrimitiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Local noon.
const NOON: Time = match Time::from_hms(12, 0, 0) {
    Ok(noon) => noon,
    Err(_) => Time::MIDNIGHT,
};

// ============================================================================
// SECTION: Date Formatting
// ============================================================================

/// Durable date form.
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// History timestamp form.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Formats a date as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}

/// Formats a moment as `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn format_timestamp(moment: PrimitiveDateTime) -> String {
    moment.format(TIMESTAMP_FORMAT).unwrap_or_else(|_| moment.to_string())
}

/// Parses a strict `YYYY-MM-DD` date.
///
/// Signed years and unpadded components are rejected.
#[must_use]
pub fn parse_date(value: &str) -> Option<Date> {
    if !value.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Date::parse(value, DATE_FORMAT).ok()
}

/// Returns the calendar date `days` after `moment`.
#[must_use]
pub fn date_after_days(moment: PrimitiveDateTime, days: i64) -> Date {
    moment.saturating_add(Duration::days(days)).date()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
