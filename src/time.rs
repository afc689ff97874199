//! Canonical "now" stamp handed to every LLM-facing stage (spec §2, component 1).
//!
//! Every prompt that reasons about relative dates ("tomorrow", "next week")
//! needs a single, consistent notion of the current instant and the user's
//! timezone; without it two stages invoked microseconds apart could disagree
//! on what day it is.

use chrono::{DateTime, FixedOffset, Utc};

/// A frozen snapshot of "now" plus the timezone to render it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeContext {
    instant: DateTime<Utc>,
    offset: FixedOffset,
}

impl TimeContext {
    /// Capture the current instant in the given fixed UTC offset (seconds
    /// east of UTC, e.g. `7200` for Asia/Jerusalem winter time).
    pub fn now(offset_seconds: i32) -> Self {
        Self::at(Utc::now(), offset_seconds)
    }

    /// Build a context for an explicit instant, useful for deterministic
    /// tests and for re-deriving a checkpointed turn's original clock.
    pub fn at(instant: DateTime<Utc>, offset_seconds: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_seconds).unwrap_or_else(|| {
            FixedOffset::east_opt(0).expect("zero offset is always valid")
        });
        Self { instant, offset }
    }

    /// The instant in UTC.
    pub fn utc(&self) -> DateTime<Utc> {
        self.instant
    }

    /// The instant rendered in the configured local offset.
    pub fn local(&self) -> DateTime<FixedOffset> {
        self.instant.with_timezone(&self.offset)
    }

    /// ISO-8601 string in the local offset, the canonical form embedded in
    /// LLM prompts so "now" is unambiguous.
    pub fn to_prompt_string(&self) -> String {
        self.local().to_rfc3339()
    }

    /// Day-of-week in the local offset, `Sun=0 .. Sat=6` per spec §4.5.
    pub fn day_of_week(&self) -> u8 {
        use chrono::Datelike;
        self.local().weekday().num_days_from_sunday() as u8
    }

    /// Start of the local calendar day containing `self`, in UTC.
    pub fn start_of_local_day(&self) -> DateTime<Utc> {
        use chrono::TimeZone;
        let local = self.local();
        let midnight_naive = local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time");
        self.offset
            .from_local_datetime(&midnight_naive)
            .single()
            .unwrap_or(local)
            .with_timezone(&Utc)
    }

    /// `[start_of_today, start_of_today + 1 day)` in UTC — the "tomorrow"
    /// window used by EntityResolvers and the calendar fake executor.
    pub fn tomorrow_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_of_local_day() + chrono::Duration::days(1);
        (start, start + chrono::Duration::days(1))
    }

    /// `[start_of_today, start_of_today + 1 day)` in UTC.
    pub fn today_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_of_local_day();
        (start, start + chrono::Duration::days(1))
    }

    /// The wide default window used when no explicit time window can be
    /// derived: `-7d .. +30d` relative to now (spec §4.5 step 2).
    pub fn default_wide_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.instant - chrono::Duration::days(7),
            self.instant + chrono::Duration::days(30),
        )
    }
}
