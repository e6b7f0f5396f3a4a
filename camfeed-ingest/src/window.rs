//! Decides where the next download window starts.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{NaiveDateTime, NaiveTime};

/// The format the camera service wants its `since` filter in. Seconds are not part of
/// it and are truncated, never rounded.
pub const SINCE_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Formats a timestamp as a `since` filter. `None` means no filter at all.
pub fn format_since(dt: Option<NaiveDateTime>) -> Option<String> {
    dt.map(|dt| dt.format(SINCE_FORMAT).to_string())
}

/// Resumes exactly at the cursor, or falls back to `fallback` if nothing has been
/// downloaded yet.
pub fn calculate_since(
    now: NaiveDateTime,
    cursor: Option<NaiveDateTime>,
    fallback: &Fallback,
) -> Option<NaiveDateTime> {
    cursor.or_else(|| fallback.since(now))
}

/// Where to start when there is no cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// The previous calendar day at this time of day.
    PreviousDayAt(NaiveTime),
    /// This long before now.
    Lookback(Duration),
    /// No filter, i.e. whatever the service does by default.
    Unbounded,
}

impl Fallback {
    pub fn since(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Fallback::PreviousDayAt(time) => {
                now.date().pred_opt().map(|date| date.and_time(*time))
            }
            Fallback::Lookback(dur) => chrono::Duration::from_std(*dur)
                .ok()
                .and_then(|dur| now.checked_sub_signed(dur)),
            Fallback::Unbounded => None,
        }
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Fallback::PreviousDayAt(NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"))
    }
}

const YESTERDAY_PREFIX: &str = "yesterday@";
const UNBOUNDED: &str = "unbounded";

#[derive(Debug, thiserror::Error)]
pub enum FallbackParseError {
    #[error("'{0}' is not a time of day on the form HH:MM")]
    TimeOfDay(String),
    #[error("expected 'yesterday@HH:MM', 'unbounded' or a duration like '6h': {0}")]
    Duration(#[from] humantime::DurationError),
}

impl FromStr for Fallback {
    type Err = FallbackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == UNBOUNDED {
            return Ok(Fallback::Unbounded);
        }

        if let Some(time) = s.strip_prefix(YESTERDAY_PREFIX) {
            return NaiveTime::parse_from_str(time, "%H:%M")
                .map(Fallback::PreviousDayAt)
                .map_err(|_| FallbackParseError::TimeOfDay(time.to_owned()));
        }

        Ok(Fallback::Lookback(humantime::parse_duration(s)?))
    }
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::PreviousDayAt(time) => {
                write!(f, "{YESTERDAY_PREFIX}{}", time.format("%H:%M"))
            }
            Fallback::Lookback(dur) => write!(f, "{}", humantime::format_duration(*dur)),
            Fallback::Unbounded => f.write_str(UNBOUNDED),
        }
    }
}
