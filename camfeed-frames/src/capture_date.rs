//! Figures out which day a clip was recorded from its filename.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

/// The bucket for clips without a recognizable date.
pub const UNKNOWN_DATE: &str = "unknown_date";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const DATETIME_LEN: usize = 19;

/// Tries, in order, any `_`-separated part of the file stem as a date, then the last 19
/// characters as `YYYY-MM-DD_HH-MM-SS`.
pub fn capture_date(path: impl AsRef<Path>) -> Option<NaiveDate> {
    let stem = path.as_ref().file_stem()?.to_string_lossy();

    stem.split('_')
        .find_map(parse_date_part)
        .or_else(|| {
            NaiveDateTime::parse_from_str(last_chars(&stem, DATETIME_LEN), DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
}

/// The directory name frames from this clip go into, `YYYY-MM-DD` or [`UNKNOWN_DATE`].
pub fn date_bucket(path: impl AsRef<Path>) -> String {
    match capture_date(&path) {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => {
            log::warn!(
                "Could not parse a date from '{}', placing its frames under '{UNKNOWN_DATE}'",
                path.as_ref().display()
            );
            UNKNOWN_DATE.to_owned()
        }
    }
}

/// `YYYY-M-D`, where month and day may be zero padded. The year must have four digits,
/// otherwise a time like `09-10-11` would pass as a date.
fn parse_date_part(part: &str) -> Option<NaiveDate> {
    let mut fields = part.split('-');
    let (year, month, day) = (fields.next()?, fields.next()?, fields.next()?);
    let digits = |s: &str, len: std::ops::RangeInclusive<usize>| {
        len.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
    };
    if fields.next().is_some()
        || !digits(year, 4..=4)
        || !digits(month, 1..=2)
        || !digits(day, 1..=2)
    {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn last_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
