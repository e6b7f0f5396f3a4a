//! The persisted ingestion cursor.

use std::path::{Path, PathBuf};

use camfeed_common::utils::fsutils::{read_optional_file, write_atomic};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use color_eyre::eyre::{self, Context};
use serde::{Deserialize, Serialize};

/// Second precision, no timezone. Local time is assumed everywhere.
const CURSOR_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, with = "lenient_timestamp")]
    pub last_downloaded_at: Option<NaiveDateTime>,

    /// Keys this version doesn't know about, kept so they survive a rewrite.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// A json file holding a single [`State`].
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails, anything that can't be read is treated as no state at all.
    pub fn load(&self) -> State {
        let text = match read_optional_file(&self.path) {
            Ok(Some(text)) => text,
            Ok(None) => return State::default(),
            Err(e) => {
                log::warn!(
                    "Could not read the state at {}, starting without one: {e}",
                    self.path.display()
                );
                return State::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!(
                "The state at {} is not valid, starting without one: {e}",
                self.path.display()
            );
            State::default()
        })
    }

    pub fn save(&self, state: &State) -> eyre::Result<()> {
        let mut json =
            serde_json::to_string_pretty(state).wrap_err("failed to serialize the state")?;
        json.push('\n');
        write_atomic(&self.path, json)
            .wrap_err_with(|| format!("failed to write the state to {}", self.path.display()))
    }

    pub fn cursor(&self) -> Option<NaiveDateTime> {
        self.load().last_downloaded_at
    }

    /// Moves the cursor to `at`, truncated to whole seconds. Re-reads the file first so
    /// other keys are kept. The cursor never moves backwards, an earlier `at` is ignored.
    ///
    /// Returns the cursor as stored afterwards, which is not `at` if it was ignored.
    pub fn set_cursor(&self, at: NaiveDateTime) -> eyre::Result<NaiveDateTime> {
        let at = at.with_nanosecond(0).unwrap_or(at);
        let mut state = self.load();

        if let Some(current) = state.last_downloaded_at {
            if current > at {
                log::warn!(
                    "Refusing to move the cursor back from {current} to {at}, \
                     has the clock changed?"
                );
                return Ok(current);
            }
        }

        state.last_downloaded_at = Some(at);
        self.save(&state)?;
        Ok(at)
    }
}

/// Parses the formats a hand-edited state file is likely to contain. Timestamps with
/// an offset are converted to local time.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Local).naive_local())
        })
}

mod lenient_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_some(&dt.format(CURSOR_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => {
                let parsed = parse_timestamp(&s);
                if parsed.is_none() {
                    log::warn!("Invalid last_downloaded_at '{s}' in the state, ignoring it");
                }
                parsed
            }
            Some(other) => {
                log::warn!("Invalid last_downloaded_at {other} in the state, ignoring it");
                None
            }
        })
    }
}
