use std::{path::PathBuf, time::Duration};

use crate::window::Fallback;

/// Everything one ingestion job needs. Built once at startup and passed around by
/// reference.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// The tokens written by the login flow.
    pub auth_file: PathBuf,
    /// One job, one camera. Another camera needs its own state file.
    pub camera: String,
    pub raw_clips_dir: PathBuf,
    pub state_file: PathBuf,
    pub fallback: Fallback,
    pub delay: Duration,
    /// Upper limit of result pages to request from the service.
    pub max_pages: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            auth_file: "blink_auth.json".into(),
            camera: "sort_C15".into(),
            raw_clips_dir: "data/raw_clips".into(),
            state_file: "data/meta_data/state.json".into(),
            fallback: Fallback::default(),
            delay: Duration::from_secs(2),
            max_pages: 10,
        }
    }
}
