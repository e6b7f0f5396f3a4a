use chrono::{Local, NaiveDateTime, Timelike};
use color_eyre::eyre::{self, Context};

use crate::{
    camera_service::{CameraService, DownloadRequest},
    config::IngestConfig,
    state::StateStore,
    window::{calculate_since, format_since},
};

pub trait Clock {
    fn now(&mut self) -> NaiveDateTime;
}

/// Wall clock, in local time.
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&mut self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

impl<F: FnMut() -> NaiveDateTime> Clock for F {
    fn now(&mut self) -> NaiveDateTime {
        self()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// The filter that was sent to the service.
    pub since: Option<String>,
    /// When the download finished, in whole seconds.
    pub completed_at: NaiveDateTime,
    /// The cursor after the fetch. Only differs from `completed_at` if the clock went
    /// backwards, then the cursor was left alone.
    pub cursor: NaiveDateTime,
}

/// Downloads everything since the last successful fetch.
pub struct ClipFetcher<'a, S: CameraService + ?Sized, C: Clock = LocalClock> {
    config: &'a IngestConfig,
    service: &'a mut S,
    store: StateStore,
    clock: C,
}

impl<'a, S: CameraService + ?Sized> ClipFetcher<'a, S, LocalClock> {
    pub fn new(config: &'a IngestConfig, service: &'a mut S) -> Self {
        Self::with_clock(config, service, LocalClock)
    }
}

impl<'a, S: CameraService + ?Sized, C: Clock> ClipFetcher<'a, S, C> {
    pub fn with_clock(config: &'a IngestConfig, service: &'a mut S, clock: C) -> Self {
        Self {
            config,
            service,
            store: StateStore::new(&config.state_file),
            clock,
        }
    }

    /// Downloads all clips since the cursor and moves the cursor to when the download
    /// finished. Errors from the service are returned as is and leave the cursor where
    /// it was, so the same window is tried again next time.
    pub fn fetch(&mut self) -> eyre::Result<FetchReport> {
        let config = self.config;
        let now = self.clock.now();
        let cursor = self.store.cursor();
        let since = format_since(calculate_since(now, cursor, &config.fallback));

        match (&cursor, &since) {
            (Some(cursor), _) => log::info!("Resuming from the last download at {cursor}"),
            (None, Some(since)) => log::info!(
                "Nothing downloaded before, using the fallback {} (since {since})",
                config.fallback
            ),
            (None, None) => log::info!("Nothing downloaded before, fetching without a filter"),
        }

        std::fs::create_dir_all(&config.raw_clips_dir).wrap_err_with(|| {
            format!(
                "failed to create the clip dir at {}",
                config.raw_clips_dir.display()
            )
        })?;

        log::info!(
            "Downloading clips for {} to {}",
            config.camera,
            config.raw_clips_dir.display()
        );
        let cameras = [config.camera.clone()];
        let request = DownloadRequest {
            destination: &config.raw_clips_dir,
            since: since.as_deref(),
            cameras: &cameras,
            delay: config.delay,
        };
        if let Err(e) = self.service.download_videos(&request) {
            log::error!("The download failed, the cursor stays where it was");
            return Err(e);
        }

        let now = self.clock.now();
        let completed_at = now.with_nanosecond(0).unwrap_or(now);
        let cursor = self.store.set_cursor(completed_at)?;
        if cursor == completed_at {
            log::info!("Done, moved the cursor to {cursor}");
        } else {
            log::warn!("Done, but the cursor stays at {cursor}, it is after {completed_at}");
        }

        Ok(FetchReport {
            since,
            completed_at,
            cursor,
        })
    }
}
