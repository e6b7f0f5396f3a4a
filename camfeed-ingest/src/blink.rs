//! A [`CameraService`] talking to the Blink cloud.

pub mod auth;

use std::{
    collections::HashMap,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use camfeed_common::utils::fsutils::partial_path;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use color_eyre::eyre;
use reqwest::{blocking::Client, blocking::Response, StatusCode};
use serde::Deserialize;

use crate::{
    camera_service::{CameraInfo, CameraService, DownloadRequest},
    config::IngestConfig,
    window::SINCE_FORMAT,
};

use self::auth::Auth;

/// How captured-at times are written into clip filenames.
pub const CLIP_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, thiserror::Error)]
pub enum BlinkError {
    #[error("Blink auth file not found at {0}, run the login flow first")]
    MissingAuthFile(PathBuf),
    #[error("the Blink auth file at {path} is not valid: {source}")]
    InvalidAuthFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("the auth file has neither a region_id nor a host")]
    NoRegion,
    #[error("Blink rejected the token, it has probably expired, run the login flow again")]
    Unauthorized,
    #[error("'{0}' is not a since filter on the form YYYY/MM/DD HH:MM")]
    InvalidSince(String),
    #[error("the session is closed")]
    Closed,
    #[error("there are still clips after {0} pages, raise the page limit")]
    TooManyPages(u32),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub struct BlinkClient {
    http: Option<Client>,
    auth: Auth,
    base_url: String,
    max_pages: u32,
}

impl BlinkClient {
    /// Loads the tokens from the auth file. Does not log in, that is the job of the
    /// separate login flow.
    pub fn connect(config: &IngestConfig) -> Result<Self, BlinkError> {
        let auth = Auth::from_file(&config.auth_file)?;
        let base_url = auth.base_url()?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()?;

        log::debug!("Using the Blink API at {base_url}");
        Ok(Self {
            http: Some(http),
            auth,
            base_url,
            max_pages: config.max_pages,
        })
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, BlinkError> {
        let http = self.http.as_ref().ok_or(BlinkError::Closed)?;
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {url} {query:?}");

        // Older API versions want TOKEN_AUTH, newer a bearer token
        let response = http
            .get(url)
            .query(query)
            .header("TOKEN_AUTH", &self.auth.token)
            .bearer_auth(&self.auth.token)
            .send()?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BlinkError::Unauthorized);
        }
        Ok(response.error_for_status()?)
    }

    fn media_page(
        &self,
        since: Option<&str>,
        page: u32,
    ) -> Result<Vec<MediaItem>, BlinkError> {
        let mut query = vec![("page", page.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_owned()));
        }
        let path = format!("/api/v1/accounts/{}/media/changed", self.auth.account_id);
        let page: MediaPage = self.get(&path, &query)?.json()?;
        Ok(page.media)
    }

    /// Returns false if the clip was already there.
    fn download_clip(&self, media_path: &str, dest: &Path) -> Result<bool, BlinkError> {
        if dest.exists() {
            return Ok(false);
        }

        let mut response = self.get(media_path, &[])?;
        let part = partial_path(dest)?;
        let written = (|| -> Result<u64, BlinkError> {
            let mut file = File::create(&part)?;
            let written = response.copy_to(&mut file)?;
            file.sync_all()?;
            fs::rename(&part, dest)?;
            Ok(written)
        })();

        match written {
            Ok(bytes) => {
                log::info!("Downloaded {} ({bytes} bytes)", dest.display());
                Ok(true)
            }
            Err(e) => {
                fs::remove_file(&part).ok();
                Err(e)
            }
        }
    }
}

impl CameraService for BlinkClient {
    fn list_cameras(&mut self) -> eyre::Result<Vec<CameraInfo>> {
        let path = format!("/api/v3/accounts/{}/homescreen", self.auth.account_id);
        let home: Homescreen = self.get(&path, &[])?.json().map_err(BlinkError::from)?;

        Ok(home
            .cameras
            .into_iter()
            .chain(home.owls)
            .chain(home.doorbells)
            .map(|device| CameraInfo {
                name: device.name,
                id: device.id,
                serial: device.serial,
            })
            .collect())
    }

    fn download_videos(&mut self, request: &DownloadRequest<'_>) -> eyre::Result<()> {
        let since = request.since.map(since_to_api).transpose()?;
        let mut names = ClipNames::default();
        let mut downloaded = 0;
        let mut exhausted = false;

        for page in 1..=self.max_pages {
            let items = self.media_page(since.as_deref(), page)?;
            if items.is_empty() {
                exhausted = true;
                break;
            }
            log::debug!("Page {page} has {} clips", items.len());

            for item in items {
                if item.deleted {
                    log::debug!("Skipping deleted clip {}", item.media);
                    continue;
                }
                if !request.cameras.is_empty() && !request.cameras.contains(&item.device_name)
                {
                    continue;
                }

                let filename = names.claim(&item);
                let dest = request.destination.join(&filename);
                if self.download_clip(&item.media, &dest)? {
                    downloaded += 1;
                    std::thread::sleep(request.delay);
                } else {
                    log::info!("{filename} is already downloaded, skipping");
                }
            }
        }

        log::info!(
            "Downloaded {downloaded} new clips to {}",
            request.destination.display()
        );
        if !exhausted {
            return Err(BlinkError::TooManyPages(self.max_pages).into());
        }
        Ok(())
    }

    fn close(&mut self) -> eyre::Result<()> {
        if self.http.take().is_some() {
            log::debug!("Closed the Blink session");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct MediaPage {
    #[serde(default)]
    media: Vec<MediaItem>,
}

#[derive(Deserialize)]
struct MediaItem {
    #[serde(default)]
    id: Option<u64>,
    device_name: String,
    created_at: String,
    /// Path to the clip, relative to the base url.
    media: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct Homescreen {
    #[serde(default)]
    cameras: Vec<Device>,
    #[serde(default)]
    owls: Vec<Device>,
    #[serde(default)]
    doorbells: Vec<Device>,
}

#[derive(Deserialize)]
struct Device {
    name: String,
    id: u64,
    #[serde(default)]
    serial: Option<String>,
}

/// Hands out clip filenames during one download. Different clips that would get the
/// same name, like two in the same second, get their media id appended.
#[derive(Default)]
struct ClipNames {
    owners: HashMap<String, Option<u64>>,
}

impl ClipNames {
    fn claim(&mut self, item: &MediaItem) -> String {
        let name = clip_filename(&item.device_name, &item.created_at);
        let mut id_suffix = item.id;
        let mut counter = 2u64;
        let mut candidate = name.clone();

        loop {
            match self.owners.get(&candidate) {
                Some(owner) if owner.is_some() && *owner == item.id => return candidate,
                Some(_) => {
                    let suffix = match id_suffix.take() {
                        Some(id) => id.to_string(),
                        None => {
                            let n = counter;
                            counter += 1;
                            n.to_string()
                        }
                    };
                    candidate = with_suffix(&name, &suffix);
                }
                None => {
                    if candidate != name {
                        log::warn!("Another clip is already named {name}, using {candidate}");
                    }
                    self.owners.insert(candidate.clone(), item.id);
                    return candidate;
                }
            }
        }
    }
}

fn with_suffix(filename: &str, suffix: &str) -> String {
    match filename.strip_suffix(".mp4") {
        Some(stem) => format!("{stem}_{suffix}.mp4"),
        None => format!("{filename}_{suffix}"),
    }
}

/// The API wants `since` in UTC with an offset, we have it in local time.
fn since_to_api(since: &str) -> Result<String, BlinkError> {
    let naive = NaiveDateTime::parse_from_str(since, SINCE_FORMAT)
        .map_err(|_| BlinkError::InvalidSince(since.to_owned()))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| BlinkError::InvalidSince(since.to_owned()))?;
    Ok(local
        .with_timezone(&Utc)
        .format("%Y-%m-%dT%H:%M:%S+0000")
        .to_string())
}

/// Names a clip after its camera and local capture time, e.g.
/// `sort_C15_2025-11-20_09-10-11.mp4`.
pub fn clip_filename(camera: &str, created_at: &str) -> String {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(dt) => clip_filename_at(camera, dt.with_timezone(&Local).naive_local()),
        Err(_) => {
            log::warn!("Clip has a weird creation time '{created_at}', using it as is");
            format!("{}_{}.mp4", sanitize(camera), sanitize(created_at))
        }
    }
}

pub fn clip_filename_at(camera: &str, captured: NaiveDateTime) -> String {
    format!(
        "{}_{}.mp4",
        sanitize(camera),
        captured.format(CLIP_TIME_FORMAT)
    )
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
