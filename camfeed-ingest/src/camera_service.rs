use std::{path::Path, time::Duration};

use color_eyre::eyre;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub name: String,
    pub id: u64,
    pub serial: Option<String>,
}

/// Everything the service needs to download a batch of clips.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    /// Where to put the clips, must exist.
    pub destination: &'a Path,
    /// On the form `YYYY/MM/DD HH:MM`, or `None` for the service's default.
    pub since: Option<&'a str>,
    pub cameras: &'a [String],
    /// How long to wait between two clip downloads.
    pub delay: Duration,
}

/// A cloud camera service that has recorded clips to download.
///
/// There is no `until`, everything at or after `since` is downloaded.
pub trait CameraService {
    fn list_cameras(&mut self) -> eyre::Result<Vec<CameraInfo>>;

    /// Downloads all clips matching the request. Must only return `Ok` if every clip
    /// was downloaded.
    fn download_videos(&mut self, request: &DownloadRequest<'_>) -> eyre::Result<()>;

    /// Ends the session. The service should not be used afterwards.
    fn close(&mut self) -> eyre::Result<()>;
}

impl<S: CameraService + ?Sized> CameraService for &mut S {
    fn list_cameras(&mut self) -> eyre::Result<Vec<CameraInfo>> {
        (**self).list_cameras()
    }

    fn download_videos(&mut self, request: &DownloadRequest<'_>) -> eyre::Result<()> {
        (**self).download_videos(request)
    }

    fn close(&mut self) -> eyre::Result<()> {
        (**self).close()
    }
}
