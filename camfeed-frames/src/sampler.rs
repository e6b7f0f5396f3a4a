//! Samples frames at a fixed interval from a folder of clips.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use camfeed_common::utils::fsutils::{has_extension, sorted_files};
use color_eyre::eyre::{self, Context};
use image::RgbImage;

use crate::{
    capture_date::date_bucket,
    frame_extractor::{logger::Logger, ContextLogger, FrameExtractor},
};

pub const VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "mov"];
const COUNTER_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("'{0}' is not a resolution on the form WIDTHxHEIGHT")]
pub struct ResolutionParseError(String);

impl FromStr for Resolution {
    type Err = ResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ResolutionParseError(s.to_owned());
        let (width, height) = s.split_once(['x', 'X']).ok_or_else(err)?;
        Ok(Self {
            width: width.trim().parse().map_err(|_| err())?,
            height: height.trim().parse().map_err(|_| err())?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub input_dir: PathBuf,
    pub output_root: PathBuf,
    pub camera: String,
    /// Frames are named `<prefix>_<counter>.jpg`
    pub prefix: String,
    /// Clips of any other resolution are skipped
    pub resolution: Resolution,
    /// Time between two sampled frames
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            input_dir: "data/raw_clips".into(),
            output_root: "data/frames".into(),
            camera: "sort_C15".into(),
            prefix: "c15".into(),
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            interval: Duration::from_secs(1),
        }
    }
}

impl SamplerConfig {
    /// All frames of this camera end up somewhere below here.
    pub fn camera_dir(&self) -> PathBuf {
        self.output_root.join(&self.camera)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub resolution: Resolution,
    /// Zero if unknown
    pub frame_rate: f64,
    pub duration: Option<Duration>,
}

/// An opened clip whose frames can be read once, in order.
pub trait VideoSource {
    fn info(&self) -> VideoInfo;
    fn next_frame(&mut self) -> eyre::Result<Option<RgbImage>>;
}

pub trait VideoOpener {
    type Source: VideoSource;
    fn open(&self, path: &Path) -> eyre::Result<Self::Source>;
}

/// Opens clips with ffmpeg.
pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    type Source = FrameExtractor<ContextLogger>;

    fn open(&self, path: &Path) -> eyre::Result<Self::Source> {
        FrameExtractor::new_with_logger(path, ContextLogger::new(path))
    }
}

impl<L: Logger> VideoSource for FrameExtractor<L> {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            resolution: Resolution {
                width: self.width(),
                height: self.height(),
            },
            frame_rate: self.frame_rate(),
            duration: self.duration(),
        }
    }

    fn next_frame(&mut self) -> eyre::Result<Option<RgbImage>> {
        self.next()
    }
}

/// Why a clip contributed no, or fewer than expected, frames.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("could not open it: {0}")]
    Unopenable(String),
    #[error("resolution mismatch ({found}, expected {expected})")]
    ResolutionMismatch {
        found: Resolution,
        expected: Resolution,
    },
    #[error("cannot determine a stride from the frame rate {0}")]
    UnknownFrameRate(f64),
    #[error("decoding failed after {after} frames: {reason}")]
    DecodeFailed { after: u64, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipReport {
    pub path: PathBuf,
    pub frames: usize,
    pub problem: Option<SkipReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    pub clips: Vec<ClipReport>,
    pub total_frames: usize,
    pub output_dir: PathBuf,
}

impl SampleReport {
    pub fn problems(&self) -> impl Iterator<Item = (&Path, &SkipReason)> {
        self.clips
            .iter()
            .filter_map(|clip| clip.problem.as_ref().map(|p| (clip.path.as_path(), p)))
    }
}

/// How many frames apart two samples are, `None` if it can't be determined.
pub fn stride(frame_rate: f64, interval: Duration) -> Option<u64> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return None;
    }
    let stride = (frame_rate * interval.as_secs_f64()).round();
    (stride.is_finite() && stride >= 1.0).then_some(stride as u64)
}

/// Writes every `stride`:th frame of every clip to
/// `output_root/<camera>/<date>/<prefix>_<counter>.jpg`. The counter keeps counting
/// across all clips, which are processed in filename order.
pub struct FrameSampler<'a, O: VideoOpener = FfmpegOpener> {
    config: &'a SamplerConfig,
    opener: O,
    next_number: u64,
}

impl<'a> FrameSampler<'a, FfmpegOpener> {
    pub fn new(config: &'a SamplerConfig) -> Self {
        Self::with_opener(config, FfmpegOpener)
    }
}

impl<'a, O: VideoOpener> FrameSampler<'a, O> {
    pub fn with_opener(config: &'a SamplerConfig, opener: O) -> Self {
        Self {
            config,
            opener,
            next_number: 1,
        }
    }

    /// Only fails if the input dir can't be listed or a frame can't be written, a bad
    /// clip is skipped and noted in the report.
    pub fn run(&mut self) -> eyre::Result<SampleReport> {
        let config = self.config;
        let clips: Vec<PathBuf> = sorted_files(&config.input_dir)
            .wrap_err_with(|| {
                format!("failed to list the clips in {}", config.input_dir.display())
            })?
            .into_iter()
            .filter(|path| has_extension(path, &VIDEO_EXTENSIONS))
            .collect();

        if clips.is_empty() {
            log::info!("No video clips found in {}", config.input_dir.display());
        } else {
            log::info!(
                "Found {} video clips in {}",
                clips.len(),
                config.input_dir.display()
            );
        }

        let mut reports = Vec::with_capacity(clips.len());
        for clip in clips {
            let report = self
                .sample_clip(&clip)
                .wrap_err_with(|| format!("failed on {}", clip.display()))?;
            reports.push(report);
        }

        let report = SampleReport {
            total_frames: reports.iter().map(|clip| clip.frames).sum(),
            clips: reports,
            output_dir: config.camera_dir(),
        };
        log::info!(
            "Done! Extracted {} frames total, all saved under {}",
            report.total_frames,
            report.output_dir.display()
        );
        Ok(report)
    }

    fn sample_clip(&mut self, path: &Path) -> eyre::Result<ClipReport> {
        let config = self.config;
        log::info!("Processing {}", path.display());

        let mut report = ClipReport {
            path: path.to_owned(),
            frames: 0,
            problem: None,
        };

        let out_dir = config.camera_dir().join(date_bucket(path));

        let mut source = match self.opener.open(path) {
            Ok(source) => source,
            Err(e) => {
                let reason = SkipReason::Unopenable(format!("{e:#}"));
                return Ok(skipped(report, reason));
            }
        };

        let info = source.info();
        log::info!(
            "FPS: {:.2}, Duration: {}, Resolution: {}",
            info.frame_rate,
            info.duration
                .map(|d| humantime::format_duration(d).to_string())
                .unwrap_or_else(|| "unknown".into()),
            info.resolution
        );

        if info.resolution != config.resolution {
            let reason = SkipReason::ResolutionMismatch {
                found: info.resolution,
                expected: config.resolution,
            };
            return Ok(skipped(report, reason));
        }

        let Some(stride) = stride(info.frame_rate, config.interval) else {
            return Ok(skipped(report, SkipReason::UnknownFrameRate(info.frame_rate)));
        };
        log::debug!("Sampling every {stride} frames");

        let mut index: u64 = 0;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let reason = SkipReason::DecodeFailed {
                        after: index,
                        reason: format!("{e:#}"),
                    };
                    log::warn!("Stopping early on {}: {reason}", path.display());
                    report.problem = Some(reason);
                    break;
                }
            };

            if index % stride == 0 {
                if report.frames == 0 {
                    fs::create_dir_all(&out_dir)
                        .wrap_err_with(|| format!("failed to create {}", out_dir.display()))?;
                }
                self.write_frame(&out_dir, &frame)?;
                report.frames += 1;
            }
            index += 1;
        }

        log::info!(
            "Extracted {} frames from {}",
            report.frames,
            path.display()
        );
        Ok(report)
    }

    fn write_frame(&mut self, out_dir: &Path, frame: &RgbImage) -> eyre::Result<()> {
        let w = COUNTER_WIDTH;
        let path = out_dir.join(format!(
            "{}_{:0w$}.jpg",
            self.config.prefix, self.next_number
        ));
        frame
            .save(&path)
            .wrap_err_with(|| format!("failed to save the frame to {}", path.display()))?;
        log::debug!("Saved {}", path.display());

        self.next_number += 1;
        Ok(())
    }
}

fn skipped(mut report: ClipReport, reason: SkipReason) -> ClipReport {
    log::warn!("Skipping {}: {reason}", report.path.display());
    report.problem = Some(reason);
    report
}
