use std::path::PathBuf;

use camfeed_common::bin_common::{
    args::parse_with_rcfile,
    init::{init_eyre, init_logger},
};
use camfeed_frames::sampler::{FrameSampler, Resolution, SamplerConfig};
use clap::Parser;
use color_eyre::eyre;

const RC_FILE: &str = ".camfeed-framesrc";

#[derive(Parser, Debug)]
#[command()]
/// Samples still frames from downloaded clips, one every `--interval`.
///
/// Frames are written to OUTPUT_ROOT/CAMERA/DATE/PREFIX_NNNNNN.jpg, numbered across all
/// clips in filename order. Clips of the wrong resolution are skipped. If started
/// without any arguments, they are read from `.camfeed-framesrc` instead.
struct Cli {
    /// Folder with the clips
    #[arg(long, default_value = "data/raw_clips")]
    input_dir: PathBuf,

    /// Where to place the frames
    #[arg(long, default_value = "data/frames")]
    output_root: PathBuf,

    /// The camera the clips are from
    #[arg(long, default_value = "sort_C15")]
    camera: String,

    /// Start of every frame's filename
    #[arg(long, default_value = "c15")]
    prefix: String,

    /// Only use clips of this resolution
    #[arg(long, default_value = "1920x1080")]
    resolution: Resolution,

    /// How long between each frame
    #[arg(long, default_value = "1s")]
    interval: humantime::Duration,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Also log every written frame
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> SamplerConfig {
        SamplerConfig {
            input_dir: self.input_dir.clone(),
            output_root: self.output_root.clone(),
            camera: self.camera.clone(),
            prefix: self.prefix.clone(),
            resolution: self.resolution,
            interval: self.interval.into(),
        }
    }
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli: Cli = parse_with_rcfile(RC_FILE)?;
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    init_logger(cli.logfile.as_deref(), level)?;
    log::debug!("CLI arguments: {cli:#?}");

    let config = cli.config();
    eyre::ensure!(!config.interval.is_zero(), "The interval must be above zero");

    let report = FrameSampler::new(&config).run()?;

    let problems: Vec<_> = report.problems().collect();
    if !problems.is_empty() {
        log::warn!("{} clips had problems:", problems.len());
        for (path, reason) in problems {
            log::warn!("  {}: {reason}", path.display());
        }
    }
    println!(
        "Extracted {} frames from {} clips into {}",
        report.total_frames,
        report.clips.len(),
        report.output_dir.display()
    );

    Ok(())
}
