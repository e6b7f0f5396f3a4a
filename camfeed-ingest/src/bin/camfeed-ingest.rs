use std::path::PathBuf;

use camfeed_common::bin_common::{
    args::parse_with_rcfile,
    init::{init_eyre, init_logger},
};
use camfeed_ingest::{
    blink::BlinkClient,
    camera_service::CameraService,
    config::IngestConfig,
    fetcher::ClipFetcher,
    window::Fallback,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre;

const RC_FILE: &str = ".camfeed-ingestrc";

#[derive(Parser, Debug)]
#[command()]
/// Downloads new clips from a Blink camera.
///
/// Remembers when it last succeeded and continues from there the next time. If started
/// without any arguments, they are read from `.camfeed-ingestrc` instead.
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// The tokens created by the login flow
    #[arg(long, env = "BLINK_AUTH_PATH", default_value = "blink_auth.json")]
    auth_file: PathBuf,

    /// The camera to download clips from
    #[arg(long, default_value = "sort_C15")]
    camera: String,

    /// Where to place the clips
    #[arg(long, default_value = "data/raw_clips")]
    raw_clips_dir: PathBuf,

    /// Where to remember the last download
    #[arg(long, default_value = "data/meta_data/state.json")]
    state_file: PathBuf,

    /// Where to start if nothing has been downloaded before: 'yesterday@HH:MM',
    /// 'unbounded' or a duration back from now, like '6h'
    #[arg(long, default_value = "yesterday@09:00")]
    fallback: Fallback,

    /// How long to wait between clip downloads
    #[arg(long, default_value = "2s")]
    delay: humantime::Duration,

    /// Request at most this many pages of clips
    #[arg(long, default_value_t = 10)]
    max_pages: u32,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Also log debug messages
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Download all clips since the last download (default)
    Fetch,
    /// Print the cameras on the account
    ListCameras,
}

impl Cli {
    fn config(&self) -> IngestConfig {
        IngestConfig {
            auth_file: self.auth_file.clone(),
            camera: self.camera.clone(),
            raw_clips_dir: self.raw_clips_dir.clone(),
            state_file: self.state_file.clone(),
            fallback: self.fallback.clone(),
            delay: self.delay.into(),
            max_pages: self.max_pages,
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
    let mut blink = BlinkClient::connect(&config)?;

    let result = match cli.command.unwrap_or(Command::Fetch) {
        Command::Fetch => ClipFetcher::new(&config, &mut blink).fetch().map(|_| ()),
        Command::ListCameras => list_cameras(&mut blink),
    };

    if let Err(e) = blink.close() {
        log::warn!("Failed to close the Blink session: {e}");
    }
    result
}

fn list_cameras(service: &mut impl CameraService) -> eyre::Result<()> {
    let cameras = service.list_cameras()?;
    log::info!("Found {} cameras", cameras.len());
    for camera in cameras {
        println!(
            "- {} (id={}, serial={})",
            camera.name,
            camera.id,
            camera.serial.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}
