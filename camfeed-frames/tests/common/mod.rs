// NOTE: every test will complain about the functions it doesn't use
#![allow(unused)]

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tempfile::TempDir;

/// Returns cargo's tmpdir
pub fn cargo_tmpdir() -> PathBuf {
    PathBuf::from(option_env!("CARGO_TARGET_TMPDIR").expect("no cargo tmpdir???"))
}

/// A fresh directory inside cargo's tmpdir, removed when dropped
pub fn tmp_dir() -> TempDir {
    TempDir::new_in(cargo_tmpdir()).expect("could not create temporary dir")
}

/// Renders ffmpeg's test pattern into `path`
pub fn create_test_video(path: &Path, seconds: u32, rate: u32, size: &str) {
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={seconds}:rate={rate}:size={size}"))
        .args(["-pix_fmt", "yuv420p"])
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .status()
        .expect("failed to execute ffmpeg");
    assert!(status.success(), "ffmpeg failed to create {}", path.display());
}
