// NOTE: every test will complain about the functions it doesn't use
#![allow(unused)]

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use camfeed_ingest::camera_service::{CameraInfo, CameraService, DownloadRequest};
use chrono::{NaiveDate, NaiveDateTime};
use color_eyre::eyre;
use tempfile::TempDir;

/// Returns cargo's tmpdir
pub fn cargo_tmpdir() -> PathBuf {
    PathBuf::from(option_env!("CARGO_TARGET_TMPDIR").expect("no cargo tmpdir???"))
}

/// A fresh directory inside cargo's tmpdir, removed when dropped
pub fn tmp_dir() -> TempDir {
    TempDir::new_in(cargo_tmpdir()).expect("could not create temporary dir")
}

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

/// What the fake saw of a download request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub since: Option<String>,
    pub cameras: Vec<String>,
}

/// A camera service that writes a clip per request, or fails if told to.
#[derive(Default)]
pub struct FakeService {
    pub fail_with: Option<String>,
    pub requests: Vec<SeenRequest>,
    pub closed: bool,
}

impl CameraService for FakeService {
    fn list_cameras(&mut self) -> eyre::Result<Vec<CameraInfo>> {
        Ok(vec![CameraInfo {
            name: "sort_C15".into(),
            id: 1,
            serial: None,
        }])
    }

    fn download_videos(&mut self, request: &DownloadRequest<'_>) -> eyre::Result<()> {
        self.requests.push(SeenRequest {
            since: request.since.map(str::to_owned),
            cameras: request.cameras.to_vec(),
        });

        // a partial clip, as if the connection died half way
        let name = format!("sort_C15_clip{}.mp4", self.requests.len());
        std::fs::write(request.destination.join(name), b"not really a video")?;

        match &self.fail_with {
            Some(msg) => eyre::bail!("{msg}"),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> eyre::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// An answer from [`FakeBlink`]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    /// Promise more bytes than are sent, as if the connection died
    pub truncated: bool,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Self::bytes(value.to_string())
    }

    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            truncated: false,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            truncated: false,
        }
    }

    pub fn truncated(body: impl Into<Vec<u8>>) -> Self {
        Self {
            truncated: true,
            ..Self::bytes(body)
        }
    }
}

/// A local http server answering every request with `handler`, which gets the request
/// target, i.e. the path and query.
pub struct FakeBlink {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeBlink {
    pub fn start(handler: impl Fn(&str) -> Reply + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("could not bind");
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let Some(target) = read_target(&stream) else {
                    continue;
                };
                seen.lock().unwrap().push(target.clone());
                write_reply(stream, handler(&target));
            }
        });

        Self { url, requests }
    }

    /// Every request target seen so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Writes an auth file pointing at this server
    pub fn auth_file(&self, dir: &Path) -> PathBuf {
        let path = dir.join("blink_auth.json");
        let auth = serde_json::json!({"token": "secret", "account_id": 42, "host": self.url});
        std::fs::write(&path, auth.to_string()).unwrap();
        path
    }
}

fn read_target(stream: &TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let target = line.split_whitespace().nth(1)?.to_owned();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" => break,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    Some(target)
}

fn write_reply(mut stream: TcpStream, reply: Reply) {
    let reason = match reply.status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Error",
    };
    let length = reply.body.len() + if reply.truncated { 1000 } else { 0 };
    let head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Length: {length}\r\nConnection: close\r\n\r\n",
        reply.status
    );
    stream.write_all(head.as_bytes()).ok();
    stream.write_all(&reply.body).ok();
    stream.flush().ok();
}

/// The value of `key` in the query of a request target
pub fn query_param<'a>(target: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}
