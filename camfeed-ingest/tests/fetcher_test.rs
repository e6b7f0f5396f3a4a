mod common;

use std::time::Duration;

use camfeed_ingest::{
    config::IngestConfig, fetcher::ClipFetcher, state::StateStore, window::Fallback,
};
use chrono::NaiveDateTime;
use color_eyre::eyre;
use common::{at, tmp_dir, FakeService, SeenRequest};

fn config_in(dir: &std::path::Path) -> IngestConfig {
    IngestConfig {
        raw_clips_dir: dir.join("data/raw_clips"),
        state_file: dir.join("data/meta_data/state.json"),
        delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Hands out the given times in order
fn clock(times: Vec<NaiveDateTime>) -> impl FnMut() -> NaiveDateTime {
    let mut times = times.into_iter();
    move || times.next().expect("asked for the time too many times")
}

#[test]
fn first_fetch_uses_fallback_and_advances() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    let mut service = FakeService::default();

    let report = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 5, 30)]),
    )
    .fetch()?;

    assert_eq!(Some("2025/11/20 09:00"), report.since.as_deref());
    assert_eq!(at(2025, 11, 21, 10, 5, 30), report.completed_at);
    assert_eq!(at(2025, 11, 21, 10, 5, 30), report.cursor);
    assert_eq!(
        vec![SeenRequest {
            since: Some("2025/11/20 09:00".into()),
            cameras: vec!["sort_C15".into()],
        }],
        service.requests
    );
    assert!(config.raw_clips_dir.is_dir());
    assert_eq!(
        Some(at(2025, 11, 21, 10, 5, 30)),
        StateStore::new(&config.state_file).cursor()
    );
    Ok(())
}

#[test]
fn second_fetch_resumes_at_cursor() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    let mut service = FakeService::default();

    ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 5, 30)]),
    )
    .fetch()?;

    let report = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 22, 10, 0, 0), at(2025, 11, 22, 10, 1, 0)]),
    )
    .fetch()?;

    assert_eq!(Some("2025/11/21 10:05"), report.since.as_deref());
    assert_eq!(
        Some(at(2025, 11, 22, 10, 1, 0)),
        StateStore::new(&config.state_file).cursor()
    );
    assert_eq!(2, service.requests.len());
    Ok(())
}

#[test]
fn failed_fetch_keeps_absent_cursor() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    let mut service = FakeService {
        fail_with: Some("token expired".into()),
        ..Default::default()
    };

    let err = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 5, 30)]),
    )
    .fetch()
    .unwrap_err();

    assert_eq!("token expired", err.to_string());
    assert_eq!(None, StateStore::new(&config.state_file).cursor());
    assert!(!config.state_file.exists());
    Ok(())
}

#[test]
fn failed_fetch_keeps_cursor_and_retries_same_window() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    let store = StateStore::new(&config.state_file);
    store.set_cursor(at(2025, 11, 20, 18, 30, 0))?;

    let mut service = FakeService {
        fail_with: Some("connection reset".into()),
        ..Default::default()
    };
    for day in [21, 22] {
        let result = ClipFetcher::with_clock(
            &config,
            &mut service,
            clock(vec![at(2025, 11, day, 10, 0, 0), at(2025, 11, day, 10, 5, 0)]),
        )
        .fetch();
        assert!(result.is_err());
        assert_eq!(Some(at(2025, 11, 20, 18, 30, 0)), store.cursor());
    }

    let sinces: Vec<_> = service.requests.iter().map(|r| r.since.clone()).collect();
    assert_eq!(
        vec![Some("2025/11/20 18:30".to_owned()), Some("2025/11/20 18:30".to_owned())],
        sinces
    );
    Ok(())
}

#[test]
fn clock_behind_cursor_reports_the_kept_cursor() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    let store = StateStore::new(&config.state_file);
    store.set_cursor(at(2025, 11, 21, 12, 0, 0))?;

    let mut service = FakeService::default();
    let report = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 5, 0)]),
    )
    .fetch()?;

    assert_eq!(Some("2025/11/21 12:00"), report.since.as_deref());
    assert_eq!(at(2025, 11, 21, 10, 5, 0), report.completed_at);
    assert_eq!(at(2025, 11, 21, 12, 0, 0), report.cursor);
    assert_eq!(Some(at(2025, 11, 21, 12, 0, 0)), store.cursor());
    Ok(())
}

#[test]
fn unbounded_fallback_sends_no_filter() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = IngestConfig {
        fallback: Fallback::Unbounded,
        ..config_in(dir.path())
    };
    let mut service = FakeService::default();

    let report = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 0, 1)]),
    )
    .fetch()?;

    assert_eq!(None, report.since);
    assert_eq!(None, service.requests[0].since);
    Ok(())
}

#[test]
fn other_state_keys_survive() -> eyre::Result<()> {
    let dir = tmp_dir();
    let config = config_in(dir.path());
    std::fs::create_dir_all(config.state_file.parent().unwrap())?;
    std::fs::write(
        &config.state_file,
        r#"{"last_downloaded_at": "garbage", "operator": "me"}"#,
    )?;

    let mut service = FakeService::default();
    let report = ClipFetcher::with_clock(
        &config,
        &mut service,
        clock(vec![at(2025, 11, 21, 10, 0, 0), at(2025, 11, 21, 10, 0, 1)]),
    )
    .fetch()?;

    // the garbage cursor counts as never downloaded
    assert_eq!(Some("2025/11/20 09:00"), report.since.as_deref());
    let state = StateStore::new(&config.state_file).load();
    assert_eq!(Some(at(2025, 11, 21, 10, 0, 1)), state.last_downloaded_at);
    assert_eq!(Some(&serde_json::json!("me")), state.other.get("operator"));
    Ok(())
}
