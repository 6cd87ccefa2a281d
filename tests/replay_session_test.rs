//! End-to-end replay of a recording through the session pipeline.

use chest_impedance::app::{DebugOutput, PlotEvent, Session};
use chest_impedance::config::Settings;
use chest_impedance::core::{DataSource, TimeValueSample};
use chest_impedance::data::RecordingWriter;
use chest_impedance::error::ImpedanceError;
use chest_impedance::source::ReplaySource;
use std::f64::consts::PI;
use std::path::Path;
use tempfile::TempDir;

const PERIOD: f64 = 0.005;
const COUNT: usize = 400;

/// 2 s of 200 Hz samples breathing at 2 Hz.
fn write_recording(path: &Path) {
    let mut writer = RecordingWriter::create(path).unwrap();
    for i in 0..COUNT {
        let t = 3.0 + i as f64 * PERIOD;
        writer
            .append(&TimeValueSample::new(t, 50.0 + 0.5 * (2.0 * PI * 2.0 * t).sin()))
            .unwrap();
    }
    assert_eq!(writer.rows(), COUNT as u64);
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.processing.analysis_window_secs = 1.0;
    settings.processing.analysis_period_secs = 0.25;
    settings.processing.respiratory_band_hz = [1.0, 5.0];
    settings.gui.event_capacity = 8192;
    settings
}

#[tokio::test]
async fn test_replay_session_runs_to_end_of_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recording.csv");
    write_recording(&path);

    let source = ReplaySource::open(&path).unwrap();
    let period = source.expected_sampling_period().unwrap();
    assert!((period - PERIOD).abs() < 1e-9);

    let settings = fast_settings();
    let mut session = Session::start(Box::new(source), &settings, DebugOutput::Broadcast)
        .await
        .unwrap();
    let mut events = session.subscribe();

    session.finished().await;
    let summary = session.shutdown().await.unwrap();
    assert_eq!(summary.samples, COUNT as u64);
    assert_eq!(summary.rejected, 0);
    assert!(summary.end_of_stream);
    assert!(summary.analyses >= 3, "analyses: {}", summary.analyses);

    let mut samples = 0;
    let mut analyses = Vec::new();
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        match &event {
            PlotEvent::Sample(_) => samples += 1,
            PlotEvent::Analysis(analysis) => analyses.push(analysis.clone()),
            _ => {}
        }
        last = Some(event);
    }
    assert_eq!(samples, COUNT);
    assert_eq!(analyses.len() as u64, summary.analyses);
    assert_eq!(last, Some(PlotEvent::Finished));

    let rate = analyses[0].respiratory_rate_per_min.unwrap();
    assert!((rate - 120.0).abs() <= 12.0, "rate: {rate}");
    assert!((analyses[0].mean_ohms - 50.0).abs() < 0.2);
}

#[tokio::test]
async fn test_replay_can_be_stopped_early() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recording.csv");
    write_recording(&path);

    let source = ReplaySource::open(&path).unwrap();
    let session = Session::start(Box::new(source), &fast_settings(), DebugOutput::Tracing)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let summary = session.shutdown().await.unwrap();
    assert!(!summary.end_of_stream);
    assert!(summary.samples > 0 && summary.samples < COUNT as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_subscriber_sees_events_published_before_it_subscribed() {
    let source = ReplaySource::from_samples(
        "single".to_string(),
        vec![TimeValueSample::new(0.0, 50.0)],
    );
    let mut session = Session::start(Box::new(source), &fast_settings(), DebugOutput::Broadcast)
        .await
        .unwrap();
    session.finished().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut events = session.subscribe();
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            PlotEvent::Sample(TimeValueSample::new(0.0, 50.0)),
            PlotEvent::Finished
        ]
    );

    // Later subscribers start from the present.
    assert!(session.subscribe().try_recv().is_err());
    let summary = session.shutdown().await.unwrap();
    assert_eq!(summary.samples, 1);
    assert!(summary.end_of_stream);
}

#[test]
fn test_missing_recording_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = ReplaySource::open(&dir.path().join("absent.csv")).err().unwrap();
    assert!(err.is_not_found());
}

#[test]
fn test_malformed_recording_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.csv");
    std::fs::write(&path, "0.0,50.0\n0.01,abc\n").unwrap();
    let err = ReplaySource::open(&path).err().unwrap();
    assert!(matches!(err, ImpedanceError::Recording { line: 2, .. }));
}
