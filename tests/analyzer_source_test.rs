//! Polling loop behaviour against the simulated analyzer.

use chest_impedance::config::AnalyzerConfig;
use chest_impedance::core::{DataSource, SourceEvent, TimeValueSample};
use chest_impedance::data::recording::load_recording;
use chest_impedance::data::RecordingWriter;
use chest_impedance::hardware::mock::MockAnalyzer;
use chest_impedance::source::AnalyzerSource;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn fast_config() -> AnalyzerConfig {
    AnalyzerConfig {
        polling_frequency_hz: 200.0,
        reconnect_interval_ms: 10,
        ..AnalyzerConfig::default()
    }
}

async fn drain(mut rx: mpsc::Receiver<SourceEvent>) -> Vec<SourceEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn samples(events: &[SourceEvent]) -> Vec<TimeValueSample> {
    events
        .iter()
        .filter_map(|event| match event {
            SourceEvent::Sample(sample) => Some(*sample),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_polls_on_schedule_and_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.csv");

    let mock = MockAnalyzer::new()
        .with_device_after(3)
        .with_open_failures(2)
        .with_invalid_every(5);
    let counters = mock.counters();
    let config = fast_config();
    let period = config.polling_period();

    let mut source = AnalyzerSource::new(mock, config.clone())
        .with_name("Simulated analyzer")
        .with_recording(RecordingWriter::create(&path).unwrap());
    assert_eq!(source.expected_sampling_period(), Some(period));

    let (tx, rx) = mpsc::channel(4096);
    source.start(tx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    source.stop().await.unwrap();
    assert!(source.is_stopped());

    let events = drain(rx).await;
    let samples = samples(&events);
    assert_eq!(samples.len(), events.len(), "no fault or end of stream expected");
    assert!(samples.len() >= 10, "only {} samples", samples.len());

    for pair in samples.windows(2) {
        assert!(pair[1].t > pair[0].t);
    }
    for sample in &samples {
        let slot = sample.t / period;
        assert!((slot - slot.round()).abs() < 1e-6, "t={} is off the grid", sample.t);
        assert!(config.is_valid_reading(sample.v));
    }

    assert!(counters.enumerations() >= 3);
    assert!(counters.readings() > samples.len() as u64, "invalid readings are skipped");
    assert_eq!(counters.closes(), 1);

    let recorded = load_recording(&path).unwrap();
    assert_eq!(recorded, samples);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_status_skips_slot_and_keeps_polling() {
    let mock = MockAnalyzer::new().with_pending_every(4);
    let counters = mock.counters();
    let reference = MockAnalyzer::new();
    let config = fast_config();

    let mut source = AnalyzerSource::new(mock, config.clone());
    let (tx, rx) = mpsc::channel(4096);
    source.start(tx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    source.stop().await.unwrap();

    let events = drain(rx).await;
    let samples = samples(&events);
    assert_eq!(samples.len(), events.len(), "no fault expected");

    let polls = counters.status_polls();
    assert!(polls >= 20, "only {polls} polls");
    assert_eq!(counters.readings(), polls - polls / 4);
    assert_eq!(samples.len() as u64, counters.readings());

    // Pending slots leave gaps on the grid; the waveform still follows sample time.
    let period = config.polling_period();
    let last_slot = (samples[samples.len() - 1].t / period).round() as u64;
    assert!(last_slot > samples.len() as u64);
    for sample in &samples {
        assert!(
            (sample.v - reference.impedance_at(sample.t)).abs() < 0.1,
            "t={} v={}",
            sample.t,
            sample.v
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_failure_emits_fault() {
    let mock = MockAnalyzer::new().with_status_failure_after(5);
    let counters = mock.counters();
    let mut source = AnalyzerSource::new(mock, fast_config());

    let (tx, rx) = mpsc::channel(64);
    source.start(tx).await.unwrap();
    let events = drain(rx).await;

    assert_eq!(samples(&events).len(), 5);
    match events.last() {
        Some(SourceEvent::Fault(message)) => assert!(message.contains("Device disconnected")),
        other => panic!("expected a fault, got {other:?}"),
    }
    assert!(source.is_stopped());
    source.stop().await.unwrap();
    assert_eq!(counters.closes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_while_awaiting_device() {
    let mock = MockAnalyzer::new().with_device_after(u64::MAX);
    let counters = mock.counters();
    let mut source = AnalyzerSource::new(mock, fast_config());

    let (tx, rx) = mpsc::channel(8);
    source.start(tx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopping = tokio::time::timeout(Duration::from_secs(2), source.stop()).await;
    assert!(stopping.is_ok(), "stop did not return promptly");
    assert!(drain(rx).await.is_empty());
    assert!(counters.enumerations() >= 1);
    assert_eq!(counters.closes(), 0);
}

#[tokio::test]
async fn test_second_start_rejected() {
    let mut source = AnalyzerSource::new(
        MockAnalyzer::new().with_device_after(u64::MAX),
        fast_config(),
    );
    let (tx, _rx) = mpsc::channel(8);
    source.start(tx.clone()).await.unwrap();
    assert!(source.start(tx).await.is_err());
    source.stop().await.unwrap();
}
