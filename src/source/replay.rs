//! Real-time playback of a recording.
//!
//! Samples are delivered at their original spacing, measured from the moment
//! the source is started, so downstream code sees the same timing it would
//! from the instrument.

use crate::core::{DataSource, SourceEvent, TimeValueSample};
use crate::data::recording::{load_recording, read_recording};
use crate::error::{AppResult, ImpedanceError};
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

pub struct ReplaySource {
    name: String,
    samples: Arc<[TimeValueSample]>,
    stopped: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReplaySource {
    /// Load the recording at `path`. The whole file is validated before any
    /// sample is delivered.
    pub fn open(path: &Path) -> AppResult<Self> {
        let samples = load_recording(path)?;
        info!(path = %path.display(), samples = samples.len(), "Loaded recording");
        Ok(Self::from_samples(path.display().to_string(), samples))
    }

    pub fn from_reader<R: Read>(reader: R, name: &str) -> AppResult<Self> {
        let samples = read_recording(reader, Path::new(name))?;
        Ok(Self::from_samples(name.to_string(), samples))
    }

    pub fn from_samples(name: String, samples: Vec<TimeValueSample>) -> Self {
        Self {
            name,
            samples: samples.into(),
            stopped: Arc::new(AtomicBool::new(true)),
            shutdown: None,
            task: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Median spacing between consecutive samples.
fn median_interval(samples: &[TimeValueSample]) -> Option<f64> {
    let mut intervals: Vec<f64> = samples.windows(2).map(|w| w[1].t - w[0].t).collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(f64::total_cmp);
    let mid = intervals.len() / 2;
    Some(if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    })
}

async fn replay(
    samples: Arc<[TimeValueSample]>,
    events: mpsc::Sender<SourceEvent>,
    stopped: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let start = Instant::now();
    let first = samples.first().map_or(0.0, |s| s.t);

    for sample in samples.iter() {
        let offset = Duration::try_from_secs_f64(sample.t - first).unwrap_or_default();
        tokio::select! {
            _ = &mut shutdown => return,
            _ = sleep_until(start + offset) => {}
        }
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        if events.send(SourceEvent::Sample(*sample)).await.is_err() {
            debug!("Replay receiver dropped");
            stopped.store(true, Ordering::SeqCst);
            return;
        }
    }

    if !stopped.swap(true, Ordering::SeqCst) {
        info!("End of recording");
        let _ = events.send(SourceEvent::EndOfStream).await;
    }
}

#[async_trait]
impl DataSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_sampling_period(&self) -> Option<f64> {
        median_interval(&self.samples)
    }

    async fn start(&mut self, events: mpsc::Sender<SourceEvent>) -> AppResult<()> {
        if !self.is_stopped() {
            return Err(ImpedanceError::AlreadyStarted(self.name.clone()));
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.stopped.store(false, Ordering::SeqCst);
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(replay(
            Arc::clone(&self.samples),
            events,
            Arc::clone(&self.stopped),
            shutdown_rx,
        )));
        Ok(())
    }

    async fn stop(&mut self) -> AppResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rows: &str) -> ReplaySource {
        ReplaySource::from_reader(rows.as_bytes(), "inline").unwrap()
    }

    #[test]
    fn test_median_interval() {
        let replay = source("0.0,1\n0.01,1\n0.02,1\n0.05,1\n0.06,1\n");
        let period = replay.expected_sampling_period().unwrap();
        assert!((period - 0.01).abs() < 1e-12);
        assert!(source("0.0,1\n").expected_sampling_period().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_then_ends() {
        let mut replay = source("10.0,50\n10.5,51\n11.0,52\n");
        let (tx, mut rx) = mpsc::channel(8);
        replay.start(tx).await.unwrap();
        assert!(!replay.is_stopped());

        let started = Instant::now();
        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 4);
        assert_eq!(
            received[2],
            SourceEvent::Sample(TimeValueSample::new(11.0, 52.0))
        );
        assert_eq!(received[3], SourceEvent::EndOfStream);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(replay.is_stopped());
        replay.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_end_of_stream() {
        let mut replay = source("0.0,50\n100.0,51\n");
        let (tx, mut rx) = mpsc::channel(8);
        replay.start(tx).await.unwrap();
        assert!(matches!(rx.recv().await, Some(SourceEvent::Sample(_))));

        replay.stop().await.unwrap();
        assert!(replay.is_stopped());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut replay = source("0.0,50\n1000.0,51\n");
        let (tx, _rx) = mpsc::channel(8);
        replay.start(tx.clone()).await.unwrap();
        let err = replay.start(tx).await.unwrap_err();
        assert!(matches!(err, ImpedanceError::AlreadyStarted(_)));
        replay.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_recording_ends_immediately() {
        let mut replay = source("");
        let (tx, mut rx) = mpsc::channel(1);
        replay.start(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(SourceEvent::EndOfStream));
    }
}
