//! Acquisition session: a data source feeding the processing pipeline.
//!
//! ```text
//! DataSource --mpsc--> run_pipeline --(DataProcessor)--> broadcast<PlotEvent> --> viewers
//! ```
//!
//! The pipeline runs on its own Tokio task. Viewers (the GUI, tests) subscribe
//! to the broadcast channel; a viewer that falls behind loses the oldest events
//! rather than stalling acquisition.

use crate::config::Settings;
use crate::core::{DataSource, GraphicalDebuggingDelegate, SourceEvent, TimeValueSample};
use crate::data::{DataProcessor, WindowAnalysis};
use crate::error::{AppResult, ImpedanceError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events published to viewers.
#[derive(Clone, Debug, PartialEq)]
pub enum PlotEvent {
    /// An accepted sample.
    Sample(TimeValueSample),
    /// Intermediate series from the processor.
    Trace {
        label: String,
        samples: Arc<[TimeValueSample]>,
        clear_first: bool,
    },
    Analysis(WindowAnalysis),
    /// The pipeline has finished; nothing further will be sent.
    Finished,
}

/// Publishes intermediate series as [`PlotEvent::Trace`].
pub struct BroadcastDelegate {
    tx: broadcast::Sender<PlotEvent>,
}

impl BroadcastDelegate {
    pub fn new(tx: broadcast::Sender<PlotEvent>) -> Self {
        Self { tx }
    }
}

impl GraphicalDebuggingDelegate for BroadcastDelegate {
    fn graph_intermediate_samples(
        &mut self,
        label: &str,
        samples: &[TimeValueSample],
        clear_first: bool,
    ) {
        // No subscribers is fine.
        let _ = self.tx.send(PlotEvent::Trace {
            label: label.to_string(),
            samples: samples.into(),
            clear_first,
        });
    }
}

/// Logs a summary of each intermediate series.
#[derive(Debug, Default)]
pub struct TracingDelegate;

impl GraphicalDebuggingDelegate for TracingDelegate {
    fn graph_intermediate_samples(
        &mut self,
        label: &str,
        samples: &[TimeValueSample],
        clear_first: bool,
    ) {
        debug!(
            label,
            samples = samples.len(),
            first = samples.first().map(|s| s.t),
            last = samples.last().map(|s| s.t),
            clear_first,
            "Intermediate samples"
        );
    }
}

/// Where the processor's intermediate series go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugOutput {
    /// [`BroadcastDelegate`], for plotting.
    Broadcast,
    /// [`TracingDelegate`], for headless runs.
    Tracing,
}

/// Counters reported when the pipeline ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    /// Samples accepted by the processor.
    pub samples: u64,
    /// Samples rejected for arriving out of order.
    pub rejected: u64,
    pub analyses: u64,
    /// The source reported the end of its data.
    pub end_of_stream: bool,
}

/// Feed source events through `processor` until the source ends.
///
/// Returns an [`ImpedanceError::Instrument`] error if the source faults.
/// [`PlotEvent::Finished`] is published in every case.
pub async fn run_pipeline(
    mut events: mpsc::Receiver<SourceEvent>,
    mut processor: DataProcessor,
    plot_tx: broadcast::Sender<PlotEvent>,
) -> AppResult<PipelineSummary> {
    let mut summary = PipelineSummary::default();
    let result = loop {
        let Some(event) = events.recv().await else {
            debug!("Source channel closed");
            break Ok(());
        };
        match event {
            SourceEvent::Sample(sample) => match processor.on_sample(sample) {
                Ok(analysis) => {
                    summary.samples += 1;
                    let _ = plot_tx.send(PlotEvent::Sample(sample));
                    if let Some(analysis) = analysis {
                        summary.analyses += 1;
                        let _ = plot_tx.send(PlotEvent::Analysis(analysis));
                    }
                }
                Err(err @ ImpedanceError::NonMonotonicSample { .. }) => {
                    summary.rejected += 1;
                    warn!(error = %err, "Rejected sample");
                }
                Err(err) => break Err(err),
            },
            SourceEvent::EndOfStream => {
                summary.end_of_stream = true;
                break Ok(());
            }
            SourceEvent::Fault(message) => break Err(ImpedanceError::Instrument(message)),
        }
    };

    let _ = plot_tx.send(PlotEvent::Finished);
    info!(
        samples = summary.samples,
        rejected = summary.rejected,
        analyses = summary.analyses,
        end_of_stream = summary.end_of_stream,
        "Pipeline finished"
    );
    result.map(|()| summary)
}

/// A running source and pipeline.
pub struct Session {
    source: Box<dyn DataSource>,
    plot_tx: broadcast::Sender<PlotEvent>,
    /// Subscribed before the source started, so it misses nothing.
    viewer: Option<broadcast::Receiver<PlotEvent>>,
    pipeline: Option<JoinHandle<AppResult<PipelineSummary>>>,
    outcome: Option<AppResult<PipelineSummary>>,
}

impl Session {
    /// Start `source` and the pipeline behind it.
    ///
    /// The processing period is the source's expected sampling period, or the
    /// analyzer polling period when the source cannot tell.
    pub async fn start(
        mut source: Box<dyn DataSource>,
        settings: &Settings,
        debug_output: DebugOutput,
    ) -> AppResult<Self> {
        let capacity = settings.gui.event_capacity.max(1);
        let (plot_tx, viewer) = broadcast::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        let period = source
            .expected_sampling_period()
            .filter(|p| *p > 0.0)
            .unwrap_or_else(|| settings.analyzer.polling_period());
        let delegate: Box<dyn GraphicalDebuggingDelegate> = match debug_output {
            DebugOutput::Broadcast => Box::new(BroadcastDelegate::new(plot_tx.clone())),
            DebugOutput::Tracing => Box::new(TracingDelegate),
        };
        let processor = DataProcessor::new(period, settings.processing.clone(), delegate);

        info!(source = source.name(), sampling_period = period, "Starting session");
        source.start(event_tx).await?;
        let pipeline = tokio::spawn(run_pipeline(event_rx, processor, plot_tx.clone()));

        Ok(Self {
            source,
            plot_tx,
            viewer: Some(viewer),
            pipeline: Some(pipeline),
            outcome: None,
        })
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Receiver for plot events.
    ///
    /// The first call returns a receiver holding every event since the session
    /// started, up to the channel capacity. Later calls only see events
    /// published from then on.
    pub fn subscribe(&mut self) -> broadcast::Receiver<PlotEvent> {
        self.viewer
            .take()
            .unwrap_or_else(|| self.plot_tx.subscribe())
    }

    /// Wait for the pipeline to end on its own (end of data or a fault).
    ///
    /// Cancel safe: dropping the future leaves the session intact.
    pub async fn finished(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            let result = pipeline.await;
            self.pipeline = None;
            self.outcome = Some(result.map_err(ImpedanceError::from).and_then(|r| r));
        }
    }

    /// Stop the source, then wait for the pipeline to drain.
    pub async fn shutdown(mut self) -> AppResult<PipelineSummary> {
        let stopped = self.source.stop().await;
        self.finished().await;
        stopped?;
        self.outcome.unwrap_or_else(|| {
            Err(ImpedanceError::Processing("pipeline produced no result".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;

    fn processor(delegate: Box<dyn GraphicalDebuggingDelegate>) -> DataProcessor {
        let config = ProcessingConfig {
            analysis_window_secs: 1.0,
            analysis_period_secs: 0.5,
            ..ProcessingConfig::default()
        };
        DataProcessor::new(0.1, config, delegate)
    }

    async fn send_samples(tx: &mpsc::Sender<SourceEvent>, times: impl Iterator<Item = f64>) {
        for t in times {
            tx.send(SourceEvent::Sample(TimeValueSample::new(t, 50.0)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_pipeline_counts_and_ends_on_end_of_stream() {
        let (tx, rx) = mpsc::channel(64);
        let (plot_tx, mut plot_rx) = broadcast::channel(256);
        let delegate = Box::new(BroadcastDelegate::new(plot_tx.clone()));
        let pipeline = tokio::spawn(run_pipeline(rx, processor(delegate), plot_tx));

        send_samples(&tx, (0..20).map(|i| i as f64 * 0.1)).await;
        tx.send(SourceEvent::Sample(TimeValueSample::new(0.5, 50.0)))
            .await
            .unwrap();
        tx.send(SourceEvent::EndOfStream).await.unwrap();

        let summary = pipeline.await.unwrap().unwrap();
        assert_eq!(summary.samples, 20);
        assert_eq!(summary.rejected, 1);
        assert!(summary.analyses >= 1);
        assert!(summary.end_of_stream);

        let mut traces = 0;
        let mut last = None;
        while let Ok(event) = plot_rx.try_recv() {
            if matches!(event, PlotEvent::Trace { .. }) {
                traces += 1;
            }
            last = Some(event);
        }
        assert_eq!(traces as u64, 2 * summary.analyses);
        assert_eq!(last, Some(PlotEvent::Finished));
    }

    #[tokio::test]
    async fn test_pipeline_fault_is_an_error() {
        let (tx, rx) = mpsc::channel(8);
        let (plot_tx, mut plot_rx) = broadcast::channel(8);
        let pipeline = tokio::spawn(run_pipeline(
            rx,
            processor(Box::new(TracingDelegate)),
            plot_tx,
        ));
        tx.send(SourceEvent::Fault("Device disconnected".into()))
            .await
            .unwrap();

        let err = pipeline.await.unwrap().unwrap_err();
        assert!(matches!(err, ImpedanceError::Instrument(ref m) if m == "Device disconnected"));
        assert_eq!(plot_rx.recv().await.unwrap(), PlotEvent::Finished);
    }

    #[tokio::test]
    async fn test_pipeline_ends_when_source_drops() {
        let (tx, rx) = mpsc::channel(8);
        let (plot_tx, _) = broadcast::channel(8);
        let pipeline = tokio::spawn(run_pipeline(
            rx,
            processor(Box::new(TracingDelegate)),
            plot_tx,
        ));
        send_samples(&tx, (0..3).map(f64::from)).await;
        drop(tx);

        let summary = pipeline.await.unwrap().unwrap();
        assert_eq!(summary.samples, 3);
        assert!(!summary.end_of_stream);
    }
}
