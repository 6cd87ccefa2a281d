//! Live impedance display built with `eframe`/`egui`.
//!
//! The window is a pure viewer: it drains [`PlotEvent`]s from the session's
//! broadcast channel once per frame and never blocks acquisition. If it falls
//! behind, the skipped events are counted and shown in the side panel.
//!
//! - Central panel: live impedance against sample time, and below it the
//!   processor's intermediate series, one line per label.
//! - Side panel: source, sample count, latest reading and analysis.

use crate::app::PlotEvent;
use crate::config::GuiConfig;
use crate::core::TimeValueSample;
use crate::data::WindowAnalysis;
use crate::error::{AppResult, ImpedanceError};
use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::info;

/// Window title and eframe application id.
pub const APP_NAME: &str = "impedance";

/// Plot data accumulated from the event stream.
#[derive(Debug, Default)]
pub struct PlotState {
    capacity: usize,
    live: VecDeque<[f64; 2]>,
    traces: BTreeMap<String, Vec<[f64; 2]>>,
    sample_count: u64,
    latest: Option<TimeValueSample>,
    analysis: Option<WindowAnalysis>,
    lagged: u64,
    finished: bool,
}

impl PlotState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: PlotEvent) {
        match event {
            PlotEvent::Sample(sample) => {
                if self.live.len() == self.capacity {
                    self.live.pop_front();
                }
                self.live.push_back([sample.t, sample.v]);
                self.sample_count += 1;
                self.latest = Some(sample);
            }
            PlotEvent::Trace {
                label,
                samples,
                clear_first,
            } => {
                let points = self.traces.entry(label).or_default();
                if clear_first {
                    points.clear();
                }
                points.extend(samples.iter().map(|s| [s.t, s.v]));
            }
            PlotEvent::Analysis(analysis) => self.analysis = Some(analysis),
            PlotEvent::Finished => self.finished = true,
        }
    }

    /// Apply everything waiting on `events`.
    pub fn drain(&mut self, events: &mut broadcast::Receiver<PlotEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged += skipped,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    self.finished = true;
                    break;
                }
            }
        }
    }

    pub fn live(&self) -> &VecDeque<[f64; 2]> {
        &self.live
    }

    pub fn trace(&self, label: &str) -> Option<&[[f64; 2]]> {
        self.traces.get(label).map(Vec::as_slice)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Events lost because the viewer fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

pub struct ImpedanceApp {
    source_name: String,
    events: broadcast::Receiver<PlotEvent>,
    state: PlotState,
    close_requested: bool,
}

impl ImpedanceApp {
    pub fn new(
        source_name: String,
        events: broadcast::Receiver<PlotEvent>,
        config: &GuiConfig,
    ) -> Self {
        Self {
            source_name,
            events,
            state: PlotState::new(config.plot_capacity),
            close_requested: false,
        }
    }

    fn status_panel(&self, ui: &mut egui::Ui) {
        ui.heading("Acquisition");
        ui.label(format!("Source: {}", self.source_name));
        ui.label(format!("Samples: {}", self.state.sample_count));
        match self.state.latest {
            Some(sample) => ui.label(format!("Latest: {:.3} Ω at {:.2} s", sample.v, sample.t)),
            None => ui.label("Latest: waiting for data"),
        };
        if self.state.lagged > 0 {
            ui.colored_label(
                egui::Color32::YELLOW,
                format!("Display lagged: {} events skipped", self.state.lagged),
            );
        }

        ui.separator();
        ui.heading("Analysis");
        match &self.state.analysis {
            Some(analysis) => {
                ui.label(format!(
                    "Window: {:.2} s to {:.2} s",
                    analysis.window_start, analysis.window_end
                ));
                ui.label(format!("Mean: {:.3} Ω", analysis.mean_ohms));
                ui.label(format!("Peak to peak: {:.3} Ω", analysis.peak_to_peak_ohms));
                match analysis.respiratory_rate_per_min {
                    Some(rate) => ui.label(format!("Respiration: {rate:.1} /min")),
                    None => ui.label("Respiration: not detected"),
                };
            }
            None => {
                ui.label("Waiting for the first full window");
            }
        }
    }
}

impl eframe::App for ImpedanceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.state.drain(&mut self.events);
        if self.state.finished && !self.close_requested {
            info!("Pipeline finished; closing window");
            self.close_requested = true;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        egui::SidePanel::left("status_panel")
            .resizable(true)
            .min_width(200.0)
            .show(ctx, |ui| self.status_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            let height = ui.available_height() / 2.0 - 24.0;

            ui.heading("Impedance");
            let live = Line::new(PlotPoints::from_iter(self.state.live.iter().copied()))
                .name("Impedance (Ω)");
            Plot::new("live_plot")
                .height(height)
                .x_axis_label("time (s)")
                .y_axis_label("Ω")
                .show(ui, |plot_ui| plot_ui.line(live));

            ui.heading("Processing");
            Plot::new("debug_plot")
                .height(height)
                .legend(Legend::default())
                .x_axis_label("time (s)")
                .show(ui, |plot_ui| {
                    for (label, points) in &self.state.traces {
                        plot_ui.line(
                            Line::new(PlotPoints::from_iter(points.iter().copied()))
                                .name(label),
                        );
                    }
                });
        });

        ctx.request_repaint();
    }
}

/// Run the window on the calling thread until it is closed.
pub fn run(
    source_name: String,
    events: broadcast::Receiver<PlotEvent>,
    config: &GuiConfig,
) -> AppResult<()> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(APP_NAME)
            .with_inner_size([config.window_width, config.window_height]),
        ..Default::default()
    };
    let app = ImpedanceApp::new(source_name, events, config);

    eframe::run_native(
        APP_NAME,
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|err| ImpedanceError::Gui(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn trace(label: &str, times: &[f64], clear_first: bool) -> PlotEvent {
        let samples: Vec<TimeValueSample> =
            times.iter().map(|&t| TimeValueSample::new(t, 1.0)).collect();
        PlotEvent::Trace {
            label: label.to_string(),
            samples: Arc::from(samples),
            clear_first,
        }
    }

    #[test]
    fn test_live_plot_capacity() {
        let mut state = PlotState::new(3);
        for i in 0..5 {
            state.apply(PlotEvent::Sample(TimeValueSample::new(i as f64, 50.0)));
        }
        assert_eq!(state.sample_count(), 5);
        let times: Vec<f64> = state.live().iter().map(|p| p[0]).collect();
        assert_eq!(times, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_clear_first_only_clears_its_label() {
        let mut state = PlotState::new(10);
        state.apply(trace("a", &[0.0, 1.0], false));
        state.apply(trace("b", &[0.0], false));
        state.apply(trace("a", &[2.0], false));
        assert_eq!(state.trace("a").map(<[_]>::len), Some(3));

        state.apply(trace("a", &[5.0], true));
        assert_eq!(state.trace("a"), Some(&[[5.0, 1.0]][..]));
        assert_eq!(state.trace("b").map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_drain_counts_lag_and_finish() {
        let (tx, mut rx) = broadcast::channel(2);
        for i in 0..4 {
            tx.send(PlotEvent::Sample(TimeValueSample::new(i as f64, 50.0)))
                .unwrap();
        }
        tx.send(PlotEvent::Finished).unwrap();

        let mut state = PlotState::new(10);
        state.drain(&mut rx);
        assert_eq!(state.lagged(), 3);
        assert_eq!(state.sample_count(), 1);
        assert!(state.is_finished());
    }
}
