//! `impedance`: chest impedance processor for venous air embolism and other findings.
//!
//! Acquires impedance from an Analog Discovery (or replays a recording), runs
//! the windowed analysis, and shows the result in a live plot. `--no-gui` runs
//! the same pipeline headless until the data ends or Ctrl-C is pressed.

use anyhow::{Context, Result};
use chest_impedance::app::{DebugOutput, Session};
use chest_impedance::config::Settings;
use chest_impedance::core::DataSource;
use chest_impedance::data::RecordingWriter;
use chest_impedance::error::ImpedanceError;
use chest_impedance::hardware::dwf::DwfAnalyzer;
use chest_impedance::hardware::mock::MockAnalyzer;
use chest_impedance::hardware::ImpedanceAnalyzer;
use chest_impedance::logging;
use chest_impedance::source::{AnalyzerSource, ReplaySource};
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "impedance",
    version,
    about = "Chest impedance processor for venous air embolism and other findings.",
    disable_version_flag = true
)]
struct Cli {
    /// Replay a CSV recording of time,value pairs
    #[arg(short, long, value_name = "CSV", conflicts_with_all = ["save", "simulate"])]
    replay: Option<PathBuf>,

    /// Save live measurements to a CSV file
    #[arg(short, long, value_name = "CSV")]
    save: Option<PathBuf>,

    /// Use a simulated analyzer instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Run without the plot window; Ctrl-C stops acquisition
    #[arg(long)]
    no_gui: bool,

    /// Configuration file (default: config/impedance.toml if present)
    #[arg(short, long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    if cli.dump_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }
    if !cli.no_gui && !cfg!(feature = "gui") {
        return Err(ImpedanceError::FeatureNotEnabled("gui".into()).into());
    }
    logging::init(&settings.application)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("impedance-worker")
        .build()
        .context("failed to start the async runtime")?;

    let source = build_source(&cli, &settings)?;
    let debug_output = if cli.no_gui {
        DebugOutput::Tracing
    } else {
        DebugOutput::Broadcast
    };
    let session = runtime.block_on(Session::start(source, &settings, debug_output))?;

    if cli.no_gui {
        runtime.block_on(run_headless(session))
    } else {
        run_gui(&runtime, session, &settings)
    }
}

/// Turn file errors into the messages users see for a bad path.
fn file_error(path: &Path, err: ImpedanceError) -> anyhow::Error {
    if err.is_not_found() {
        return anyhow::anyhow!("Path {} not found.", path.display());
    }
    match err {
        ImpedanceError::Io(io) => {
            anyhow::anyhow!("I/O error({}): {}", io.raw_os_error().unwrap_or(0), io)
        }
        other => other.into(),
    }
}

fn build_source(cli: &Cli, settings: &Settings) -> Result<Box<dyn DataSource>> {
    if let Some(path) = &cli.replay {
        let source = ReplaySource::open(path).map_err(|err| file_error(path, err))?;
        return Ok(Box::new(source));
    }

    let (analyzer, name): (Box<dyn ImpedanceAnalyzer>, &str) = if cli.simulate {
        (Box::new(MockAnalyzer::new()), "Simulated analyzer")
    } else {
        let analyzer = DwfAnalyzer::new(settings.analyzer.library_path.as_deref())?;
        (Box::new(analyzer), "Analog Discovery")
    };

    // Created only once the analyzer is available, so a failed start leaves an
    // existing file intact.
    let recording = cli
        .save
        .as_deref()
        .map(|path| RecordingWriter::create(path).map_err(|err| file_error(path, err)))
        .transpose()?;

    let mut source = AnalyzerSource::new(analyzer, settings.analyzer.clone()).with_name(name);
    if let Some(recording) = recording {
        source = source.with_recording(recording);
    }
    Ok(Box::new(source))
}

async fn run_headless(mut session: Session) -> Result<()> {
    tokio::select! {
        _ = session.finished() => {}
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("failed to listen for Ctrl-C")?;
            info!("Interrupted; stopping acquisition");
        }
    }
    let summary = session.shutdown().await?;
    info!(
        samples = summary.samples,
        rejected = summary.rejected,
        analyses = summary.analyses,
        "Session finished"
    );
    Ok(())
}

#[cfg(feature = "gui")]
fn run_gui(runtime: &Runtime, mut session: Session, settings: &Settings) -> Result<()> {
    let events = session.subscribe();
    let name = session.source_name().to_string();
    let shown = chest_impedance::gui::run(name, events, &settings.gui);
    let summary = runtime.block_on(session.shutdown());
    shown?;
    let summary = summary?;
    info!(samples = summary.samples, analyses = summary.analyses, "Session finished");
    Ok(())
}

/// Unreachable in practice: `run` rejects GUI mode before starting a session.
#[cfg(not(feature = "gui"))]
fn run_gui(runtime: &Runtime, session: Session, _settings: &Settings) -> Result<()> {
    runtime.block_on(session.shutdown())?;
    Err(ImpedanceError::FeatureNotEnabled("gui".into()).into())
}
