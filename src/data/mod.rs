//! Windowing, analysis and storage of impedance samples.

pub mod analysis;
pub mod processor;
pub mod recording;
pub mod resample;
pub mod sample_queue;

pub use analysis::WindowAnalysis;
pub use processor::DataProcessor;
pub use recording::RecordingWriter;
pub use sample_queue::TimeValueSampleQueue;
