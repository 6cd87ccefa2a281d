//! CSV recordings of impedance samples.
//!
//! A recording is a headerless CSV file with one `t,v` row per sample, both
//! fields unquoted numbers. Files written by [`RecordingWriter`] can be replayed
//! with [`crate::source::replay::ReplaySource`].

use crate::core::TimeValueSample;
use crate::error::{AppResult, ImpedanceError};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Parse every row of a recording.
///
/// `origin` is only used in error messages.
pub fn read_recording<R: Read>(reader: R, origin: &Path) -> AppResult<Vec<TimeValueSample>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let invalid = |reason: String| ImpedanceError::Recording {
            path: origin.to_path_buf(),
            line,
            reason,
        };

        if record.len() != 2 {
            return Err(invalid(format!(
                "expected 2 fields (time, value), found {}",
                record.len()
            )));
        }
        let field = |index: usize| -> AppResult<f64> {
            let raw = &record[index];
            raw.parse::<f64>()
                .map_err(|_| invalid(format!("field {} is not numeric: {raw:?}", index + 1)))
        };
        samples.push(TimeValueSample::new(field(0)?, field(1)?));
    }
    Ok(samples)
}

/// Read a recording from disk.
pub fn load_recording(path: &Path) -> AppResult<Vec<TimeValueSample>> {
    let file = File::open(path)?;
    read_recording(file, path)
}

/// Appends samples to a recording, flushing after every row so that a crash
/// loses at most the sample in flight.
pub struct RecordingWriter<W: Write = File> {
    path: PathBuf,
    writer: csv::Writer<W>,
    rows: u64,
}

impl RecordingWriter<File> {
    /// Create (truncating) the recording at `path`.
    pub fn create(path: &Path) -> AppResult<Self> {
        let file = File::create(path)?;
        info!(path = %path.display(), "Recording samples");
        Ok(Self::from_writer(file, path))
    }
}

impl<W: Write> RecordingWriter<W> {
    pub fn from_writer(writer: W, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer),
            rows: 0,
        }
    }

    pub fn append(&mut self, sample: &TimeValueSample) -> AppResult<()> {
        self.writer
            .write_record([sample.t.to_string(), sample.v.to_string()])?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> AppResult<W> {
        self.writer
            .into_inner()
            .map_err(|err| ImpedanceError::Io(err.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("test.csv")
    }

    #[test]
    fn test_reads_numeric_pairs() {
        let data = "0.01,52.5\n0.02,52.75\n";
        let samples = read_recording(data.as_bytes(), origin()).unwrap();
        assert_eq!(
            samples,
            vec![
                TimeValueSample::new(0.01, 52.5),
                TimeValueSample::new(0.02, 52.75)
            ]
        );
    }

    #[test]
    fn test_empty_recording() {
        assert!(read_recording("".as_bytes(), origin()).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_wrong_arity_with_line_number() {
        let data = "0.01,52.5\n0.02,52.75,1\n";
        let err = read_recording(data.as_bytes(), origin()).unwrap_err();
        match err {
            ImpedanceError::Recording { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("expected 2 fields"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rejects_quoted_text() {
        let data = "\"time\",\"value\"\n";
        let err = read_recording(data.as_bytes(), origin()).unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn test_writer_output_is_readable() {
        let mut writer = RecordingWriter::from_writer(Vec::new(), origin());
        writer.append(&TimeValueSample::new(0.01, 50.125)).unwrap();
        writer.append(&TimeValueSample::new(0.02, 50.5)).unwrap();
        assert_eq!(writer.rows(), 2);

        let bytes = writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "0.01,50.125\n0.02,50.5\n");
        let samples = read_recording(bytes.as_slice(), origin()).unwrap();
        assert_eq!(samples.len(), 2);
    }
}
