//! Trace sinks: append-only consumers of per-step records.
//!
//! During the main sampling phase the engine can hand the current
//! observable values or the current walker position to a sink, at a
//! caller-chosen frequency. Each record is one line, the step index
//! followed by the values.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::McintError;

/// An append-only record sink keyed by step index.
pub trait TraceSink {
    /// Appends one record.
    fn write_record(&mut self, step: usize, values: &[f64]) -> Result<(), McintError>;

    /// Flushes any buffered records. Called once at the end of a run.
    fn flush(&mut self) -> Result<(), McintError> {
        Ok(())
    }
}

/// Buffered plain-text sink writing one whitespace-delimited line per
/// record.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Creates (or truncates) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, McintError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl TraceSink for FileSink {
    fn write_record(&mut self, step: usize, values: &[f64]) -> Result<(), McintError> {
        write!(self.writer, "{}", step)?;
        for v in values {
            write!(self.writer, "   {}", v)?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), McintError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_sink_writes_step_keyed_lines() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        {
            let mut sink = FileSink::create(file.path()).expect("Could not open sink");
            sink.write_record(0, &[1.5, 2.5]).unwrap();
            sink.write_record(7, &[3.0]).unwrap();
            sink.flush().unwrap();
        }
        let contents = fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["0   1.5   2.5", "7   3"]);
    }
}
