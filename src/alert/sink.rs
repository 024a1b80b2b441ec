use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::Alert;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("alert archive error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Append-only destination for alerts.
pub trait AlertSink {
    fn append(&mut self, alert: &Alert) -> Result<(), PersistenceError>;
    fn flush(&mut self) -> Result<(), PersistenceError>;
}

/// Newline-delimited JSON file, one alert per line.
pub struct JsonlSink {
    path: String,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Start a fresh stream at `path`, truncating an earlier run's output.
    pub fn create(path: &Path) -> Result<Self, PersistenceError> {
        let name = path.display().to_string();
        let file = File::create(path).map_err(|source| PersistenceError::Io {
            path: name.clone(),
            source,
        })?;
        Ok(Self {
            path: name,
            writer: BufWriter::new(file),
        })
    }

    /// Continue an existing stream.
    pub fn append_to(path: &Path) -> Result<Self, PersistenceError> {
        let name = path.display().to_string();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| PersistenceError::Io {
                path: name.clone(),
                source,
            })?;
        Ok(Self {
            path: name,
            writer: BufWriter::new(file),
        })
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AlertSink for JsonlSink {
    fn append(&mut self, alert: &Alert) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(alert)?;
        writeln!(self.writer, "{}", line).map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }
}

/// Keeps alerts in memory; for callers that only want the returned list.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub alerts: Vec<Alert>,
}

impl AlertSink for MemorySink {
    fn append(&mut self, alert: &Alert) -> Result<(), PersistenceError> {
        self.alerts.push(alert.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Read an alert stream back.
pub fn read_alerts(path: &Path) -> Result<Vec<Alert>, PersistenceError> {
    let content = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(PersistenceError::from))
        .collect()
}
