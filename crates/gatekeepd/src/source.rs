//! Descriptor source for the facial channel.
//!
//! Face detection and descriptor extraction run in an external pipeline.
//! It publishes the latest detected face to a spool file; this side only
//! reads what it finds there.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read descriptor spool: {0}")]
    Read(std::io::Error),
    #[error("malformed descriptor spool: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One face observation.
#[derive(Debug, Clone)]
pub struct Capture {
    pub descriptor: Vec<f32>,
    /// Frame the descriptor was computed from, if the pipeline kept it.
    pub evidence: Option<PathBuf>,
}

/// Produces the next face descriptor on demand.
pub trait DescriptorSource: Send + 'static {
    /// `Ok(None)` when no face is currently detected.
    fn next_capture(&mut self) -> Result<Option<Capture>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct SpoolRecord {
    /// Increases with every face the pipeline publishes.
    sequence: u64,
    descriptor: Vec<f32>,
    #[serde(default)]
    frame: Option<PathBuf>,
}

/// Reads `{"sequence", "descriptor", "frame"?}` from a spool file and yields
/// a capture only when `sequence` moved since the previous poll.
pub struct SpoolDescriptorSource {
    path: PathBuf,
    last_sequence: Option<u64>,
}

impl SpoolDescriptorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_sequence: None,
        }
    }

    fn resolve_frame(&self, frame: PathBuf) -> PathBuf {
        if frame.is_absolute() {
            return frame;
        }
        self.path
            .parent()
            .map(|dir| dir.join(&frame))
            .unwrap_or(frame)
    }
}

impl DescriptorSource for SpoolDescriptorSource {
    fn next_capture(&mut self) -> Result<Option<Capture>, SourceError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SourceError::Read(e)),
        };
        let record: SpoolRecord = serde_json::from_slice(&raw)?;

        if self.last_sequence == Some(record.sequence) {
            return Ok(None);
        }
        self.last_sequence = Some(record.sequence);

        Ok(Some(Capture {
            descriptor: record.descriptor,
            evidence: record.frame.map(|f| self.resolve_frame(f)),
        }))
    }
}
