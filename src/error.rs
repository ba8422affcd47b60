//! Error types for loading, extraction, recognition and whole analysis runs.
//!
//! Per-segment failures ([`RecognitionError`], [`ArtifactError::InvalidSegment`])
//! are absorbed by the pipeline.  Everything that reaches the caller of a run
//! is wrapped in [`AnalysisError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The input recording could not be turned into samples.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported or corrupt audio: {0}")]
    Decode(String),

    #[error("no decodable audio track")]
    NoTrack,

    #[error("audio file contains no samples")]
    Empty,
}

/// Failure while materializing a segment as a transient WAV artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("segment {start}..{end} is outside the {len}-sample buffer or empty")]
    InvalidSegment { start: usize, end: usize, len: usize },

    #[error("cannot create artifact workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("artifact I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl ArtifactError {
    /// Systemic failures abort the run; the rest only skip one segment.
    pub fn is_systemic(&self) -> bool {
        !matches!(self, ArtifactError::InvalidSegment { .. })
    }
}

/// A single recognition attempt failed.  Never escapes the pipeline.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("cannot read artifact: {0}")]
    Artifact(String),

    #[error("recognizer process failed: {0}")]
    Process(String),

    #[error("rate limiter closed")]
    LimiterClosed,

    #[error("recognition task failed: {0}")]
    Task(String),
}

impl From<ureq::Error> for RecognitionError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, _) => RecognitionError::Status(code),
            ureq::Error::Transport(t) => RecognitionError::Transport(t.to_string()),
        }
    }
}

impl From<serde_json::Error> for RecognitionError {
    fn from(e: serde_json::Error) -> Self {
        RecognitionError::Malformed(e.to_string())
    }
}

/// Reading or writing the defaults file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME environment variable not set")]
    NoHome,

    #[error("config I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A run-level failure, surfaced only after the run's artifacts are gone.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("artifact failure aborted the run: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("analysis cancelled")]
    Cancelled,
}
