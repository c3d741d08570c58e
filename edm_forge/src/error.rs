// Error taxonomy for the pipeline.
//
// Three failure families reach the caller of build_track:
// - ValidationError: bad request parameters, rejected before any model call.
// - GeneratorError: a collaborator was unavailable, refused the request, or
//   returned something unusable. Wrapped with the stage (rhythm or melody)
//   that hit it.
// - ExportError: the MIDI file could not be encoded or written. Always
//   carries the path that was attempted.
//
// None of these are retried here. Retrying is the caller's decision.

use std::fmt;
use std::path::PathBuf;

use crate::timeline::TimelineError;

/// Which builder a generation failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rhythm,
    Melody,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Rhythm => write!(f, "rhythm"),
            Stage::Melody => write!(f, "melody"),
        }
    }
}

/// Failure reported by (or about) an external generator or decoder.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("unknown style selector '{0}'")]
    UnknownStyle(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("decoder returned no timelines")]
    EmptyDecode,

    #[error("generator returned an invalid timeline: {0}")]
    InvalidOutput(#[from] TimelineError),
}

/// Request parameters rejected before any generation work starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("bar count must be at least 1, got {0}")]
    NoBars(u32),

    #[error("bar count {requested} exceeds the maximum of {max}")]
    TooManyBars { requested: u32, max: u32 },

    #[error("temperature must be a positive finite number, got {0}")]
    BadTemperature(f64),
}

/// Failure while encoding or writing the MIDI file.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {message}", .path.display())]
    Encode { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },
}

impl ExportError {
    /// The file path the export was aimed at.
    pub fn path(&self) -> &std::path::Path {
        match self {
            ExportError::Io { path, .. }
            | ExportError::Encode { path, .. }
            | ExportError::Decode { path, .. } => path,
        }
    }
}

/// Anything that aborts a build_track invocation.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{stage} generation failed: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: GeneratorError,
    },

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl TrackError {
    /// Wrap a collaborator failure with the builder stage it came from.
    pub fn generation(stage: Stage, source: GeneratorError) -> Self {
        TrackError::Generation { stage, source }
    }
}

/// Failure loading a TrackConfig file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
