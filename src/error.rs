use std::error::Error;
use std::path::PathBuf;

use thiserror::Error;

use crate::timestamp::Timestamp;

pub type DynError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ChopError {
    #[error("failed to decode capture {file}: {reason}")]
    Decode { file: PathBuf, reason: String },

    #[error("I/O error on {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("event at {timestamp} does not fall inside any IQ file range")]
    UnmatchedEvent { timestamp: Timestamp },

    #[error("continuation file {file} (following {previous}) does not exist")]
    MissingContinuation { previous: PathBuf, file: PathBuf },

    #[error(
        "continuation file {file} holds {available} samples from offset {offset}, window needs {needed} (event at {timestamp})"
    )]
    ShortContinuation {
        file: PathBuf,
        timestamp: Timestamp,
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("window for event at {timestamp} starts past the end of {file} and its continuation")]
    WindowOutOfReach { file: PathBuf, timestamp: Timestamp },

    #[error("window for event at {timestamp} starts {samples} samples before the start of {file}")]
    NegativeOffset {
        file: PathBuf,
        timestamp: Timestamp,
        samples: i64,
    },

    #[error("capture {0} has no numeric sequence stem")]
    NonSequentialName(PathBuf),

    #[error("capture {0} appears more than once in the range index")]
    DuplicateFile(PathBuf),

    #[error("spectrogram shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChopError {
    pub fn io(file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            file: file.into(),
            source,
        }
    }

    pub fn decode(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            file: file.into(),
            reason: reason.into(),
        }
    }
}
