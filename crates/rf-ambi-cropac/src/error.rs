//! Error types for the parametric binaural decoder

use std::path::PathBuf;

use thiserror::Error;

use crate::hoa::{ChannelOrdering, Normalization};

/// Decoder error types
#[derive(Error, Debug)]
pub enum CropacError {
    /// Invalid channel count
    #[error("Invalid channel count: expected {expected}, got {got}")]
    InvalidChannelCount { expected: usize, got: usize },

    /// Buffer size mismatch
    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },

    /// Invalid engine or codec configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Only ACN ordering is accepted
    #[error("Unsupported channel ordering: {0:?}")]
    UnsupportedOrdering(ChannelOrdering),

    /// Only N3D and SN3D are accepted
    #[error("Unsupported normalization: {0:?}")]
    UnsupportedNormalization(Normalization),

    /// HRIR file does not exist
    #[error("HRIR file not found: {}", .0.display())]
    HrirFileNotFound(PathBuf),

    /// HRIR data is malformed
    #[error("Invalid HRIR data: {0}")]
    InvalidHrirData(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HRIR interchange parse error
    #[error("HRIR parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Rebuild worker could not be started
    #[error("Rebuild worker error: {0}")]
    WorkerError(String),
}

/// Coarse classification used by hosts to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at initialization, audio processing must stay disabled
    Configuration,
    /// Recoverable, the previously published codec stays in use
    DataLoad,
}

impl CropacError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CropacError::HrirFileNotFound(_)
            | CropacError::InvalidHrirData(_)
            | CropacError::IoError(_)
            | CropacError::ParseError(_) => ErrorKind::DataLoad,
            _ => ErrorKind::Configuration,
        }
    }

    /// True if the engine can keep running on its previous state
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::DataLoad
    }
}

/// Result type for decoder operations
pub type CropacResult<T> = Result<T, CropacError>;
