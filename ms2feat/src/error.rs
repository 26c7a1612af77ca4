use thiserror::Error;

/// Reasons a single MS2 record is rejected before any processing happens.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    #[error("m/z array ({mz}) does not match size of intensity array ({intensity})")]
    LengthMismatch { mz: usize, intensity: usize },
    #[error("spectrum contains no peaks")]
    Empty,
    #[error("negative intensity {intensity} at m/z {mz}")]
    NegativeIntensity { mz: f64, intensity: f64 },
    #[error("non-finite value in peak list at index {index}")]
    NonFinite { index: usize },
    #[error("all peak intensities are zero, cannot normalize")]
    AllZeroIntensity,
    #[error("invalid precursor m/z {0}")]
    InvalidPrecursor(f64),
}

/// Crate level error type.
#[derive(Debug, Error)]
pub enum Ms2FeatError {
    #[error("invalid spectrum: {0}")]
    Spectrum(#[from] SpectrumError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode binary table: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode binary table: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Ms2FeatError>;
