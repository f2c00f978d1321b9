// Error taxonomy for the TDOA pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TdoaError {
    /// No usable capture records were supplied.
    #[error("no capture records available")]
    DataNotFound,

    #[error("insufficient stations: found {found}, need at least {required}")]
    InsufficientStations { found: usize, required: usize },

    /// Non-fatal: the pair is excluded from the measurement set.
    #[error("sample rate mismatch between {station_a} ({rate_a} Hz) and {station_b} ({rate_b} Hz)")]
    SampleRateMismatch {
        station_a: String,
        station_b: String,
        rate_a: f64,
        rate_b: f64,
    },

    /// Non-fatal: the capture is excluded from synchronization.
    #[error("malformed capture from {station_id}: {reason}")]
    MalformedCapture { station_id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TdoaError>;
