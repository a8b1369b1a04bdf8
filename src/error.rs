use thiserror::Error;

/// Failure modes shared by every accessor service.
///
/// List endpoints degrade to an empty result set on `Backend` failures
/// instead of surfacing them; mutations always propagate.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No device matches the caller/token pair, or the device belongs to
    /// somebody else.
    #[error("access denied: device is not registered to this user")]
    AccessDenied,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller-supplied timestamp could not be parsed into finite epoch
    /// milliseconds.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// CSV export requested for an empty reading set. Exports never
    /// produce an empty file.
    #[error("no sensor data to export")]
    EmptyExport,

    /// Underlying store failure; the original message is preserved.
    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
