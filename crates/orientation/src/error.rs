//! Motion sensor error types

use thiserror::Error;

/// Errors reported by a motion sampler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Sensor hardware missing or not responding
    #[error("Motion sensor unavailable: {0}")]
    Unavailable(String),

    /// Motion access not granted
    #[error("Motion sensor access denied")]
    PermissionDenied,

    /// A single sample could not be read
    #[error("Motion sample read failed: {0}")]
    Read(String),

    /// Sampler already has an active subscription
    #[error("Motion sampler already started")]
    AlreadyStarted,
}
