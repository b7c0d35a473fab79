//! Error types for the gem engine

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the unlock engine and its collaborators.
#[derive(Debug, Error)]
pub enum GemError {
    #[error("Location unavailable: {0}")]
    LocationUnavailable(#[from] LocationError),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gem service returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("No hidden gem near the submitted coordinates")]
    NoTargetNearby,

    #[error("Invalid response from gem service: {0}")]
    InvalidResponse(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Local store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GemError {
    /// Failures that leave remote state untouched and are worth retrying on
    /// the next proximity tick.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            GemError::Network(_)
                | GemError::Timeout(_)
                | GemError::Server { .. }
                | GemError::NoTargetNearby
                | GemError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for GemError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GemError::InvalidResponse(e.to_string())
        } else {
            GemError::Network(e.to_string())
        }
    }
}

/// Errors reported by a position source. Each one ends the subscription that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("No position fix within {0:?}")]
    Timeout(Duration),

    #[error("Position unavailable: {0}")]
    Unavailable(String),
}

pub type GemResult<T> = Result<T, GemError>;
