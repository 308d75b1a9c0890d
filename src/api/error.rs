use thiserror::Error;

/// Errors from talking to the signage backend.
///
/// Transport and status failures are network errors: non-fatal, retried on
/// the next heartbeat. `Protocol` means the server answered with something
/// the engine can't use, so the caller falls back to cached data.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error calling {endpoint}: {source}")]
    Network {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("Unexpected response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error("Device is not paired; run `signage-sync pair` first")]
    NotPaired,
}

impl ApiError {
    /// Whether the failure is about reaching the server rather than what it said.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::HttpStatus { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
