use thiserror::Error;

/// Longest slice of an error response body kept in a failure message.
pub const MAX_ERROR_BODY_CHARS: usize = 200;

/// Why a single chat completion attempt failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The attempt exceeded its timeout
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    /// Response body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn status(status: u16, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body)
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        Self::Status { status, body }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}
