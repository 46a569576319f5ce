use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    /// A required request field is missing or out of range. Raised before
    /// any network I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{action} failed: ret_code {code}; {message}")]
    Remote {
        action: String,
        code: i64,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("credential error: {0}")]
    Credential(String),
}

impl CloudError {
    /// Return code to report for this failure; local failures map to -1.
    pub fn status_code(&self) -> i64 {
        match self {
            CloudError::Remote { code, .. } => *code,
            _ => fleetscale_metrics::LOCAL_FAILURE_STATUS,
        }
    }
}

impl From<fleetscale_core::HttpError> for CloudError {
    fn from(e: fleetscale_core::HttpError) -> Self {
        CloudError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Decode(e.to_string())
    }
}

pub type CloudResult<T> = Result<T, CloudError>;
