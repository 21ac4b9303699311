// Error types shared by the library modules. The binary and the UI layer
// wrap these in `anyhow` at the edge; everything below returns them
// directly so callers can match on the kind of failure.

use thiserror::Error;

/// Message shown for any failure where the request never produced a usable
/// answer (timeout, DNS, refused connection, server crash).
pub const GENERIC_UPLOAD_MESSAGE: &str = "An error occurred during upload";

/// Message shown when deleting a history entry fails without a server reason.
pub const GENERIC_DELETE_MESSAGE: &str = "An error occurred while deleting";

/// Rejections raised locally before anything is sent to the server.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Please select a file")]
    NoFileSelected,

    #[error("only IFC files are accepted")]
    NotIfc { name: String },

    #[error("file is too large ({size} bytes, limit is {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("could not read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of one upload attempt. Every variant is fatal to the attempt;
/// nothing is retried.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Negotiation(String),

    #[error("{0}")]
    ChunkTransfer(String),

    #[error("session expired")]
    SessionExpired,

    #[error("unexpected response from server: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("an upload is already in progress")]
    Busy,

    #[error("upload cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidTransition(#[from] crate::state::InvalidTransition),
}

impl UploadError {
    /// Text for the inline error display. Transport failures collapse into
    /// a single generic message.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Network(_) | UploadError::Protocol(_) => GENERIC_UPLOAD_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Failures of the optional form login.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected for {0}")]
    Rejected(String),

    #[error("login page has no csrf_token field")]
    MissingToken,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Failures of the history listing and delete actions.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{0}")]
    Rejected(String),

    #[error("server responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("session expired")]
    SessionExpired,

    #[error("unexpected response from server: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<UploadError> for HistoryError {
    /// Used when fetching the CSRF token for a history mutation fails.
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Network(e) => HistoryError::Network(e),
            UploadError::SessionExpired => HistoryError::SessionExpired,
            other => HistoryError::Protocol(other.to_string()),
        }
    }
}

impl HistoryError {
    pub fn user_message(&self) -> String {
        match self {
            HistoryError::Rejected(msg) => msg.clone(),
            _ => GENERIC_DELETE_MESSAGE.to_string(),
        }
    }
}
