//! Gateway errors

use reqwest::StatusCode;
use tftp::TftpError;
use thiserror::Error;

/// Everything that can go wrong between a read request and its last byte
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid startup configuration; fatal
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The filename could not be turned into a URL under the base URL
    #[error("cannot build URL for '{filename}': {reason}")]
    Construction { filename: String, reason: String },

    #[error("origin has no such file")]
    NotFound,

    #[error("origin returned {status}")]
    Origin { status: StatusCode },

    #[error("origin unreachable: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failure while copying the origin body into the transfer
    #[error("transfer interrupted: {0}")]
    Stream(String),
}

impl GatewayError {
    pub(crate) fn construction(filename: &str, reason: impl Into<String>) -> Self {
        Self::Construction {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// Only a missing file maps to the dedicated TFTP code; every other failure
/// is a generic error carrying the message.
impl From<GatewayError> for TftpError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound => TftpError::file_not_found(),
            other => TftpError::undefined(other.to_string()),
        }
    }
}
