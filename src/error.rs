//! Error types for the cloud-drive FUSE client.
//!
//! `DriveError` describes what went wrong talking to the remote drive.
//! `FsError` is the POSIX-shaped taxonomy every filesystem handler returns;
//! nothing else crosses the dispatcher boundary.

use std::time::Duration;
use thiserror::Error;

/// Remote drive errors with FUSE errno mapping.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Item not found (HTTP 404 or "not found" in an RPC error).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network timeout occurred.
    #[error("Network timeout after {duration:?}")]
    Timeout {
        duration: Duration,
        #[source]
        source: reqwest::Error,
    },

    /// Connection refused (gateway not reachable).
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Rate limited by the gateway (HTTP 429).
    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    /// Gateway error (HTTP 4xx/5xx other than 404 and 429).
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Invalid or malformed response from the gateway.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

impl DriveError {
    /// Map error to a FUSE errno code.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::Timeout { .. } => libc::ETIMEDOUT,
            Self::ConnectionRefused(_) => libc::ECONNREFUSED,
            Self::RateLimited => libc::EBUSY,
            Self::ServerError { .. } => libc::EIO,
            Self::InvalidResponse(_) | Self::JsonError(_) | Self::Base64Error(_) => libc::EPROTO,
            Self::HttpError(e) => {
                if e.is_timeout() {
                    libc::ETIMEDOUT
                } else if e.is_connect() {
                    libc::ECONNREFUSED
                } else {
                    libc::EIO
                }
            }
        }
    }

    /// Check if error indicates resource not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Filesystem handler errors, one per POSIX code the mount can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("operation not supported")]
    NotSupported,

    /// Remote-service or transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::NotADirectory => libc::ENOTDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NotSupported => libc::ENOSYS,
            Self::Io(_) => libc::EIO,
        }
    }
}

impl From<DriveError> for FsError {
    fn from(e: DriveError) -> Self {
        if e.is_not_found() {
            FsError::NotFound
        } else {
            FsError::Io(e.to_string())
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;
