//! Error types for certificate installation and keychain management.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeychainError>;

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Certificate dates invalid: {0}")]
    CertificateDates(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} {command} failed: {stderr}")]
    ToolFailed {
        tool: String,
        command: String,
        stderr: String,
    },

    #[error("Signing identity not found in keychain: {0}")]
    SigningIdentityNotFound(String),

    #[error("Consistency check failed: {0}")]
    ConsistencyCheck(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid base64 certificate: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse category of a [`KeychainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Platform,
    Input,
    Certificate,
    Tool,
    Consistency,
    Internal,
}

impl KeychainError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPlatform(_) => ErrorKind::Platform,
            Self::MissingInput(_) | Self::InvalidConfig(_) | Self::Toml(_) | Self::Base64(_) => {
                ErrorKind::Input
            }
            Self::InvalidCertificate(_) | Self::CertificateDates(_) => ErrorKind::Certificate,
            Self::ToolNotFound(_) | Self::ToolFailed { .. } | Self::SigningIdentityNotFound(_) => {
                ErrorKind::Tool
            }
            Self::ConsistencyCheck(_) => ErrorKind::Consistency,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Stderr captured from a failed tool, if any.
    #[must_use]
    pub fn tool_stderr(&self) -> Option<&str> {
        match self {
            Self::ToolFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
