//! Error types for vtunnel

use thiserror::Error;

/// Main error type for vtunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A listener could not be bound
    #[error("Failed to bind {what}: {source}")]
    Bind {
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Handshake probe failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested transport is not available on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Wrap a listener bind failure. A transport the platform lacks is
    /// reported as [`TunnelError::Unsupported`] rather than a bind error.
    pub fn bind(what: impl Into<String>, source: std::io::Error) -> Self {
        let what = what.into();
        if source.kind() == std::io::ErrorKind::Unsupported {
            TunnelError::Unsupported(format!("{what}: {source}"))
        } else {
            TunnelError::Bind { what, source }
        }
    }

    /// Configuration problems are fatal for the affected tunnel only.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TunnelError::Config(_) | TunnelError::FileNotFound { .. } | TunnelError::Parse(_)
        )
    }
}
