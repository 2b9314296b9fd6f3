//! Error types for light-ss.

use thiserror::Error;

/// Result type alias for light-ss operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while proxying.
#[derive(Error, Debug)]
pub enum Error {
    /// Cryptographic operation failed (seal, open, key derivation)
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Unknown or unsupported cipher name
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    /// Client handshake did not follow SOCKS5 or HTTP grammar
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Malformed protocol data mid-stream
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Operation exceeded its deadline
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Listen socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The listen address that failed
        addr: String,
        /// Underlying socket error
        source: std::io::Error,
    },
}

impl Error {
    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Error::Handshake(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error is fatal at startup (config or bind)
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::UnsupportedCipher(_) | Error::Bind { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnsupportedCipher("rc4-md5".into());
        assert_eq!(err.to_string(), "unsupported cipher: rc4-md5");

        let err = Error::Timeout(5000);
        assert_eq!(err.to_string(), "timeout after 5000ms");
    }

    #[test]
    fn test_startup_failure() {
        assert!(Error::config("missing password").is_startup_failure());
        assert!(!Error::handshake("bad greeting").is_startup_failure());
    }
}
