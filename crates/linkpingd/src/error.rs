//! Error types for linkpingd
//!
//! Configuration and startup socket errors are the only fatal conditions.
//! Everything that can go wrong while the daemon is running is converted to
//! an outcome or a log record and never unwinds across component boundaries.

use thiserror::Error;

/// Errors that can occur in linkpingd
#[derive(Debug, Error)]
pub enum LinkpingError {
    /// Invalid, missing or duplicate configuration setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cannot create, bind or connect a probe socket
    #[error("Socket error: {0}")]
    Socket(String),

    /// Link notification channel error
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// Received frame does not decode as expected
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Explicit error message on the link notification channel
    #[error("Kernel reported error: {0}")]
    KernelReported(i32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for linkpingd operations
pub type Result<T> = std::result::Result<T, LinkpingError>;
