//! Error types for the SMTP engine.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors produced while driving an SMTP session.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error during a network operation.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The peer sent something that does not parse as an SMTP reply.
    #[error("malformed SMTP reply: {0}")]
    Parse(String),

    /// The peer answered a command with an error status.
    #[error("peer replied {code}: {message}")]
    Rejected { code: u16, message: String },

    /// The command needs an extension the peer does not advertise.
    #[error("peer does not support {0}")]
    Unsupported(&'static str),

    /// The peer closed the connection mid-session.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// A single operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// The SMTP status code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the peer rejected the operation with a permanent (5xx) status.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500 && *code < 600)
    }
}

/// Specialized `Result` for SMTP engine operations.
pub type Result<T> = std::result::Result<T, ClientError>;
