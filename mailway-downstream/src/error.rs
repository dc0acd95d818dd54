//! Typed errors for the downstream delivery target.
//!
//! Two families: [`ConfigError`] is fatal at initialization and never
//! retried; [`TargetError`] covers a single delivery attempt and carries
//! the target instance name so aggregated multi-target logs stay
//! attributable.

use std::{io, sync::Arc};

use mailway_smtp::ClientError;
use thiserror::Error;

/// Fatal configuration problems, caught at initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The declared hostname has no A-label (ASCII) representation.
    #[error("hostname {hostname:?} cannot be represented as an A-label name: {reason}")]
    HostnameNotRepresentable { hostname: String, reason: String },

    /// Neither inline arguments nor the config supplied an endpoint.
    #[error("at least one target endpoint is required")]
    NoEndpoints,

    /// An endpoint spec did not parse.
    #[error("invalid endpoint {spec:?}: {reason}")]
    InvalidEndpoint { spec: String, reason: String },

    /// The auth directive is malformed (e.g. credentials a mechanism
    /// cannot encode).
    #[error("invalid auth directive: {0}")]
    InvalidAuthDirective(String),
}

/// An error from one delivery attempt, tagged with the target instance.
#[derive(Debug, Error)]
#[error("downstream {instance}: {kind}")]
pub struct TargetError {
    instance: Arc<str>,
    #[source]
    kind: ErrorKind,
}

impl TargetError {
    pub(crate) const fn new(instance: Arc<str>, kind: ErrorKind) -> Self {
        Self { instance, kind }
    }

    /// The target instance this error belongs to.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// What went wrong.
    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether the attempt ended because the caller cancelled it.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }
}

/// What failed during a delivery attempt.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Every configured endpoint failed; this is the error from the last
    /// one attempted. Earlier failures are logged, not surfaced.
    #[error("connect failed: {0}")]
    Connect(#[source] ClientError),

    /// TLS is required, but the endpoint did not negotiate it.
    #[error("TLS is required, but unsupported by downstream")]
    TlsRequired,

    /// The authenticator factory refused to produce a negotiator.
    #[error("cannot construct credential negotiator: {0}")]
    AuthSetup(String),

    /// Credential negotiation failed. Fatal to the attempt: the problem
    /// is not connectivity, so no endpoint failover happens.
    #[error("authentication failed: {0}")]
    Auth(#[source] ClientError),

    /// The peer rejected the envelope sender.
    #[error("sender rejected: {0}")]
    Sender(#[source] ClientError),

    /// The peer rejected one recipient. The session stays usable.
    #[error("recipient rejected: {0}")]
    Recipient(#[source] ClientError),

    /// Message transmission failed at or after DATA.
    #[error("transmission failed: {0}")]
    Transmit(#[source] ClientError),

    /// The body source could not be opened; nothing was transmitted.
    #[error("cannot open message body: {0}")]
    BodyOpen(#[source] io::Error),

    /// The caller's cancellation token fired mid-attempt.
    #[error("delivery cancelled")]
    Cancelled,

    /// An operation was invoked in a state that does not permit it.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

impl ErrorKind {
    /// Wraps an engine error under `stage`, except that cancellation keeps
    /// its own identity regardless of where it surfaced.
    pub(crate) fn wrap(err: ClientError, stage: fn(ClientError) -> Self) -> Self {
        if matches!(err, ClientError::Cancelled) {
            Self::Cancelled
        } else {
            stage(err)
        }
    }
}
