//! Pluggable credential negotiation.
//!
//! An [`AuthenticatorFactory`] is an optional capability on the target:
//! when present, every delivery builds a fresh negotiator from the
//! message metadata and drives it against the connection before any
//! transaction command. Absence means no authentication; there is no
//! fallback from a failed negotiation to unauthenticated use.

use async_trait::async_trait;
use mailway_smtp::ClientError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::AuthConfig, error::ConfigError, target::MessageMeta, transport::Transport,
};

/// A credential negotiator bound to one connection.
#[async_trait]
pub trait Authenticator: Send {
    /// Proves identity to the peer over `conn`.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the current delivery attempt.
    async fn negotiate(
        &mut self,
        ctx: &CancellationToken,
        conn: &mut dyn Transport,
    ) -> Result<(), ClientError>;
}

/// Produces a negotiator for each in-flight message.
pub trait AuthenticatorFactory: Send + Sync {
    /// Builds a negotiator from per-message metadata.
    ///
    /// # Errors
    ///
    /// A refusal (e.g. no credentials mapped for this message) fails the
    /// delivery attempt before any transaction command is issued.
    fn create(&self, meta: &MessageMeta) -> Result<Box<dyn Authenticator>, String>;
}

/// SASL PLAIN with credentials fixed at configuration time.
pub struct StaticPlainAuth {
    initial: Vec<u8>,
}

impl StaticPlainAuth {
    /// # Errors
    ///
    /// PLAIN delimits its fields with NUL, so credentials containing NUL
    /// are rejected as a configuration error.
    pub fn new(username: &str, password: &str) -> Result<Self, ConfigError> {
        if username.contains('\0') || password.contains('\0') {
            return Err(ConfigError::InvalidAuthDirective(
                "PLAIN credentials must not contain NUL".to_string(),
            ));
        }

        let mut initial = Vec::with_capacity(username.len() + password.len() + 2);
        initial.push(0);
        initial.extend_from_slice(username.as_bytes());
        initial.push(0);
        initial.extend_from_slice(password.as_bytes());
        Ok(Self { initial })
    }
}

impl AuthenticatorFactory for StaticPlainAuth {
    fn create(&self, _meta: &MessageMeta) -> Result<Box<dyn Authenticator>, String> {
        Ok(Box::new(PlainNegotiator {
            initial: self.initial.clone(),
        }))
    }
}

struct PlainNegotiator {
    initial: Vec<u8>,
}

#[async_trait]
impl Authenticator for PlainNegotiator {
    async fn negotiate(
        &mut self,
        ctx: &CancellationToken,
        conn: &mut dyn Transport,
    ) -> Result<(), ClientError> {
        conn.authenticate(ctx, "PLAIN", &self.initial).await
    }
}

impl AuthConfig {
    /// Resolves the directive into a factory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthDirective`] for credentials the
    /// selected mechanism cannot encode.
    pub(crate) fn factory(
        &self,
    ) -> Result<std::sync::Arc<dyn AuthenticatorFactory>, ConfigError> {
        match self {
            Self::Plain { username, password } => Ok(std::sync::Arc::new(StaticPlainAuth::new(
                username, password,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_initial_response_layout() {
        let auth = StaticPlainAuth::new("user", "secret").unwrap();
        assert_eq!(auth.initial, b"\0user\0secret");
    }

    #[test]
    fn nul_in_credentials_rejected() {
        assert!(matches!(
            StaticPlainAuth::new("us\0er", "secret"),
            Err(ConfigError::InvalidAuthDirective(_))
        ));
        assert!(StaticPlainAuth::new("user", "se\0cret").is_err());
    }
}
