//! The downstream target itself: builder, initialization, and the entry
//! point that opens a delivery session per message.

use std::sync::Arc;

use mailway_smtp::{SenderOptions, Timeouts, TlsSettings};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AuthenticatorFactory,
    config::{DownstreamConfig, Endpoint},
    error::{ConfigError, TargetError},
    session::{self, Delivery},
    transport::{Connect, SmtpConnector},
};

/// Metadata of one in-flight message.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    /// Queue identifier, used for log attribution.
    pub id: Arc<str>,
    /// Transaction options negotiated upstream (size, UTF-8, 8-bit).
    pub options: SenderOptions,
}

/// Immutable target state shared by every delivery session.
pub(crate) struct Shared {
    pub(crate) instance: Arc<str>,
    pub(crate) hostname: String,
    pub(crate) debug: bool,
    pub(crate) require_tls: bool,
    pub(crate) attempt_starttls: bool,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) tls: TlsSettings,
    pub(crate) timeouts: Timeouts,
    pub(crate) auth: Option<Arc<dyn AuthenticatorFactory>>,
    pub(crate) connector: Arc<dyn Connect>,
}

/// A fixed set of relay endpoints that messages are handed to verbatim,
/// with failover across the set and optional authentication.
pub struct Downstream {
    shared: Arc<Shared>,
}

impl Downstream {
    /// Starts configuring a target named `instance`.
    #[must_use]
    pub fn builder(instance: impl Into<Arc<str>>) -> DownstreamBuilder {
        DownstreamBuilder {
            instance: instance.into(),
            inline_targets: Vec::new(),
            connector: None,
            auth: None,
        }
    }

    /// The instance name this target was created with.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.shared.instance
    }

    /// The A-label form of the configured hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    /// The resolved endpoint list, in try-order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.shared.endpoints
    }

    /// Opens a delivery session for one message.
    ///
    /// Connection establishment, authentication, and the sender
    /// declaration all happen here; on any failure the connection is
    /// released before the error is returned, so no session value escapes
    /// half-open.
    ///
    /// # Errors
    ///
    /// See [`crate::ErrorKind`] for the failure taxonomy. Connect errors
    /// carry the last endpoint's failure after the whole list was tried.
    pub async fn start(
        &self,
        ctx: &CancellationToken,
        meta: &MessageMeta,
        mail_from: &str,
    ) -> Result<Delivery, TargetError> {
        session::begin(Arc::clone(&self.shared), ctx, meta.clone(), mail_from).await
    }
}

/// Configures and initializes a [`Downstream`].
pub struct DownstreamBuilder {
    instance: Arc<str>,
    inline_targets: Vec<String>,
    connector: Option<Arc<dyn Connect>>,
    auth: Option<Arc<dyn AuthenticatorFactory>>,
}

impl DownstreamBuilder {
    /// Adds one inline endpoint spec. Inline endpoints are tried before
    /// any from the configuration.
    #[must_use]
    pub fn target(mut self, spec: impl Into<String>) -> Self {
        self.inline_targets.push(spec.into());
        self
    }

    /// Adds several inline endpoint specs.
    #[must_use]
    pub fn targets<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inline_targets.extend(specs.into_iter().map(Into::into));
        self
    }

    /// Replaces the connection layer. Intended for tests.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connect>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Installs an authenticator factory, overriding any `auth` directive
    /// in the configuration.
    #[must_use]
    pub fn authenticator(mut self, factory: Arc<dyn AuthenticatorFactory>) -> Self {
        self.auth = Some(factory);
        self
    }

    /// Validates the configuration and produces a ready target.
    ///
    /// # Errors
    ///
    /// Fails when the hostname has no A-label form, an endpoint spec does
    /// not parse, the merged endpoint list is empty, or the auth directive
    /// is malformed.
    pub fn init(self, config: DownstreamConfig) -> Result<Downstream, ConfigError> {
        let hostname = idna::domain_to_ascii(&config.hostname).map_err(|err| {
            ConfigError::HostnameNotRepresentable {
                hostname: config.hostname.clone(),
                reason: err.to_string(),
            }
        })?;

        let endpoints = self
            .inline_targets
            .iter()
            .chain(&config.targets)
            .map(|spec| Endpoint::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let auth = match (self.auth, &config.auth) {
            (Some(factory), _) => Some(factory),
            (None, Some(directive)) => Some(directive.factory()?),
            (None, None) => None,
        };

        Ok(Downstream {
            shared: Arc::new(Shared {
                instance: self.instance,
                hostname,
                debug: config.debug,
                require_tls: config.require_tls,
                attempt_starttls: config.attempt_starttls,
                endpoints,
                tls: config.tls_client,
                timeouts: config.timeouts,
                auth,
                connector: self
                    .connector
                    .unwrap_or_else(|| Arc::new(SmtpConnector)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> DownstreamConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn hostname_normalizes_to_a_label() {
        let target = Downstream::builder("relay")
            .target("mx.example.org")
            .init(config(
                r#"
                hostname = "bücher.example"
                [tls_client]
                "#,
            ))
            .unwrap();
        assert_eq!(target.hostname(), "xn--bcher-kva.example");
        assert_eq!(target.instance(), "relay");
    }

    #[test]
    fn unrepresentable_hostname_is_fatal() {
        let result = Downstream::builder("relay")
            .target("mx.example.org")
            .init(config(
                r#"
                hostname = "exa mple.com"
                [tls_client]
                "#,
            ));
        assert!(matches!(
            result,
            Err(ConfigError::HostnameNotRepresentable { .. })
        ));
    }

    #[test]
    fn zero_endpoints_is_fatal() {
        let result = Downstream::builder("relay").init(config(
            r#"
            hostname = "relay.example.org"
            [tls_client]
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::NoEndpoints)));
    }

    #[test]
    fn inline_targets_precede_config_targets() {
        let target = Downstream::builder("relay")
            .target("inline1.example.org")
            .target("inline2.example.org:2525")
            .init(config(
                r#"
                hostname = "relay.example.org"
                targets = ["config.example.org"]
                [tls_client]
                "#,
            ))
            .unwrap();

        let hosts: Vec<_> = target
            .endpoints()
            .iter()
            .map(|endpoint| endpoint.host.as_str())
            .collect();
        assert_eq!(
            hosts,
            ["inline1.example.org", "inline2.example.org", "config.example.org"]
        );
        assert_eq!(target.endpoints()[1].port, 2525);
    }

    #[test]
    fn bad_inline_spec_is_fatal() {
        let result = Downstream::builder("relay")
            .target("smtp://mx.example.org")
            .init(config(
                r#"
                hostname = "relay.example.org"
                [tls_client]
                "#,
            ));
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint { .. })));
    }
}
