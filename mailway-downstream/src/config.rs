//! Configuration surface of the downstream target.

use std::fmt::{self, Display};

use mailway_smtp::{Timeouts, TlsSettings};
use serde::Deserialize;

use crate::error::ConfigError;

/// How to reach an endpoint, when the spec carries an explicit hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportHint {
    /// Plain TCP; STARTTLS may still upgrade it.
    #[default]
    Plain,
    /// TLS handshake before the first protocol byte (`tls://`).
    ImplicitTls,
}

/// One configured relay address. Order in the target's endpoint list is
/// try-order, not load-balance weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub hint: TransportHint,
}

impl Endpoint {
    pub const DEFAULT_PORT: u16 = 25;

    /// Parses an endpoint spec: `host`, `host:port`, `tcp://host:port`,
    /// `tls://host:port`. IPv6 literals must be bracketed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] for unknown schemes, bad
    /// ports, or an empty host.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidEndpoint {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (hint, rest) = if let Some(rest) = spec.strip_prefix("tls://") {
            (TransportHint::ImplicitTls, rest)
        } else if let Some(rest) = spec.strip_prefix("tcp://") {
            (TransportHint::Plain, rest)
        } else if spec.contains("://") {
            return Err(fail("unknown scheme"));
        } else {
            (TransportHint::Plain, spec)
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let Some((host, tail)) = bracketed.split_once(']') else {
                return Err(fail("unterminated '['"));
            };
            let port = match tail {
                "" => Self::DEFAULT_PORT,
                tail => tail
                    .strip_prefix(':')
                    .and_then(|port| port.parse().ok())
                    .ok_or_else(|| fail("bad port"))?,
            };
            (host, port)
        } else if let Some((host, port)) = rest.rsplit_once(':') {
            (host, port.parse().map_err(|_| fail("bad port"))?)
        } else {
            (rest, Self::DEFAULT_PORT)
        };

        if host.is_empty() {
            return Err(fail("empty host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            hint,
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(fmt, "[{}]:{}", self.host, self.port)
        } else {
            write!(fmt, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        Self::parse(spec)
    }
}

/// The `auth` directive: which credential negotiator to use.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mechanism", rename_all = "snake_case", deny_unknown_fields)]
pub enum AuthConfig {
    /// SASL PLAIN with fixed credentials.
    Plain { username: String, password: String },
}

/// Everything a downstream target accepts from its configuration tree.
///
/// `hostname` and the `tls_client` block are mandatory; the block may be
/// empty. `targets` is merged with any inline targets supplied to the
/// builder, inline entries first.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownstreamConfig {
    /// Verbose per-target logging.
    #[serde(default)]
    pub debug: bool,

    /// Discard connections that did not negotiate TLS.
    #[serde(default)]
    pub require_tls: bool,

    /// Upgrade opportunistically when the peer offers STARTTLS.
    #[serde(default = "default_attempt_starttls")]
    pub attempt_starttls: bool,

    /// Local identity announced to peers. Normalized to its A-label form
    /// at initialization (RFC 6531 section 3.7.1).
    pub hostname: String,

    /// Endpoint specs, in try-order.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Optional credential negotiator selection.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Client TLS settings. The block must be present, even if empty.
    pub tls_client: TlsSettings,

    /// Per-operation deadlines.
    #[serde(default)]
    pub timeouts: Timeouts,
}

const fn default_attempt_starttls() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port() {
        let endpoint = Endpoint::parse("mx.example.org").unwrap();
        assert_eq!(endpoint.host, "mx.example.org");
        assert_eq!(endpoint.port, 25);
        assert_eq!(endpoint.hint, TransportHint::Plain);
    }

    #[test]
    fn explicit_port_and_schemes() {
        assert_eq!(Endpoint::parse("mx:2525").unwrap().port, 2525);
        assert_eq!(
            Endpoint::parse("tcp://mx:587").unwrap().hint,
            TransportHint::Plain
        );

        let tls = Endpoint::parse("tls://mx.example.org:465").unwrap();
        assert_eq!(tls.hint, TransportHint::ImplicitTls);
        assert_eq!(tls.port, 465);
    }

    #[test]
    fn bracketed_ipv6() {
        let endpoint = Endpoint::parse("[2001:db8::25]:2525").unwrap();
        assert_eq!(endpoint.host, "2001:db8::25");
        assert_eq!(endpoint.port, 2525);
        assert_eq!(endpoint.to_string(), "[2001:db8::25]:2525");

        let no_port = Endpoint::parse("[::1]").unwrap();
        assert_eq!(no_port.port, 25);
    }

    #[test]
    fn malformed_specs_rejected() {
        assert!(Endpoint::parse("smtp://mx:25").is_err());
        assert!(Endpoint::parse("mx:notaport").is_err());
        assert!(Endpoint::parse(":25").is_err());
        assert!(Endpoint::parse("[::1:25").is_err());
    }

    #[test]
    fn full_config_deserializes() {
        let config: DownstreamConfig = toml::from_str(
            r#"
            debug = true
            require_tls = true
            hostname = "relay.example.org"
            targets = ["mx1.example.org", "tls://mx2.example.org:465"]

            [auth]
            mechanism = "plain"
            username = "forwarder"
            password = "hunter2"

            [tls_client]
            accept_invalid_certs = true

            [timeouts]
            connect_secs = 5
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert!(config.require_tls);
        assert!(config.attempt_starttls, "attempt_starttls defaults on");
        assert_eq!(config.targets.len(), 2);
        assert!(matches!(config.auth, Some(AuthConfig::Plain { .. })));
        assert!(config.tls_client.accept_invalid_certs);
        assert_eq!(config.timeouts.connect_secs, 5);
        assert_eq!(config.timeouts.data_secs, 120);
    }

    #[test]
    fn minimal_config_defaults() {
        let config: DownstreamConfig = toml::from_str(
            r#"
            hostname = "relay.example.org"
            [tls_client]
            "#,
        )
        .unwrap();

        assert!(!config.debug);
        assert!(!config.require_tls);
        assert!(config.attempt_starttls);
        assert!(config.auth.is_none());
        assert!(config.targets.is_empty());
    }

    #[test]
    fn tls_client_block_is_mandatory() {
        let result: Result<DownstreamConfig, _> =
            toml::from_str(r#"hostname = "relay.example.org""#);
        assert!(result.is_err());
    }

    #[test]
    fn hostname_is_mandatory() {
        let result: Result<DownstreamConfig, _> = toml::from_str("[tls_client]");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<DownstreamConfig, _> = toml::from_str(
            r#"
            hostname = "relay.example.org"
            starttls = true
            [tls_client]
            "#,
        );
        assert!(result.is_err());
    }
}
