//! Delivery target that forwards messages verbatim to a fixed set of
//! relay endpoints.
//!
//! A [`Downstream`] holds an ordered endpoint list. Each message opens
//! its own session via [`Downstream::start`]: endpoints are tried in
//! order until one yields a usable connection (TLS-policy violations
//! count as failures), credentials are negotiated when configured, and
//! the envelope is declared recipient by recipient before the body is
//! committed. Terminal operations consume the session, so a delivery
//! cannot be resumed after commit or abort.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mailway_downstream::{Downstream, Header, MemoryBody, MessageMeta};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(config: mailway_downstream::DownstreamConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let target = Downstream::builder("relay")
//!     .target("mx.example.org:2525")
//!     .init(config)?;
//!
//! let ctx = CancellationToken::new();
//! let meta = MessageMeta {
//!     id: Arc::from("a1b2c3"),
//!     options: Default::default(),
//! };
//!
//! let mut delivery = target.start(&ctx, &meta, "sender@example.org").await?;
//! delivery.add_recipient(&ctx, "rcpt@example.com").await?;
//! delivery.set_body(
//!     Header::new().field("Subject", "hello"),
//!     &MemoryBody::from("Hi!\r\n"),
//! )?;
//! delivery.commit(&ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod target;
pub mod transport;

pub use auth::{Authenticator, AuthenticatorFactory, StaticPlainAuth};
pub use config::{AuthConfig, DownstreamConfig, Endpoint, TransportHint};
pub use error::{ConfigError, ErrorKind, TargetError};
pub use message::{BodySource, BodyStream, Header, MemoryBody};
pub use session::Delivery;
pub use target::{Downstream, DownstreamBuilder, MessageMeta};
pub use transport::{Connect, ConnectParams, SmtpConnector, Transport};

pub use mailway_smtp::{ClientError, SenderOptions, Timeouts, TlsSettings};
