//! The seam between the delivery core and the wire engine.
//!
//! [`Connect`] produces one live connection per call; [`Transport`] is
//! the transaction surface of that connection. The default
//! [`SmtpConnector`] bridges to [`mailway_smtp::Connection`]; tests
//! substitute scripted implementations.

use async_trait::async_trait;
use mailway_smtp::{
    ClientError, ConnectOptions, Connection, Security, SenderOptions, Timeouts, TlsSettings,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Endpoint, TransportHint},
    message::{BodyStream, Header},
};

/// Connection parameters shared by every attempt for one target.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Local identity announced to the peer.
    pub local_hostname: String,
    /// Upgrade via STARTTLS when offered on plain endpoints.
    pub attempt_starttls: bool,
    /// Client TLS settings.
    pub tls: TlsSettings,
    /// Per-operation deadlines.
    pub timeouts: Timeouts,
}

/// One live mail connection, scoped to a single transaction.
#[async_trait]
pub trait Transport: Send {
    /// The peer's identity, for log attribution.
    fn server_identity(&self) -> &str;

    /// Whether transport security was negotiated.
    fn is_tls(&self) -> bool;

    /// Runs one authentication exchange with an initial response.
    async fn authenticate(
        &mut self,
        ctx: &CancellationToken,
        mechanism: &str,
        initial: &[u8],
    ) -> Result<(), ClientError>;

    /// Declares the envelope sender with its transaction options.
    async fn declare_sender(
        &mut self,
        ctx: &CancellationToken,
        from: &str,
        options: &SenderOptions,
    ) -> Result<(), ClientError>;

    /// Declares one recipient; rejection leaves the connection usable.
    async fn declare_recipient(
        &mut self,
        ctx: &CancellationToken,
        recipient: &str,
    ) -> Result<(), ClientError>;

    /// Transmits header and body as the transaction's final step. The
    /// stream is consumed (and thereby released) even on failure.
    async fn transmit_body(
        &mut self,
        ctx: &CancellationToken,
        header: &Header,
        body: BodyStream,
    ) -> Result<(), ClientError>;

    /// Releases the connection. Infallible by design: there is no
    /// meaningful recovery from a failed close.
    async fn close(&mut self, ctx: &CancellationToken);
}

/// Opens connections honoring the endpoint's transport hint.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Dials `endpoint` and returns a ready connection.
    ///
    /// # Errors
    ///
    /// Dial, handshake, greeting, and EHLO failures all surface here; the
    /// establisher treats them as per-endpoint failures.
    async fn connect(
        &self,
        ctx: &CancellationToken,
        endpoint: &Endpoint,
        params: &ConnectParams,
    ) -> Result<Box<dyn Transport>, ClientError>;
}

/// The production connector: real SMTP sessions over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpConnector;

#[async_trait]
impl Connect for SmtpConnector {
    async fn connect(
        &self,
        ctx: &CancellationToken,
        endpoint: &Endpoint,
        params: &ConnectParams,
    ) -> Result<Box<dyn Transport>, ClientError> {
        let security = match endpoint.hint {
            TransportHint::ImplicitTls => Security::ImplicitTls,
            TransportHint::Plain if params.attempt_starttls => Security::Starttls,
            TransportHint::Plain => Security::Plain,
        };
        let options = ConnectOptions {
            local_hostname: params.local_hostname.clone(),
            security,
            tls: params.tls.clone(),
            timeouts: params.timeouts,
        };

        let conn = Connection::open(ctx, &endpoint.host, endpoint.port, &options).await?;
        Ok(Box::new(SmtpTransport(conn)))
    }
}

struct SmtpTransport(Connection);

#[async_trait]
impl Transport for SmtpTransport {
    fn server_identity(&self) -> &str {
        self.0.server_identity()
    }

    fn is_tls(&self) -> bool {
        self.0.is_tls()
    }

    async fn authenticate(
        &mut self,
        ctx: &CancellationToken,
        mechanism: &str,
        initial: &[u8],
    ) -> Result<(), ClientError> {
        self.0.auth(ctx, mechanism, initial).await
    }

    async fn declare_sender(
        &mut self,
        ctx: &CancellationToken,
        from: &str,
        options: &SenderOptions,
    ) -> Result<(), ClientError> {
        self.0.mail_from(ctx, from, options).await
    }

    async fn declare_recipient(
        &mut self,
        ctx: &CancellationToken,
        recipient: &str,
    ) -> Result<(), ClientError> {
        self.0.rcpt_to(ctx, recipient).await
    }

    async fn transmit_body(
        &mut self,
        ctx: &CancellationToken,
        header: &Header,
        body: BodyStream,
    ) -> Result<(), ClientError> {
        self.0.data(ctx, header.as_bytes(), body).await.map(|_| ())
    }

    async fn close(&mut self, ctx: &CancellationToken) {
        self.0.quit(ctx).await;
    }
}
