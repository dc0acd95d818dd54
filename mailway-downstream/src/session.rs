//! The per-message delivery session.
//!
//! A [`Delivery`] moves through a fixed command order: sender (declared
//! at open), recipients, body, then commit or abort. Both terminal
//! operations consume the session, and each guarantees the connection
//! and any open body stream are released exactly once regardless of
//! outcome.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ErrorKind, TargetError},
    message::{BodySource, BodyStream, Header},
    target::{MessageMeta, Shared},
    transport::{ConnectParams, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Sender declared; recipients may be added.
    Sending,
    /// Body stored; only commit or abort remain.
    BodyReceived,
}

/// One in-flight delivery over one connection.
pub struct Delivery {
    shared: Arc<Shared>,
    meta: MessageMeta,
    conn: Option<Box<dyn Transport>>,
    body: Option<(Header, BodyStream)>,
    state: State,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("meta", &self.meta)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Opens a session: connect with failover, authenticate when configured,
/// declare the sender. Failure at any step releases the connection.
pub(crate) async fn begin(
    shared: Arc<Shared>,
    ctx: &CancellationToken,
    meta: MessageMeta,
    mail_from: &str,
) -> Result<Delivery, TargetError> {
    let mut conn = establish(&shared, ctx, &meta.id).await?;

    if let Some(factory) = &shared.auth {
        let mut negotiator = match factory.create(&meta) {
            Ok(negotiator) => negotiator,
            Err(reason) => {
                conn.close(ctx).await;
                return Err(tag(&shared.instance, ErrorKind::AuthSetup(reason)));
            }
        };
        // Negotiation failure is not a connectivity problem, so it does
        // not trigger endpoint failover.
        if let Err(err) = negotiator.negotiate(ctx, conn.as_mut()).await {
            conn.close(ctx).await;
            return Err(tag(&shared.instance, ErrorKind::wrap(err, ErrorKind::Auth)));
        }
    }

    if let Err(err) = conn.declare_sender(ctx, mail_from, &meta.options).await {
        conn.close(ctx).await;
        return Err(tag(
            &shared.instance,
            ErrorKind::wrap(err, ErrorKind::Sender),
        ));
    }

    Ok(Delivery {
        shared,
        meta,
        conn: Some(conn),
        body: None,
        state: State::Sending,
    })
}

/// Tries each endpoint in order and returns the first live connection.
/// When `require_tls` is set, a connection without negotiated TLS is
/// closed and counted as that endpoint's failure.
async fn establish(
    shared: &Shared,
    ctx: &CancellationToken,
    msg_id: &str,
) -> Result<Box<dyn Transport>, TargetError> {
    let params = ConnectParams {
        local_hostname: shared.hostname.clone(),
        attempt_starttls: shared.attempt_starttls,
        tls: shared.tls.clone(),
        timeouts: shared.timeouts,
    };

    let mut last = None;
    for endpoint in &shared.endpoints {
        match shared.connector.connect(ctx, endpoint, &params).await {
            Ok(mut conn) => {
                if shared.require_tls && !conn.is_tls() {
                    conn.close(ctx).await;
                    last = Some(ErrorKind::TlsRequired);
                    continue;
                }
                if shared.debug {
                    info!(
                        instance = %shared.instance,
                        server = conn.server_identity(),
                        tls = conn.is_tls(),
                        message = msg_id,
                        "connected"
                    );
                } else {
                    debug!(
                        instance = %shared.instance,
                        server = conn.server_identity(),
                        tls = conn.is_tls(),
                        message = msg_id,
                        "connected"
                    );
                }
                return Ok(conn);
            }
            Err(err) => {
                let kind = ErrorKind::wrap(err, ErrorKind::Connect);
                if matches!(kind, ErrorKind::Cancelled) {
                    return Err(tag(&shared.instance, kind));
                }
                // With a single endpoint the caller sees this exact error
                // anyway; logging it too would just duplicate it.
                if shared.endpoints.len() != 1 {
                    warn!(
                        instance = %shared.instance,
                        server = %endpoint,
                        error = %kind,
                        "endpoint failed, trying next"
                    );
                }
                last = Some(kind);
            }
        }
    }

    // Initialization guarantees a non-empty endpoint list, so the loop
    // always recorded at least one failure.
    let kind = last.unwrap_or(ErrorKind::InvalidState("no endpoints configured"));
    Err(tag(&shared.instance, kind))
}

impl Delivery {
    /// Declares one recipient. A rejection is surfaced per-call and
    /// leaves the session usable for further recipients.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Recipient`] on rejection, [`ErrorKind::InvalidState`]
    /// once a body has been set.
    pub async fn add_recipient(
        &mut self,
        ctx: &CancellationToken,
        recipient: &str,
    ) -> Result<(), TargetError> {
        if self.state != State::Sending {
            return Err(self.tagged(ErrorKind::InvalidState(
                "recipients cannot be added after the body",
            )));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.tagged(ErrorKind::InvalidState("connection already released")));
        };
        conn.declare_recipient(ctx, recipient)
            .await
            .map_err(|err| {
                tag(
                    &self.shared.instance,
                    ErrorKind::wrap(err, ErrorKind::Recipient),
                )
            })
    }

    /// Opens the body source and stores header and stream for commit.
    /// Nothing goes on the wire until [`Self::commit`].
    ///
    /// # Errors
    ///
    /// [`ErrorKind::BodyOpen`] when the source cannot be opened,
    /// [`ErrorKind::InvalidState`] when a body was already set.
    pub fn set_body(&mut self, header: Header, source: &dyn BodySource) -> Result<(), TargetError> {
        if self.state == State::BodyReceived {
            return Err(self.tagged(ErrorKind::InvalidState("body already set")));
        }
        let stream = source
            .open()
            .map_err(|err| tag(&self.shared.instance, ErrorKind::BodyOpen(err)))?;
        self.body = Some((header, stream));
        self.state = State::BodyReceived;
        Ok(())
    }

    /// Transmits the stored message and releases the connection. The
    /// connection and body stream are released whether or not
    /// transmission succeeds.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Transmit`] on any failure at or after the data
    /// command, [`ErrorKind::InvalidState`] when no body was set.
    pub async fn commit(mut self, ctx: &CancellationToken) -> Result<(), TargetError> {
        let Some((header, stream)) = self.body.take() else {
            if let Some(mut conn) = self.conn.take() {
                conn.close(ctx).await;
            }
            return Err(self.tagged(ErrorKind::InvalidState("commit before a body was set")));
        };
        let Some(mut conn) = self.conn.take() else {
            return Err(self.tagged(ErrorKind::InvalidState("connection already released")));
        };

        let result = conn.transmit_body(ctx, &header, stream).await;
        conn.close(ctx).await;
        result.map_err(|err| {
            tag(
                &self.shared.instance,
                ErrorKind::wrap(err, ErrorKind::Transmit),
            )
        })
    }

    /// Abandons the delivery, releasing the body stream first and the
    /// connection second. Always succeeds.
    pub async fn abort(mut self, ctx: &CancellationToken) {
        drop(self.body.take());
        if let Some(mut conn) = self.conn.take() {
            conn.close(ctx).await;
        }
    }

    fn tagged(&self, kind: ErrorKind) -> TargetError {
        tag(&self.shared.instance, kind)
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        // Dropping the boxed transport closes the socket, but skipping the
        // polite close path is worth noticing.
        if self.conn.is_some() {
            warn!(
                instance = %self.shared.instance,
                message = %self.meta.id,
                "delivery dropped without commit or abort"
            );
        }
    }
}

fn tag(instance: &Arc<str>, kind: ErrorKind) -> TargetError {
    TargetError::new(Arc::clone(instance), kind)
}
