//! Client-side SMTP connection engine.
//!
//! This crate drives the wire protocol for outbound mail: dialing an
//! endpoint, negotiating transport security (implicit TLS or STARTTLS),
//! the EHLO handshake, and the envelope commands (MAIL FROM, RCPT TO,
//! DATA, AUTH, QUIT). Policy decisions such as which endpoint to dial and
//! whether TLS is mandatory belong to the caller.
//!
//! Every suspending operation takes a [`CancellationToken`] and is bounded
//! by a per-operation deadline from [`Timeouts`], so a hung peer can never
//! wedge a delivery task.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod conn;
mod connection;
mod error;
mod extensions;
mod reply;
mod timeouts;

pub use conn::{ConnectOptions, Connection, Security, SenderOptions};
pub use connection::TlsSettings;
pub use error::{ClientError, Result};
pub use extensions::Extensions;
pub use reply::Reply;
pub use timeouts::Timeouts;
