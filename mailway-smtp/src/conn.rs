//! One SMTP session: dial, negotiate, run envelope commands.

use std::fmt::Write as _;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::{ClientStream, TlsSettings},
    error::{ClientError, Result},
    extensions::Extensions,
    reply::Reply,
    timeouts::Timeouts,
};

/// Initial reply buffer size.
const BUFFER_SIZE: usize = 4096;

/// Upper bound on a single reply, to keep a malicious peer from growing
/// the buffer without limit.
const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// How transport security is established for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plain TCP, no upgrade attempted.
    Plain,
    /// Plain TCP, upgraded via STARTTLS when the peer advertises it.
    /// A refused STARTTLS leaves the session usable in plaintext.
    Starttls,
    /// TLS handshake before the first protocol byte.
    ImplicitTls,
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Local identity announced in EHLO/HELO.
    pub local_hostname: String,
    /// Transport security mode.
    pub security: Security,
    /// Client TLS settings.
    pub tls: TlsSettings,
    /// Per-operation deadlines.
    pub timeouts: Timeouts,
}

/// ESMTP parameters attached to MAIL FROM.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderOptions {
    /// Declared message size (SIZE parameter, RFC 1870).
    pub size: Option<usize>,
    /// The envelope carries UTF-8 addresses (SMTPUTF8, RFC 6531).
    pub smtputf8: bool,
    /// The body is 8-bit MIME (BODY=8BITMIME, RFC 6152).
    pub body_8bit: bool,
}

/// A connected SMTP session.
///
/// Created by [`Connection::open`], which leaves the session past the
/// greeting, EHLO, and any transport-security negotiation, ready for
/// envelope commands. Dropping the value closes the socket.
pub struct Connection {
    stream: Option<ClientStream>,
    buf: Vec<u8>,
    filled: usize,
    tls: bool,
    server: String,
    extensions: Extensions,
    local_hostname: String,
    timeouts: Timeouts,
}

impl Connection {
    /// Dials `host:port` and brings the session up to the ready state.
    ///
    /// # Errors
    ///
    /// Fails on dial/handshake errors, a non-220 greeting, or a rejected
    /// EHLO and HELO. With [`Security::Starttls`], a refused STARTTLS
    /// command is not an error; a failed TLS handshake is.
    pub async fn open(
        ctx: &CancellationToken,
        host: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let dial = options.timeouts.connect();

        let stream = guarded(ctx, dial, async { Ok(TcpStream::connect(&addr).await?) }).await?;
        let stream = match options.security {
            Security::ImplicitTls => {
                guarded(
                    ctx,
                    dial,
                    ClientStream::Plain(stream).handshake(host, &options.tls),
                )
                .await?
            }
            Security::Plain | Security::Starttls => ClientStream::Plain(stream),
        };

        let mut conn = Self {
            tls: stream.is_tls(),
            stream: Some(stream),
            buf: vec![0; BUFFER_SIZE],
            filled: 0,
            server: host.to_string(),
            extensions: Extensions::default(),
            local_hostname: options.local_hostname.clone(),
            timeouts: options.timeouts,
        };

        let command = conn.timeouts.command();
        let greeting = guarded(ctx, command, conn.read_reply()).await?;
        if !greeting.is_positive() {
            return Err(rejected(&greeting));
        }

        conn.hello(ctx).await?;

        if options.security == Security::Starttls && !conn.tls && conn.extensions.starttls {
            conn.start_tls(ctx, &options.tls).await?;
        }

        Ok(conn)
    }

    /// Whether the session negotiated transport security.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// The peer this session is connected to, as dialed.
    #[must_use]
    pub fn server_identity(&self) -> &str {
        &self.server
    }

    /// Capabilities from the most recent EHLO.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Sends MAIL FROM with the applicable ESMTP parameters.
    ///
    /// SIZE is attached only when the peer advertises the extension;
    /// SMTPUTF8 and BODY=8BITMIME are hard requirements of the message, so
    /// a peer without them fails the call instead of silently downgrading.
    ///
    /// # Errors
    ///
    /// [`ClientError::Unsupported`] for a missing required extension,
    /// [`ClientError::Rejected`] when the peer declines the sender.
    pub async fn mail_from(
        &mut self,
        ctx: &CancellationToken,
        from: &str,
        options: &SenderOptions,
    ) -> Result<()> {
        let mut command = format!("MAIL FROM:<{from}>");
        if let Some(size) = options.size
            && self.extensions.size.is_some()
        {
            let _ = write!(command, " SIZE={size}");
        }
        if options.body_8bit {
            if !self.extensions.eight_bit_mime {
                return Err(ClientError::Unsupported("8BITMIME"));
            }
            command.push_str(" BODY=8BITMIME");
        }
        if options.smtputf8 {
            if !self.extensions.smtputf8 {
                return Err(ClientError::Unsupported("SMTPUTF8"));
            }
            command.push_str(" SMTPUTF8");
        }

        let reply = self.exchange(ctx, &command).await?;
        if reply.is_positive() { Ok(()) } else { Err(rejected(&reply)) }
    }

    /// Sends RCPT TO for one recipient.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] when the peer declines this recipient;
    /// the session remains usable for further recipients.
    pub async fn rcpt_to(&mut self, ctx: &CancellationToken, recipient: &str) -> Result<()> {
        let command = format!("RCPT TO:<{recipient}>");
        let reply = self.exchange(ctx, &command).await?;
        if reply.is_positive() { Ok(()) } else { Err(rejected(&reply)) }
    }

    /// Authenticates with a single AUTH command and an initial response.
    ///
    /// Mechanisms needing extra challenge rounds are not supported; a 334
    /// continuation is reported as a rejection.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] unless the peer answers 235.
    pub async fn auth(
        &mut self,
        ctx: &CancellationToken,
        mechanism: &str,
        initial: &[u8],
    ) -> Result<()> {
        let command = if initial.is_empty() {
            format!("AUTH {mechanism}")
        } else {
            format!("AUTH {mechanism} {}", BASE64.encode(initial))
        };
        let reply = self.exchange(ctx, &command).await?;
        if reply.is_positive() { Ok(()) } else { Err(rejected(&reply)) }
    }

    /// Transmits the message: DATA, header section, body, terminating dot.
    ///
    /// The header block is sent as-is (CRLF-terminated lines), followed by
    /// the separating blank line, then the body with dot-stuffing applied.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] when DATA is not answered with 354 or the
    /// final reply is not 2xx; IO errors from reading `body` surface as
    /// [`ClientError::Io`]. A non-rejection failure mid-transmission also
    /// drops the connection.
    pub async fn data<R>(&mut self, ctx: &CancellationToken, header: &[u8], body: R) -> Result<Reply>
    where
        R: AsyncRead + Unpin + Send,
    {
        let reply = self.exchange(ctx, "DATA").await?;
        if !reply.is_intermediate() {
            return Err(rejected(&reply));
        }

        let limit = self.timeouts.data();
        match guarded(ctx, limit, self.transmit(header, body)).await {
            Ok(reply) => Ok(reply),
            // A rejection arrives after the terminating dot, so the session
            // is still in command state and QUIT remains meaningful. Any
            // other failure leaves the peer waiting inside DATA, where QUIT
            // would be read as message content; drop the socket instead.
            Err(err @ ClientError::Rejected { .. }) => Err(err),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    /// Closes the session politely: QUIT (best effort), then drop the
    /// socket. Never fails; a peer that ignores QUIT is simply dropped.
    pub async fn quit(&mut self, ctx: &CancellationToken) {
        if self.stream.is_some() {
            let limit = self.timeouts.quit();
            let _ = guarded(ctx, limit, async {
                self.send_line("QUIT").await?;
                self.read_reply().await
            })
            .await;
        }
        self.close();
    }

    /// Drops the socket without ceremony.
    pub fn close(&mut self) {
        self.stream = None;
        self.filled = 0;
    }

    /// EHLO with a HELO fallback for peers predating extensions.
    async fn hello(&mut self, ctx: &CancellationToken) -> Result<()> {
        let ehlo = format!("EHLO {}", self.local_hostname);
        let reply = self.exchange(ctx, &ehlo).await?;
        if reply.is_positive() {
            self.extensions = Extensions::from_ehlo(&reply);
            return Ok(());
        }

        let helo = format!("HELO {}", self.local_hostname);
        let reply = self.exchange(ctx, &helo).await?;
        if reply.is_positive() {
            self.extensions = Extensions::default();
            Ok(())
        } else {
            Err(rejected(&reply))
        }
    }

    async fn start_tls(&mut self, ctx: &CancellationToken, tls: &TlsSettings) -> Result<()> {
        let reply = self.exchange(ctx, "STARTTLS").await?;
        if !reply.is_positive() {
            tracing::debug!(server = %self.server, code = reply.code, "peer refused STARTTLS");
            return Ok(());
        }

        let stream = self.stream.take().ok_or(ClientError::ConnectionClosed)?;
        let limit = self.timeouts.connect();
        let server = self.server.clone();
        let upgraded = guarded(ctx, limit, stream.handshake(&server, tls)).await?;
        self.stream = Some(upgraded);
        // Anything buffered from before the handshake is untrusted.
        self.filled = 0;
        self.tls = true;

        // RFC 3207: the session state resets after the handshake.
        self.hello(ctx).await
    }

    async fn exchange(&mut self, ctx: &CancellationToken, command: &str) -> Result<Reply> {
        let limit = self.timeouts.command();
        guarded(ctx, limit, async {
            self.send_line(command).await?;
            self.read_reply().await
        })
        .await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buf[..self.filled])? {
                self.buf.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                return Ok(reply);
            }

            if self.filled == self.buf.len() {
                let grown = self.buf.len() * 2;
                if grown > MAX_REPLY_SIZE {
                    return Err(ClientError::Parse(format!(
                        "reply exceeds {MAX_REPLY_SIZE} bytes"
                    )));
                }
                self.buf.resize(grown, 0);
            }

            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
            let n = stream.read(&mut self.buf[self.filled..]).await?;
            self.filled += n;
        }
    }

    async fn transmit<R>(&mut self, header: &[u8], mut body: R) -> Result<Reply>
    where
        R: AsyncRead + Unpin + Send,
    {
        {
            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;

            let mut out = Vec::with_capacity(header.len() + 16);
            let mut at_line_start = true;
            stuff(header, &mut at_line_start, &mut out);
            if !at_line_start {
                out.extend_from_slice(b"\r\n");
                at_line_start = true;
            }
            // Blank line separating header section from body.
            out.extend_from_slice(b"\r\n");
            stream.write_all(&out).await?;

            let mut chunk = [0u8; 8192];
            loop {
                let n = body.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                out.clear();
                stuff(&chunk[..n], &mut at_line_start, &mut out);
                stream.write_all(&out).await?;
            }

            if !at_line_start {
                stream.write_all(b"\r\n").await?;
            }
            stream.write_all(b".\r\n").await?;
            stream.flush().await?;
        }

        let reply = self.read_reply().await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(rejected(&reply))
        }
    }
}

/// Doubles a leading dot on every line (RFC 5321 section 4.5.2).
fn stuff(input: &[u8], at_line_start: &mut bool, out: &mut Vec<u8>) {
    for &byte in input {
        if *at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        *at_line_start = byte == b'\n';
    }
}

fn rejected(reply: &Reply) -> ClientError {
    ClientError::Rejected {
        code: reply.code,
        message: reply.text(),
    }
}

/// Runs `op` under both the cancellation token and a deadline.
pub(crate) async fn guarded<T, F>(ctx: &CancellationToken, limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        () = ctx.cancelled() => Err(ClientError::Cancelled),
        outcome = tokio::time::timeout(limit, op) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(limit)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stuffed(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut at_line_start = true;
        stuff(input, &mut at_line_start, &mut out);
        out
    }

    #[test]
    fn leading_dots_doubled() {
        assert_eq!(stuffed(b".\r\n"), b"..\r\n");
        assert_eq!(stuffed(b"a\r\n.b\r\n"), b"a\r\n..b\r\n");
    }

    #[test]
    fn interior_dots_untouched() {
        assert_eq!(stuffed(b"a.b\r\nc\r\n"), b"a.b\r\nc\r\n");
    }

    #[test]
    fn state_carries_across_chunks() {
        let mut out = Vec::new();
        let mut at_line_start = true;
        stuff(b"line\r\n", &mut at_line_start, &mut out);
        stuff(b".dot", &mut at_line_start, &mut out);
        assert_eq!(out, b"line\r\n..dot");
        assert!(!at_line_start);
    }

    #[tokio::test]
    async fn guarded_honors_cancellation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let outcome: Result<()> =
            guarded(&ctx, Duration::from_secs(5), std::future::pending()).await;
        assert!(matches!(outcome, Err(ClientError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_honors_deadline() {
        let ctx = CancellationToken::new();
        let outcome: Result<()> =
            guarded(&ctx, Duration::from_millis(50), std::future::pending()).await;
        assert!(matches!(outcome, Err(ClientError::Timeout(_))));
    }
}
