//! Message material handed to a delivery: header block and body source.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};

/// A readable, one-shot body stream.
pub type BodyStream = Pin<Box<dyn AsyncRead + Send>>;

/// Where a message body comes from.
///
/// A source can be opened any number of times; each call yields an
/// independent stream. The delivery session opens it exactly once per
/// transaction and owns the resulting stream until commit or abort.
pub trait BodySource: Send + Sync {
    /// Opens the source into a fresh stream.
    ///
    /// # Errors
    ///
    /// Propagates the underlying IO error; the caller reports it without
    /// transmitting anything.
    fn open(&self) -> io::Result<BodyStream>;
}

/// An in-memory body.
#[derive(Debug, Clone)]
pub struct MemoryBody {
    data: Arc<[u8]>,
}

impl MemoryBody {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl From<&str> for MemoryBody {
    fn from(data: &str) -> Self {
        Self::new(data.as_bytes().to_vec())
    }
}

impl BodySource for MemoryBody {
    fn open(&self) -> io::Result<BodyStream> {
        Ok(Box::pin(MemoryStream {
            data: Arc::clone(&self.data),
            pos: 0,
        }))
    }
}

struct MemoryStream {
    data: Arc<[u8]>,
    pos: usize,
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let stream = self.get_mut();
        let remaining = &stream.data[stream.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        stream.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// A pre-serialized message header section.
///
/// Stored as raw CRLF-terminated field lines, without the blank line that
/// separates headers from the body; the wire layer adds that.
#[derive(Debug, Clone, Default)]
pub struct Header {
    raw: Vec<u8>,
}

impl Header {
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: Vec::new() }
    }

    /// Wraps an already-serialized header section.
    #[must_use]
    pub const fn from_bytes(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// Appends one header field.
    #[must_use]
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.raw.extend_from_slice(name.as_bytes());
        self.raw.extend_from_slice(b": ");
        self.raw.extend_from_slice(value.as_bytes());
        self.raw.extend_from_slice(b"\r\n");
        self
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
