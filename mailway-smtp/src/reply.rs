//! SMTP reply parsing.

use crate::error::{ClientError, Result};

/// A complete SMTP reply, possibly spanning several continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit status code shared by every line of the reply.
    pub code: u16,
    /// Text of each line, in order, without codes or separators.
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text with lines joined by a single space.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// 2xx: the command completed.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx: the peer expects more input (e.g. 354 after DATA).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// 4xx: transient failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx: permanent failure.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses one complete reply from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full reply;
    /// otherwise the reply and the number of bytes it occupied. Accepts
    /// both CRLF and bare LF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Parse`] for non-UTF-8 input, malformed status
    /// codes, bad separators, or a code change mid-reply.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        loop {
            let rest = &buf[consumed..];
            let Some(end) = rest.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let mut raw = &rest[..end];
            if raw.last() == Some(&b'\r') {
                raw = &raw[..raw.len() - 1];
            }
            consumed += end + 1;

            let line = std::str::from_utf8(raw)
                .map_err(|err| ClientError::Parse(format!("non-UTF-8 reply line: {err}")))?;
            if line.len() < 3 {
                return Err(ClientError::Parse(format!("reply line too short: {line:?}")));
            }

            // `get` rather than slicing: a multi-byte character straddling
            // byte 3 must parse-fail, not panic.
            let parsed: u16 = line
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| ClientError::Parse(format!("bad status code in {line:?}")))?;
            match code {
                None => code = Some(parsed),
                Some(first) if first != parsed => {
                    return Err(ClientError::Parse(format!(
                        "status code changed mid-reply: {first} then {parsed}"
                    )));
                }
                Some(_) => {}
            }

            let (last, text) = match line.as_bytes().get(3) {
                None => (true, ""),
                Some(b' ') => (true, line.get(4..).unwrap_or("")),
                Some(b'-') => (false, line.get(4..).unwrap_or("")),
                Some(other) => {
                    return Err(ClientError::Parse(format!(
                        "bad separator {:?} in {line:?}",
                        char::from(*other)
                    )));
                }
            };
            lines.push(text.to_string());

            if last {
                let code = code.unwrap_or_default();
                return Ok(Some((Self::new(code, lines), consumed)));
            }
        }
    }
}
