//! EHLO capability tracking.
//!
//! The peer advertises its extensions in the EHLO reply; the rest of the
//! session consults this set before emitting optional parameters.

use crate::reply::Reply;

/// Extensions advertised by the peer in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    /// STARTTLS (RFC 3207): the connection can be upgraded to TLS.
    pub starttls: bool,
    /// SIZE (RFC 1870); `Some(0)` means advertised without a limit.
    pub size: Option<usize>,
    /// AUTH mechanisms, uppercased, in advertised order.
    pub auth: Vec<String>,
    /// 8BITMIME (RFC 6152).
    pub eight_bit_mime: bool,
    /// SMTPUTF8 (RFC 6531).
    pub smtputf8: bool,
    /// PIPELINING (RFC 2920).
    pub pipelining: bool,
}

impl Extensions {
    /// Builds the capability set from an EHLO reply.
    ///
    /// The first reply line is the peer's identification and is skipped;
    /// unknown keywords are ignored.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut extensions = Self::default();

        for line in reply.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => extensions.starttls = true,
                "SIZE" => {
                    extensions.size =
                        Some(words.next().and_then(|max| max.parse().ok()).unwrap_or(0));
                }
                "AUTH" => {
                    extensions
                        .auth
                        .extend(words.map(|mech| mech.to_ascii_uppercase()));
                }
                "8BITMIME" => extensions.eight_bit_mime = true,
                "SMTPUTF8" => extensions.smtputf8 = true,
                "PIPELINING" => extensions.pipelining = true,
                _ => {}
            }
        }

        extensions
    }

    /// Whether the peer advertises the given AUTH mechanism.
    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|mech| mech.eq_ignore_ascii_case(mechanism))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ehlo(lines: &[&str]) -> Reply {
        Reply::new(250, lines.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn typical_capability_set() {
        let extensions = Extensions::from_ehlo(&ehlo(&[
            "mail.example.org",
            "PIPELINING",
            "SIZE 52428800",
            "STARTTLS",
            "AUTH PLAIN LOGIN",
            "8BITMIME",
            "SMTPUTF8",
        ]));

        assert!(extensions.starttls);
        assert_eq!(extensions.size, Some(52_428_800));
        assert!(extensions.supports_auth("plain"));
        assert!(extensions.supports_auth("LOGIN"));
        assert!(!extensions.supports_auth("CRAM-MD5"));
        assert!(extensions.eight_bit_mime);
        assert!(extensions.smtputf8);
        assert!(extensions.pipelining);
    }

    #[test]
    fn size_without_limit() {
        let extensions = Extensions::from_ehlo(&ehlo(&["mx", "SIZE"]));
        assert_eq!(extensions.size, Some(0));
    }

    #[test]
    fn identification_line_is_not_a_capability() {
        // A hostname that happens to spell an extension must not count.
        let extensions = Extensions::from_ehlo(&ehlo(&["STARTTLS"]));
        assert!(!extensions.starttls);
    }

    #[test]
    fn unknown_keywords_ignored() {
        let extensions = Extensions::from_ehlo(&ehlo(&["mx", "DSN", "CHUNKING"]));
        assert_eq!(extensions, Extensions::default());
    }
}
