//! Per-operation deadlines for SMTP sessions.

use std::time::Duration;

use serde::Deserialize;

/// Deadlines applied to individual SMTP operations.
///
/// Prevents a hung peer from wedging a delivery task. The data deadline is
/// deliberately longer than the others to accommodate large messages.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    /// Dialing and TLS handshakes. Default: 30 seconds.
    #[serde(default = "default_connect")]
    pub connect_secs: u64,

    /// Any single command/reply exchange. Default: 30 seconds.
    #[serde(default = "default_command")]
    pub command_secs: u64,

    /// Transmitting the message content after DATA. Default: 120 seconds.
    #[serde(default = "default_data")]
    pub data_secs: u64,

    /// The closing QUIT exchange. Default: 5 seconds.
    #[serde(default = "default_quit")]
    pub quit_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect(),
            command_secs: default_command(),
            data_secs: default_data(),
            quit_secs: default_quit(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

const fn default_connect() -> u64 {
    30
}

const fn default_command() -> u64 {
    30
}

const fn default_data() -> u64 {
    120
}

const fn default_quit() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(30));
        assert_eq!(timeouts.data(), Duration::from_secs(120));
        assert_eq!(timeouts.quit(), Duration::from_secs(5));
    }
}
