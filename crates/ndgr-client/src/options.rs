//! Client connection options.

use std::time::Duration;

use ndgr_protocol::StreamRequest;

/// Fixed retry schedule applied between failed reconnect attempts; once the
/// last delay is spent the session ends as `ReconnectFailed`.
pub const DEFAULT_RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(15),
    Duration::from_secs(30),
    Duration::from_secs(30),
];

/// Where to start reading the entry endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPosition {
    /// Join the live edge.
    Now,
    /// Start from a UNIX-seconds instant.
    At(i64),
}

impl std::fmt::Display for EntryPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPosition::Now => f.write_str("now"),
            EntryPosition::At(seconds) => write!(f, "{seconds}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Initial entry position; reconnects always resume from the latest
    /// rearm point instead.
    pub from: EntryPosition,
    /// Stream descriptor sent inside `startWatching`. `None` requests a
    /// comments-only session.
    pub stream: Option<StreamRequest>,
    /// `User-Agent` for both the watch socket and HTTP fetches.
    pub user_agent: Option<String>,
    /// Delays between reconnect attempts.
    pub retry_delays: Vec<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            from: EntryPosition::Now,
            stream: None,
            user_agent: None,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}
