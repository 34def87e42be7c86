//! Error taxonomy of the connection engine.
//!
//! Errors that travel through the shared message channel are latched and
//! handed to every late reader, so the whole taxonomy is `Clone` and carries
//! rendered strings rather than source errors.

use ndgr_protocol::DisconnectReason;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("no live id (lv/ch/user) found in '{input}'")]
    LiveIdParse { input: String },

    #[error("watch page for {live_id} returned HTTP {status}")]
    PageNotFound { live_id: String, status: u16 },

    #[error("watch page parse: {0}")]
    PageParse(String),

    #[error("no watch websocket url for {live_id} (private program or not permitted)")]
    AccessDenied { live_id: String },

    /// HTTP-level failure on an entry/segment/backward URI: non-2xx status
    /// or a malformed/truncated frame stream.
    #[error("fetch {uri}: {reason}")]
    Fetch {
        uri: String,
        reason: String,
        truncated: bool,
    },

    /// Transport-layer failure (reset, DNS, TLS). Triggers reconnect.
    #[error("network: {0}")]
    Network(String),

    #[error("websocket: {0}")]
    Ws(String),

    /// The server or a peer violated the expected frame sequence.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Terminal `disconnect` frame with a non-`END_PROGRAM` reason.
    #[error("server disconnect: {reason:?}")]
    Disconnect { reason: DisconnectReason },

    #[error("operation aborted")]
    Abort,
}

impl ClientError {
    /// Errors the supervisor answers with a reconnect attempt rather than a
    /// teardown.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::Ws(_) | ClientError::Fetch { .. }
        )
    }

    pub(crate) fn fetch(uri: &str, reason: impl std::fmt::Display) -> Self {
        ClientError::Fetch {
            uri: uri.to_owned(),
            reason: reason.to_string(),
            truncated: false,
        }
    }
}

/// Map a transport error from the HTTP client onto the taxonomy: request
/// construction problems are fetch errors, everything else is network-class.
pub(crate) fn from_reqwest(e: &reqwest::Error, uri: &str) -> ClientError {
    if e.is_builder() {
        ClientError::fetch(uri, e)
    } else {
        ClientError::Network(e.to_string())
    }
}
