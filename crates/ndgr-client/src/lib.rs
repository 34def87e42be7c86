// ndgr-client: The connection engine for the comment infrastructure.
//
// Two cooperating channels: a long-lived watch WebSocket that negotiates
// session parameters and emits control events, and a message channel (a
// chain of size-delimited protobuf streams) carrying the actual chat/state
// messages. The supervisor drives both, reconnects on migration or network
// failure, and presents one monotonically-progressing, deduplicated message
// sequence — plus an independently-paced backward history walker.

pub mod backward;
pub mod bootstrap;
pub mod broadcaster;
pub mod channel;
pub mod error;
pub mod options;
pub mod supervisor;

mod entry;
mod fetch;
mod message;
mod watch;

pub use backward::{BackwardBatch, BackwardFetch, BackwardFetcher, BackwardPointer};
pub use broadcaster::BroadcasterComment;
pub use error::ClientError;
pub use options::{ConnectOptions, DEFAULT_RETRY_DELAYS, EntryPosition};
pub use supervisor::{NicoliveClient, SessionState};
pub use watch::CommentOptions;
