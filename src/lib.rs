// ndgr: Client library for the Niconico live-streaming comment
// infrastructure.
//
// Facade over the workspace crates:
// - `ndgr-protocol` — watch-channel JSON frame types
// - `ndgr-wire` — message-channel protobuf types + frame decoding
// - `ndgr-client` — the connection engine (sessions, fetchers, supervisor)

pub use ndgr_client::{
    BackwardBatch, BackwardFetch, BackwardFetcher, BackwardPointer, BroadcasterComment,
    ClientError, CommentOptions, ConnectOptions, DEFAULT_RETRY_DELAYS, EntryPosition,
    NicoliveClient, SessionState, backward, bootstrap, broadcaster, channel, error, options,
    supervisor,
};
pub use ndgr_protocol as protocol;
pub use ndgr_wire as wire;
