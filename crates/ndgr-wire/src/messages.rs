//! Protobuf messages of the NDGR message channel.
//!
//! Three endpoint shapes share these types:
//! - the entry endpoint streams [`ChunkedEntry`] frames (pointers and rearm
//!   instructions),
//! - each live segment endpoint streams [`ChunkedMessage`] frames,
//! - a backward endpoint returns one [`PackedSegment`] body (a historic page).
//!
//! Field numbers follow the upstream schema; fields the client never reads
//! are omitted, which protobuf tolerates by construction.

use prost::Message;

/// Seconds + nanos wall-clock instant, wire-compatible with
/// `google.protobuf.Timestamp`.
#[derive(Clone, Copy, PartialEq, Eq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn from_seconds(seconds: i64) -> Self {
        Timestamp { seconds, nanos: 0 }
    }

    /// Milliseconds since the UNIX epoch, truncating sub-millisecond nanos.
    pub fn as_unix_ms(&self) -> i64 {
        self.seconds * 1_000 + i64::from(self.nanos) / 1_000_000
    }
}

// ---------------------------------------------------------------------------
// Entry endpoint
// ---------------------------------------------------------------------------

/// A bare URI pointer to another fetchable resource.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct SegmentUri {
    #[prost(string, tag = "1")]
    pub uri: String,
}

/// A live sub-segment: a finite `ChunkedMessage` stream at `uri` covering
/// `[from, until)`.
#[derive(Clone, PartialEq, Message)]
pub struct MessageSegment {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub until: Option<Timestamp>,
    #[prost(string, tag = "3")]
    pub uri: String,
}

/// Pointers into program history: the head of the backward `PackedSegment`
/// chain and (optionally) the state-only snapshot chain.
#[derive(Clone, PartialEq, Message)]
pub struct BackwardSegment {
    #[prost(message, optional, tag = "1")]
    pub until: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub segment: Option<SegmentUri>,
    #[prost(message, optional, tag = "3")]
    pub snapshot: Option<SegmentUri>,
}

/// Rearm instruction: refetch the entry endpoint with `?at=<at>`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ReadyForNext {
    #[prost(int64, tag = "1")]
    pub at: i64,
}

/// One element of an entry stream.
///
/// A single fetch emits entries in the order `backward`, `previous*`,
/// `segment+`, `next?`; consumers enforce that ordering (see the entry
/// fetcher in `ndgr-client`).
#[derive(Clone, PartialEq, Message)]
pub struct ChunkedEntry {
    #[prost(oneof = "EntryVariant", tags = "1, 2, 3, 4")]
    pub entry: Option<EntryVariant>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EntryVariant {
    #[prost(message, tag = "1")]
    Backward(BackwardSegment),
    #[prost(message, tag = "2")]
    Previous(MessageSegment),
    #[prost(message, tag = "3")]
    Segment(MessageSegment),
    #[prost(message, tag = "4")]
    Next(ReadyForNext),
}

// ---------------------------------------------------------------------------
// Segment endpoints
// ---------------------------------------------------------------------------

/// Delivery metadata attached to most chat/state messages. `id` is the
/// opaque resume cursor used for deduplication across reconnects.
#[derive(Clone, PartialEq, Message)]
pub struct Meta {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub at: Option<Timestamp>,
}

/// A viewer chat message.
#[derive(Clone, PartialEq, Message)]
pub struct Chat {
    #[prost(string, tag = "1")]
    pub content: String,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(int64, tag = "3")]
    pub vpos: i64,
    #[prost(int64, optional, tag = "4")]
    pub raw_user_id: Option<i64>,
    #[prost(string, optional, tag = "5")]
    pub hashed_user_id: Option<String>,
}

/// Operator-style one-line notification (visits, ad starts, etc.).
#[derive(Clone, PartialEq, Eq, Message)]
pub struct SimpleNotification {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Chat-layer content of a [`ChunkedMessage`].
#[derive(Clone, PartialEq, Message)]
pub struct NicoliveMessage {
    #[prost(oneof = "MessageData", tags = "1, 2")]
    pub data: Option<MessageData>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum MessageData {
    #[prost(message, tag = "1")]
    Chat(Chat),
    #[prost(message, tag = "2")]
    SimpleNotification(SimpleNotification),
}

/// Program state transitions carried on the message channel.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct NicoliveState {
    #[prost(message, optional, tag = "1")]
    pub program_status: Option<ProgramStatus>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct ProgramStatus {
    #[prost(enumeration = "ProgramState", tag = "1")]
    pub state: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProgramState {
    Unknown = 0,
    Ended = 1,
}

/// Connection-level control marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Signal {
    Flushed = 0,
}

/// One element of a live segment stream (and of a [`PackedSegment`] page).
#[derive(Clone, PartialEq, Message)]
pub struct ChunkedMessage {
    #[prost(message, optional, tag = "1")]
    pub meta: Option<Meta>,
    #[prost(oneof = "MessagePayload", tags = "2, 3, 4")]
    pub payload: Option<MessagePayload>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum MessagePayload {
    #[prost(message, tag = "2")]
    Message(NicoliveMessage),
    #[prost(message, tag = "3")]
    State(NicoliveState),
    #[prost(enumeration = "Signal", tag = "4")]
    Signal(i32),
}

impl ChunkedMessage {
    /// The meta id, when delivery metadata is present.
    pub fn meta_id(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.id.as_str())
    }

    /// True for the `state` payload announcing the program has ended; the
    /// live sequence terminates right after this message is delivered.
    pub fn is_program_ended(&self) -> bool {
        match &self.payload {
            Some(MessagePayload::State(state)) => state
                .program_status
                .as_ref()
                .is_some_and(|s| s.state() == ProgramState::Ended),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Backward endpoint
// ---------------------------------------------------------------------------

/// A historic page: messages in forward chronological order, plus chain
/// pointers that walk further into the past.
#[derive(Clone, PartialEq, Message)]
pub struct PackedSegment {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<ChunkedMessage>,
    #[prost(message, optional, tag = "2")]
    pub next: Option<SegmentUri>,
    #[prost(message, optional, tag = "3")]
    pub snapshot: Option<SegmentUri>,
}
