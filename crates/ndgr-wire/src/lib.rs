// ndgr-wire: Binary wire types for the NDGR message channel.
//
// The message channel carries size-delimited protobuf frames. This crate
// holds the message definitions (hand-authored prost derives matching the
// `dwango.nicolive.chat` service schemas, reduced to the fields this client
// reads) and the incremental frame decoder used to cut a byte stream into
// decoded messages.

pub mod decode;
pub mod messages;

pub use decode::{FrameDecoder, WireError, encode_frames};
pub use messages::{
    BackwardSegment, Chat, ChunkedEntry, ChunkedMessage, EntryVariant, MessageData,
    MessagePayload, MessageSegment, Meta, NicoliveMessage, NicoliveState, PackedSegment,
    ProgramState, ProgramStatus, ReadyForNext, SegmentUri, Signal, SimpleNotification,
    Timestamp,
};
