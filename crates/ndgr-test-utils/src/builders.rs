//! Builders for wire messages used across the test suites.

use ndgr_wire::{
    BackwardSegment, Chat, ChunkedEntry, ChunkedMessage, EntryVariant, MessageData,
    MessagePayload, MessageSegment, Meta, NicoliveMessage, NicoliveState, PackedSegment,
    ProgramState, ProgramStatus, ReadyForNext, SegmentUri, Timestamp,
};

pub fn segment(uri: &str) -> MessageSegment {
    MessageSegment {
        from: None,
        until: None,
        uri: uri.to_owned(),
    }
}

pub fn segment_entry(uri: &str) -> ChunkedEntry {
    ChunkedEntry {
        entry: Some(EntryVariant::Segment(segment(uri))),
    }
}

pub fn previous_entry(uri: &str) -> ChunkedEntry {
    ChunkedEntry {
        entry: Some(EntryVariant::Previous(segment(uri))),
    }
}

pub fn next_entry(at: i64) -> ChunkedEntry {
    ChunkedEntry {
        entry: Some(EntryVariant::Next(ReadyForNext { at })),
    }
}

pub fn backward_entry(segment_uri: Option<&str>, snapshot_uri: Option<&str>) -> ChunkedEntry {
    ChunkedEntry {
        entry: Some(EntryVariant::Backward(BackwardSegment {
            until: None,
            segment: segment_uri.map(|uri| SegmentUri {
                uri: uri.to_owned(),
            }),
            snapshot: snapshot_uri.map(|uri| SegmentUri {
                uri: uri.to_owned(),
            }),
        })),
    }
}

pub fn chat_message(id: &str, at_seconds: i64, content: &str) -> ChunkedMessage {
    ChunkedMessage {
        meta: Some(Meta {
            id: id.to_owned(),
            at: Some(Timestamp::from_seconds(at_seconds)),
        }),
        payload: Some(MessagePayload::Message(NicoliveMessage {
            data: Some(MessageData::Chat(Chat {
                content: content.to_owned(),
                name: None,
                vpos: at_seconds * 100,
                raw_user_id: None,
                hashed_user_id: None,
            })),
        })),
    }
}

pub fn ended_state_message(id: &str) -> ChunkedMessage {
    ChunkedMessage {
        meta: Some(Meta {
            id: id.to_owned(),
            at: None,
        }),
        payload: Some(MessagePayload::State(NicoliveState {
            program_status: Some(ProgramStatus {
                state: ProgramState::Ended as i32,
            }),
        })),
    }
}

pub fn packed_segment(
    messages: &[ChunkedMessage],
    next: Option<&str>,
    snapshot: Option<&str>,
) -> PackedSegment {
    PackedSegment {
        messages: messages.to_vec(),
        next: next.map(|uri| SegmentUri {
            uri: uri.to_owned(),
        }),
        snapshot: snapshot.map(|uri| SegmentUri {
            uri: uri.to_owned(),
        }),
    }
}

/// A backward page encoded the way the endpoint serves it: one bare
/// protobuf body, not size-delimited.
pub fn packed_body(
    messages: &[ChunkedMessage],
    next: Option<&str>,
    snapshot: Option<&str>,
) -> Vec<u8> {
    use prost::Message;
    packed_segment(messages, next, snapshot).encode_to_vec()
}
