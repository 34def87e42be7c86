//! Incremental size-delimited frame decoding.
//!
//! Entry and segment endpoints stream protobuf messages prefixed by a varint
//! length. HTTP delivers the body in arbitrary chunk boundaries, so the
//! decoder buffers whatever has arrived and cuts out complete frames as soon
//! as the length prefix plus payload are available. The incomplete tail
//! stays buffered; an upstream end with a non-empty tail is a truncated
//! frame.

use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use prost::Message;
use prost::encoding::decode_varint;

// A varint never spans more than 10 bytes; with that many buffered, a prefix
// that still fails to parse is malformed rather than incomplete.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid frame length prefix: {0}")]
    InvalidLength(prost::DecodeError),
    #[error("frame decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("stream ended inside a frame ({pending} bytes pending)")]
    TruncatedFrame { pending: usize },
}

/// Cuts a chunked byte stream into decoded messages of one schema.
pub struct FrameDecoder<M> {
    buf: BytesMut,
    _schema: PhantomData<M>,
}

impl<M: Message + Default> FrameDecoder<M> {
    pub fn new() -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            _schema: PhantomData,
        }
    }

    /// Append a chunk of the upstream body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Cut and decode the next complete frame, or `Ok(None)` if the buffer
    /// holds only a partial frame so far.
    pub fn try_next(&mut self) -> Result<Option<M>, WireError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut peek: &[u8] = &self.buf;
        let len = match decode_varint(&mut peek) {
            Ok(len) => len,
            Err(_) if self.buf.len() < MAX_VARINT_LEN => return Ok(None),
            Err(e) => return Err(WireError::InvalidLength(e)),
        };
        let prefix_len = self.buf.len() - peek.len();
        let len = usize::try_from(len)
            .map_err(|_| WireError::InvalidLength(prost::DecodeError::new("length overflow")))?;

        if peek.len() < len {
            return Ok(None);
        }

        // Slice the payload out of the buffer rather than copying it.
        self.buf.advance(prefix_len);
        let frame = self.buf.split_to(len).freeze();
        Ok(Some(M::decode(frame)?))
    }

    /// Check for a clean end of stream: any buffered remainder means the
    /// upstream closed mid-frame.
    pub fn finish(&self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::TruncatedFrame {
                pending: self.buf.len(),
            })
        }
    }
}

impl<M: Message + Default> Default for FrameDecoder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `messages` as one size-delimited body, as the endpoints serve it.
pub fn encode_frames<M: Message>(messages: &[M]) -> Vec<u8> {
    let mut body = Vec::new();
    for message in messages {
        // encode_length_delimited cannot fail when writing to a Vec.
        message
            .encode_length_delimited(&mut body)
            .expect("Vec writes are infallible");
    }
    body
}
