//! HTTP access to the message channel.
//!
//! Entry and segment endpoints are GET requests whose bodies stream
//! size-delimited protobuf frames; the backward endpoint returns one
//! `PackedSegment` body. Cancellation is cooperative: a cancelled token
//! ends a frame stream early without surfacing an error (callers decide
//! whether an early end was caller-initiated).

use futures_util::{Stream, StreamExt};
use prost::Message;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use ndgr_wire::{FrameDecoder, PackedSegment, WireError};

use crate::error::{ClientError, from_reqwest};

fn wire_error(uri: &str, e: &WireError) -> ClientError {
    ClientError::Fetch {
        uri: uri.to_owned(),
        reason: e.to_string(),
        truncated: matches!(e, WireError::TruncatedFrame { .. }),
    }
}

/// Open `uri` and decode its body as a stream of `M` frames.
///
/// Returns `ClientError::Abort` if `cancel` fires before the response
/// arrives; after that, cancellation just ends the stream.
pub(crate) async fn open_frame_stream<M>(
    client: &reqwest::Client,
    uri: &str,
    cancel: &CancellationToken,
) -> Result<impl Stream<Item = Result<M, ClientError>>, ClientError>
where
    M: Message + Default,
{
    let response = tokio::select! {
        () = cancel.cancelled() => return Err(ClientError::Abort),
        r = client.get(uri).send() => r.map_err(|e| from_reqwest(&e, uri))?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::fetch(uri, format_args!("HTTP {status}")));
    }

    let uri = uri.to_owned();
    let cancel = cancel.clone();
    let mut body = response.bytes_stream();

    Ok(async_stream::stream! {
        let mut decoder = FrameDecoder::<M>::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return,
                c = body.next() => c,
            };
            match chunk {
                None => break,
                Some(Ok(bytes)) => {
                    trace!(uri = %uri, len = bytes.len(), "body chunk");
                    decoder.push(&bytes);
                    loop {
                        match decoder.try_next() {
                            Ok(Some(frame)) => yield Ok(frame),
                            Ok(None) => break,
                            Err(e) => {
                                yield Err(wire_error(&uri, &e));
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    yield Err(from_reqwest(&e, &uri));
                    return;
                }
            }
        }
        if let Err(e) = decoder.finish() {
            yield Err(wire_error(&uri, &e));
        }
    })
}

/// Fetch one backward page. Decode failures are truncated-frame fetch
/// errors: the page is a single protobuf body, so any decode error means
/// the body ended early or was corrupted.
pub(crate) async fn fetch_packed_segment(
    client: &reqwest::Client,
    uri: &str,
    cancel: &CancellationToken,
) -> Result<PackedSegment, ClientError> {
    let response = tokio::select! {
        () = cancel.cancelled() => return Err(ClientError::Abort),
        r = client.get(uri).send() => r.map_err(|e| from_reqwest(&e, uri))?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::fetch(uri, format_args!("HTTP {status}")));
    }
    let body = tokio::select! {
        () = cancel.cancelled() => return Err(ClientError::Abort),
        b = response.bytes() => b.map_err(|e| from_reqwest(&e, uri))?,
    };
    PackedSegment::decode(body).map_err(|e| ClientError::Fetch {
        uri: uri.to_owned(),
        reason: e.to_string(),
        truncated: true,
    })
}
