//! Live message fetcher.
//!
//! Consumes forward segment descriptors, opens each segment's frame stream,
//! and re-emits every message onto the single shared channel. Carries the
//! skip-to-meta-id resume filter and detects the program-ended state
//! message, which terminates the sequence immediately after delivery.

use std::pin::pin;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ndgr_wire::{ChunkedMessage, MessageSegment, Meta};

use crate::channel::{self, BoxFilter, FilterVerdict};
use crate::error::ClientError;
use crate::fetch::open_frame_stream;

/// How a message loop finished; the supervisor maps this onto its state
/// machine.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// Program-ended state observed; the shared channel is closed.
    Ended,
    /// Clean end: upstream segments ran out, or the loop was cancelled.
    Closed,
    /// Fetch/decode/transport failure; the channel is left open so a
    /// reconnected fetcher can resume it.
    Failed(ClientError),
}

pub(crate) struct MessageFetcher {
    pub(crate) task: tokio::task::JoinHandle<FetchOutcome>,
}

impl MessageFetcher {
    pub(crate) fn spawn(
        client: reqwest::Client,
        segments: channel::Receiver<MessageSegment>,
        messages: channel::Sender<ChunkedMessage>,
        skip_to: Option<String>,
        last_meta: Arc<Mutex<Option<Meta>>>,
        cancel: CancellationToken,
    ) -> Self {
        // The delivery filter does double duty: it implements the one-shot
        // skip-to-meta-id resume rule and records the meta of every message
        // actually delivered.
        messages.set_filter(match skip_to {
            Some(id) => skip_to_meta(id, Arc::clone(&last_meta)),
            None => record_meta(last_meta),
        });
        let task = tokio::spawn(run_message_loop(client, segments, messages, cancel));
        MessageFetcher { task }
    }
}

/// Pass-through filter that tracks the most recently delivered meta.
fn record_meta(last_meta: Arc<Mutex<Option<Meta>>>) -> BoxFilter<ChunkedMessage> {
    Box::new(move |message: &ChunkedMessage| {
        if let Some(meta) = &message.meta {
            *last_meta.lock().expect("last meta lock") = Some(meta.clone());
        }
        FilterVerdict::Keep
    })
}

/// Drop everything up to and including the message with `skip_id`, then
/// swap in the pass-through filter.
fn skip_to_meta(skip_id: String, last_meta: Arc<Mutex<Option<Meta>>>) -> BoxFilter<ChunkedMessage> {
    Box::new(move |message: &ChunkedMessage| {
        if message.meta_id() == Some(skip_id.as_str()) {
            debug!(meta_id = %skip_id, "resume cursor reached");
            FilterVerdict::Swap(false, Some(record_meta(Arc::clone(&last_meta))))
        } else {
            FilterVerdict::Drop
        }
    })
}

async fn run_message_loop(
    client: reqwest::Client,
    segments: channel::Receiver<MessageSegment>,
    messages: channel::Sender<ChunkedMessage>,
    cancel: CancellationToken,
) -> FetchOutcome {
    loop {
        let segment = tokio::select! {
            () = cancel.cancelled() => return FetchOutcome::Closed,
            segment = segments.recv() => segment,
        };
        let segment = match segment {
            Err(e) => return FetchOutcome::Failed(e),
            Ok(None) => {
                if cancel.is_cancelled() {
                    return FetchOutcome::Closed;
                }
                messages.close();
                return FetchOutcome::Closed;
            }
            Ok(Some(segment)) => segment,
        };

        debug!(uri = %segment.uri, "segment fetch");
        let stream = match open_frame_stream::<ChunkedMessage>(&client, &segment.uri, &cancel).await
        {
            Ok(stream) => stream,
            Err(ClientError::Abort) => return FetchOutcome::Closed,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let mut stream = pin!(stream);

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => return FetchOutcome::Closed,
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Err(_)) if cancel.is_cancelled() => return FetchOutcome::Closed,
                Some(Err(e)) => return FetchOutcome::Failed(e),
                Some(Ok(message)) => {
                    let ended = message.is_program_ended();
                    messages.enqueue(message);
                    if ended {
                        info!("program ended");
                        messages.close();
                        return FetchOutcome::Ended;
                    }
                }
            }
        }
    }
}
