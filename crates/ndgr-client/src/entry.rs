//! Entry-endpoint fetcher.
//!
//! Drives the chained `ChunkedEntry` stream: fetch `view_uri?at=<at>`,
//! classify each entry, emit forward segments, capture the backward pointer,
//! and rearm on `next`. Within one fetch the server's ordering contract is
//! `backward`, `previous*`, `segment+`, `next?`; once the first `segment`
//! of a fetch is seen, later `backward`/`previous` entries in that fetch are
//! stale and ignored. The latch resets on every refetch.

use std::pin::pin;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ndgr_wire::{ChunkedEntry, EntryVariant, MessageSegment};

use crate::backward::BackwardState;
use crate::channel;
use crate::error::ClientError;
use crate::fetch::open_frame_stream;
use crate::options::EntryPosition;

pub(crate) struct EntryFetcher {
    position: Arc<Mutex<EntryPosition>>,
    task: tokio::task::JoinHandle<()>,
}

impl EntryFetcher {
    pub(crate) fn spawn(
        client: reqwest::Client,
        view_uri: String,
        from: EntryPosition,
        segments: channel::Sender<MessageSegment>,
        backward: BackwardState,
        cancel: CancellationToken,
    ) -> Self {
        let position = Arc::new(Mutex::new(from));
        let shared = Arc::clone(&position);
        let task = tokio::spawn(async move {
            run_entry_loop(client, view_uri, from, shared, segments, backward, cancel).await;
        });
        EntryFetcher { position, task }
    }

    /// Latest rearm point: the most recent `next.at` seen, or the position
    /// the fetcher started from. Read by the supervisor at teardown.
    pub(crate) fn position(&self) -> EntryPosition {
        *self.position.lock().expect("entry position lock")
    }

    pub(crate) async fn wait(self) {
        let _ = self.task.await;
    }
}

async fn run_entry_loop(
    client: reqwest::Client,
    view_uri: String,
    from: EntryPosition,
    position: Arc<Mutex<EntryPosition>>,
    segments: channel::Sender<MessageSegment>,
    backward: BackwardState,
    cancel: CancellationToken,
) {
    let mut at = from;
    loop {
        let uri = format!("{view_uri}?at={at}");
        let stream = match open_frame_stream::<ChunkedEntry>(&client, &uri, &cancel).await {
            Ok(stream) => stream,
            Err(_) if cancel.is_cancelled() => return,
            Err(e) => {
                warn!(error = %e, "entry fetch failed");
                segments.throw(e);
                return;
            }
        };
        let mut stream = pin!(stream);

        let mut saw_segment = false;
        let mut next_at = None;
        loop {
            let entry = tokio::select! {
                () = cancel.cancelled() => return,
                entry = stream.next() => entry,
            };
            match entry {
                None => break,
                Some(Err(_)) if cancel.is_cancelled() => return,
                Some(Err(e)) => {
                    warn!(error = %e, "entry stream failed");
                    segments.throw(e);
                    return;
                }
                Some(Ok(entry)) => match entry.entry {
                    Some(EntryVariant::Next(next)) => {
                        next_at = Some(next.at);
                        *position.lock().expect("entry position lock") =
                            EntryPosition::At(next.at);
                    }
                    Some(EntryVariant::Segment(segment)) => {
                        saw_segment = true;
                        debug!(uri = %segment.uri, "live segment");
                        segments.enqueue(segment);
                    }
                    Some(EntryVariant::Previous(segment)) => {
                        if saw_segment {
                            debug!(uri = %segment.uri, "stale previous entry ignored");
                        } else {
                            segments.enqueue(segment);
                        }
                    }
                    Some(EntryVariant::Backward(pointer)) => {
                        if saw_segment {
                            debug!("stale backward entry ignored");
                        } else {
                            backward.seed(&pointer);
                        }
                    }
                    None => {}
                },
            }
        }

        match next_at {
            Some(next) => at = EntryPosition::At(next),
            None => {
                // No rearm instruction: the chain is complete.
                debug!("entry chain exhausted");
                segments.close();
                return;
            }
        }
    }
}
