//! Backward (history) fetcher.
//!
//! Walks the `PackedSegment` chain discovered by the entry fetcher, one page
//! per request, newest page first. The flattened result is delivered
//! oldest-first: pages are reversed, each page's internal order preserved.
//! At most one walk is in flight per connector; the shared pointer state
//! survives reconnects, so a restored session resumes the chain where the
//! previous one left it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ndgr_wire::{BackwardSegment, ChunkedMessage};

use crate::error::ClientError;
use crate::fetch::fetch_packed_segment;

/// Current heads of the backward chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackwardPointer {
    pub segment: Option<String>,
    pub snapshot: Option<String>,
}

struct BackwardInner {
    pointer: BackwardPointer,
    seeded: bool,
    in_flight: bool,
}

/// Pointer state shared between the entry fetcher (which seeds it once) and
/// the walker (which advances it page by page).
#[derive(Clone)]
pub(crate) struct BackwardState {
    inner: Arc<Mutex<BackwardInner>>,
}

impl BackwardState {
    pub(crate) fn new() -> Self {
        BackwardState {
            inner: Arc::new(Mutex::new(BackwardInner {
                pointer: BackwardPointer::default(),
                seeded: false,
                in_flight: false,
            })),
        }
    }

    /// First-seed from an entry-stream `backward` entry. Later seeds are
    /// stale (the walker or a previous session has advanced past them) and
    /// are ignored.
    pub(crate) fn seed(&self, backward: &BackwardSegment) {
        let mut inner = self.inner.lock().expect("backward state lock");
        if inner.seeded {
            return;
        }
        inner.pointer = BackwardPointer {
            segment: backward.segment.as_ref().map(|s| s.uri.clone()),
            snapshot: backward.snapshot.as_ref().map(|s| s.uri.clone()),
        };
        inner.seeded = true;
        debug!(
            segment = ?inner.pointer.segment,
            snapshot = ?inner.pointer.snapshot,
            "backward pointer seeded"
        );
    }

    pub(crate) fn pointer(&self) -> BackwardPointer {
        self.inner.lock().expect("backward state lock").pointer.clone()
    }

    fn advance(&self, pointer: BackwardPointer) {
        let mut inner = self.inner.lock().expect("backward state lock");
        inner.pointer = pointer;
        inner.seeded = true;
    }

    /// Claim the single flight slot and return the starting URI, or `None`
    /// when a walk is already running or the selected chain is exhausted.
    fn try_begin(&self, snapshot: bool) -> Option<String> {
        let mut inner = self.inner.lock().expect("backward state lock");
        if inner.in_flight {
            return None;
        }
        let uri = if snapshot {
            inner.pointer.snapshot.clone()
        } else {
            inner.pointer.segment.clone()
        }?;
        inner.in_flight = true;
        Some(uri)
    }

    fn end_flight(&self) {
        self.inner.lock().expect("backward state lock").in_flight = false;
    }
}

/// Releases the flight slot however the walk ends.
struct FlightGuard(BackwardState);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.end_flight();
    }
}

/// One flattened batch of history.
#[derive(Debug, Clone, PartialEq)]
pub struct BackwardBatch {
    /// Oldest-first concatenation of the fetched pages.
    pub messages: Vec<ChunkedMessage>,
    /// Chain heads after the walk; `None` means that chain is exhausted.
    pub segment_uri: Option<String>,
    pub snapshot_uri: Option<String>,
}

/// A running backward walk.
pub struct BackwardFetch {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<BackwardBatch, ClientError>>,
}

impl BackwardFetch {
    /// Stop the walk at the next suspension point; already-fetched pages are
    /// still returned by [`BackwardFetch::join`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<BackwardBatch, ClientError> {
        self.task.await.map_err(|_| ClientError::Abort)?
    }
}

pub struct BackwardFetcher {
    client: reqwest::Client,
    state: BackwardState,
}

impl BackwardFetcher {
    pub(crate) fn new(client: reqwest::Client, state: BackwardState) -> Self {
        BackwardFetcher { client, state }
    }

    /// Start walking history. Returns `None` while another walk is in
    /// flight, or when the selected chain has no URI (not yet discovered, or
    /// walked to the beginning of the program).
    ///
    /// `max_segments == 0` means unbounded; `delay` paces successive page
    /// fetches. `snapshot` walks the state-only snapshot chain instead of
    /// the full message chain.
    pub fn get_backward_messages(
        &self,
        delay: Duration,
        max_segments: usize,
        snapshot: bool,
    ) -> Option<BackwardFetch> {
        let first_uri = self.state.try_begin(snapshot)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(walk(
            self.client.clone(),
            self.state.clone(),
            first_uri,
            delay,
            max_segments,
            snapshot,
            cancel.clone(),
        ));
        Some(BackwardFetch { cancel, task })
    }
}

async fn walk(
    client: reqwest::Client,
    state: BackwardState,
    first_uri: String,
    delay: Duration,
    max_segments: usize,
    snapshot: bool,
    cancel: CancellationToken,
) -> Result<BackwardBatch, ClientError> {
    let _guard = FlightGuard(state.clone());
    let limit = if max_segments == 0 {
        usize::MAX
    } else {
        max_segments
    };

    let mut pages: Vec<Vec<ChunkedMessage>> = Vec::new();
    let mut uri = Some(first_uri);
    while let Some(current) = uri.take() {
        if pages.len() >= limit {
            break;
        }
        let packed = match fetch_packed_segment(&client, &current, &cancel).await {
            Ok(packed) => packed,
            Err(ClientError::Abort) => break,
            Err(e) if pages.is_empty() => return Err(e),
            Err(e) => {
                warn!(error = %e, "backward walk stopped early");
                break;
            }
        };
        if packed.messages.last().is_some_and(ChunkedMessage::is_program_ended) {
            // Advisory only: the live feed decides when the program is over.
            debug!("backward tail reports program ended");
        }
        state.advance(BackwardPointer {
            segment: packed.next.as_ref().map(|s| s.uri.clone()),
            snapshot: packed.snapshot.as_ref().map(|s| s.uri.clone()),
        });
        pages.push(packed.messages);

        let pointer = state.pointer();
        uri = if snapshot {
            pointer.snapshot
        } else {
            pointer.segment
        };
        if uri.is_some() && pages.len() < limit {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    // Newest page was fetched first; the caller gets one oldest-first batch.
    pages.reverse();
    let messages = pages.into_iter().flatten().collect();
    let pointer = state.pointer();
    Ok(BackwardBatch {
        messages,
        segment_uri: pointer.segment,
        snapshot_uri: pointer.snapshot,
    })
}
