//! Shared producer/consumer queue behind every caller-facing sequence.
//!
//! Unbounded FIFO with three latched terminal states: closed (consumers
//! drain then see end-of-sequence), errored (consumers drain then keep
//! getting the latched error), abandoned (every consumer handle dropped
//! before close; further values are discarded).
//!
//! Receivers are cloneable and race over one queue: each value is delivered
//! to exactly one reader. An optional enqueue-side filter decides per value;
//! its swap form supports one-shot filters such as "drop everything up to
//! and including meta id X, then pass everything".

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::ClientError;

pub type BoxFilter<T> = Box<dyn FnMut(&T) -> FilterVerdict<T> + Send>;

pub enum FilterVerdict<T> {
    Keep,
    Drop,
    /// Apply the verdict to this value, then replace the filter
    /// (`None` = pass everything from now on).
    Swap(bool, Option<BoxFilter<T>>),
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    error: Option<ClientError>,
    abandoned: bool,
    filter: Option<BoxFilter<T>>,
    on_abandon: Option<Box<dyn FnOnce() + Send>>,
    senders: usize,
    receivers: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            closed: false,
            error: None,
            abandoned: false,
            filter: None,
            on_abandon: None,
            senders: 1,
            receivers: 1,
        }),
        notify: Notify::new(),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Append a value unless the channel is closed, errored, or abandoned.
    /// The installed filter (if any) is consulted first.
    pub fn enqueue(&self, value: T) {
        let mut state = self.shared.state.lock().expect("channel lock");
        if state.closed || state.error.is_some() || state.abandoned {
            return;
        }
        let keep = if let Some(mut filter) = state.filter.take() {
            match filter(&value) {
                FilterVerdict::Keep => {
                    state.filter = Some(filter);
                    true
                }
                FilterVerdict::Drop => {
                    state.filter = Some(filter);
                    false
                }
                FilterVerdict::Swap(keep, next) => {
                    state.filter = next;
                    keep
                }
            }
        } else {
            true
        };
        if keep {
            state.queue.push_back(value);
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Latch the error state; readers drain queued values, then every
    /// subsequent read fails with a clone of `error`.
    pub fn throw(&self, error: ClientError) {
        let mut state = self.shared.state.lock().expect("channel lock");
        if state.closed || state.error.is_some() {
            return;
        }
        state.error = Some(error);
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Latch the closed state; readers drain queued values, then see
    /// end-of-sequence.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("channel lock");
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Install (or replace) the enqueue-side filter.
    ///
    /// The filter runs under the channel lock and must not call back into
    /// the channel.
    pub fn set_filter(&self, filter: BoxFilter<T>) {
        let mut state = self.shared.state.lock().expect("channel lock");
        state.filter = Some(filter);
    }

    /// Register a callback fired once if every receiver is dropped before
    /// the channel closes.
    pub fn on_abandon(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().expect("channel lock");
        state.on_abandon = Some(Box::new(callback));
    }
}

impl<T> Receiver<T> {
    /// Next value in FIFO order. Returns `Ok(None)` once the channel is
    /// closed and drained; returns the latched error once errored and
    /// drained. Multiple receivers race; each value goes to exactly one.
    pub async fn recv(&self) -> Result<Option<T>, ClientError> {
        loop {
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().expect("channel lock");
                if let Some(value) = state.queue.pop_front() {
                    return Ok(Some(value));
                }
                if let Some(error) = &state.error {
                    return Err(error.clone());
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().expect("channel lock").senders += 1;
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().expect("channel lock").receivers += 1;
        Receiver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("channel lock");
        state.senders -= 1;
        // Last producer gone: end the sequence unless a terminal state is
        // already latched.
        if state.senders == 0 && !state.closed && state.error.is_none() {
            state.closed = true;
            drop(state);
            self.shared.notify.notify_waiters();
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let callback = {
            let mut state = self.shared.state.lock().expect("channel lock");
            state.receivers -= 1;
            if state.receivers == 0 && !state.closed {
                state.abandoned = true;
                state.on_abandon.take()
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}
