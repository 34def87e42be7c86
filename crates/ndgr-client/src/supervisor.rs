//! Connection supervisor.
//!
//! Owns a watch session + entry fetcher + message fetcher triad and drives
//! it through the session lifecycle:
//!
//! ```text
//! connecting -> opened -> (reconnecting -> opened)* -> disconnected | reconnect_failed
//! ```
//!
//! Reconnection preserves exactly three things — the latest entry rearm
//! point, the meta id of the last delivered message, and the backward chain
//! pointer — and rebuilds everything else. The caller-facing channels
//! (messages, watch frames, state, schedule) are owned here and survive
//! every rebuild, so consumers never observe the seam.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ndgr_protocol::{
    AnswerEnqueteData, GetAkashicData, MessageServerData, NicolivePageData,
    NicoliveWsReceiveMessage, NicoliveWsSendMessage, PostCommentData, ScheduleData,
    StartWatchingData, StreamRequest,
};
use ndgr_wire::{ChunkedMessage, MessageSegment, Meta};

use crate::backward::{BackwardFetch, BackwardFetcher, BackwardState};
use crate::channel;
use crate::entry::EntryFetcher;
use crate::error::ClientError;
use crate::message::{FetchOutcome, MessageFetcher};
use crate::options::{ConnectOptions, EntryPosition};
use crate::watch::{
    CommentOptions, SharedPorts, WatchControl, WatchSession, compute_vpos,
};

/// Aggregate connection state published to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Opened,
    Reconnecting,
    Disconnected,
    ReconnectFailed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::ReconnectFailed
        )
    }
}

enum Command {
    Send(NicoliveWsSendMessage),
}

/// The connected client: one program, one supervisor, shared iterators.
pub struct NicoliveClient {
    messages_rx: channel::Receiver<ChunkedMessage>,
    frames_rx: channel::Receiver<NicoliveWsReceiveMessage>,
    state_rx: watch::Receiver<SessionState>,
    schedule_rx: watch::Receiver<Option<ScheduleData>>,
    message_server_rx: watch::Receiver<Option<MessageServerData>>,
    commands: mpsc::UnboundedSender<Command>,
    backward: BackwardFetcher,
    cancel: CancellationToken,
}

impl NicoliveClient {
    /// Open the watch channel described by `page` and bring up the message
    /// channel behind it. Returns once the first session is established.
    pub async fn connect(
        page: NicolivePageData,
        options: ConnectOptions,
    ) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ua) = &options.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let (messages_tx, messages_rx) = channel::channel();
        let (frames_tx, frames_rx) = channel::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (schedule_tx, schedule_rx) = watch::channel(None);
        let (message_server_tx, message_server_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let backward_state = BackwardState::new();

        let supervisor = Supervisor {
            http: http.clone(),
            page,
            options,
            ports: Arc::new(SharedPorts {
                message_server: message_server_tx,
                schedule: schedule_tx,
                frames: frames_tx,
            }),
            messages_tx,
            state_tx,
            commands: command_rx,
            backward: backward_state.clone(),
            last_meta: Arc::new(Mutex::new(None)),
            cancel: cancel.clone(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(supervisor.run(ready_tx));
        ready_rx.await.map_err(|_| ClientError::Abort)??;

        Ok(NicoliveClient {
            messages_rx,
            frames_rx,
            state_rx,
            schedule_rx,
            message_server_rx,
            commands: command_tx,
            backward: BackwardFetcher::new(http, backward_state),
            cancel,
        })
    }

    /// The shared live-message sequence. Receivers race over one queue:
    /// each message is delivered to exactly one of them.
    pub fn messages(&self) -> channel::Receiver<ChunkedMessage> {
        self.messages_rx.clone()
    }

    /// The shared watch-frame sequence (same racing semantics).
    pub fn watch_frames(&self) -> channel::Receiver<NicoliveWsReceiveMessage> {
        self.frames_rx.clone()
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn schedule(&self) -> Option<ScheduleData> {
        *self.schedule_rx.borrow()
    }

    pub fn message_server_data(&self) -> Option<MessageServerData> {
        self.message_server_rx.borrow().clone()
    }

    /// Walk program history; see [`BackwardFetcher::get_backward_messages`].
    pub fn get_backward_messages(
        &self,
        delay: Duration,
        max_segments: usize,
        snapshot: bool,
    ) -> Option<BackwardFetch> {
        self.backward.get_backward_messages(delay, max_segments, snapshot)
    }

    /// Queue an arbitrary frame on the current watch session.
    pub fn send(&self, frame: NicoliveWsSendMessage) -> Result<(), ClientError> {
        if self.state_rx.borrow().is_terminal() {
            return Err(ClientError::Ws("session closed".to_owned()));
        }
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| ClientError::Ws("session closed".to_owned()))
    }

    /// Post a viewer comment, stamping `vpos` from the announced
    /// `vpos_base_time` at call time.
    pub fn post_comment(
        &self,
        text: &str,
        is_anonymous: bool,
        options: CommentOptions,
    ) -> Result<(), ClientError> {
        let Some(server) = self.message_server_data() else {
            return Err(ClientError::Protocol(
                "no message server announcement yet".to_owned(),
            ));
        };
        let vpos = compute_vpos(server.vpos_base_time, Utc::now());
        self.send(NicoliveWsSendMessage::PostComment(PostCommentData {
            text: text.to_owned(),
            vpos,
            is_anonymous,
            color: options.color,
            size: options.size,
            position: options.position,
            font: options.font,
        }))
    }

    pub fn get_akashic(&self, chase_play: Option<bool>) -> Result<(), ClientError> {
        self.send(NicoliveWsSendMessage::GetAkashic(GetAkashicData {
            chase_play,
        }))
    }

    pub fn change_stream(&self, stream: StreamRequest) -> Result<(), ClientError> {
        self.send(NicoliveWsSendMessage::ChangeStream(stream))
    }

    pub fn answer_enquete(&self, answer: u8) -> Result<(), ClientError> {
        self.send(NicoliveWsSendMessage::AnswerEnquete(AnswerEnqueteData {
            answer,
        }))
    }

    pub fn get_taxonomy(&self) -> Result<(), ClientError> {
        self.send(NicoliveWsSendMessage::GetTaxonomy)
    }

    pub fn get_stream_qualities(&self) -> Result<(), ClientError> {
        self.send(NicoliveWsSendMessage::GetStreamQualities)
    }

    /// Cooperative teardown; resolves once the supervisor has released every
    /// socket and task.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut state = self.state_rx.clone();
        while !state.borrow_and_update().is_terminal() {
            if state.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for NicoliveClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Supervisor internals
// ---------------------------------------------------------------------------

/// One session generation: the triad torn down and rebuilt on reconnect.
struct Incarnation {
    token: CancellationToken,
    session: WatchSession,
    control: mpsc::UnboundedReceiver<WatchControl>,
    entry: EntryFetcher,
    fetcher: MessageFetcher,
}

impl Incarnation {
    async fn shutdown(self) {
        self.token.cancel();
        self.session.shutdown().await;
        self.entry.wait().await;
        // The fetcher handle may already have been consumed by the drive
        // loop; abort is a no-op on a finished task.
        self.fetcher.task.abort();
    }
}

/// Why the drive loop handed control back.
enum IncarnationEnd {
    CallerClosed,
    ProgramEnded,
    /// Segment chain or watch channel finished cleanly.
    StreamEnded,
    /// Non-recoverable failure to surface to the caller.
    Terminal(ClientError),
    /// Server-directed migration with rotated audience token.
    Migrate {
        audience_token: String,
        wait_time_sec: u64,
    },
    /// Recoverable failure: rebuild on the retry schedule.
    Retry(ClientError),
}

struct Supervisor {
    http: reqwest::Client,
    page: NicolivePageData,
    options: ConnectOptions,
    ports: Arc<SharedPorts>,
    messages_tx: channel::Sender<ChunkedMessage>,
    state_tx: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    backward: BackwardState,
    last_meta: Arc<Mutex<Option<Meta>>>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self, ready: oneshot::Sender<Result<(), ClientError>>) {
        self.set_state(SessionState::Connecting);
        let mut ws_url = self.page.websocket_url.clone();
        let mut from = self.options.from;
        let mut skip_to: Option<String>;

        // The initial connection has no retry schedule; its failure belongs
        // to the caller.
        let mut incarnation = match self.open_incarnation(&ws_url, false, from, None).await {
            Ok(incarnation) => {
                self.set_state(SessionState::Opened);
                let _ = ready.send(Ok(()));
                incarnation
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                self.finish(SessionState::Disconnected, None);
                return;
            }
        };

        loop {
            let end = self.drive(&mut incarnation).await;

            // Carryover, then teardown.
            from = incarnation.entry.position();
            skip_to = self
                .last_meta
                .lock()
                .expect("last meta lock")
                .as_ref()
                .map(|meta| meta.id.clone());
            incarnation.shutdown().await;

            let migration_wait = match end {
                IncarnationEnd::CallerClosed => {
                    self.finish(SessionState::Disconnected, None);
                    return;
                }
                IncarnationEnd::ProgramEnded | IncarnationEnd::StreamEnded => {
                    self.finish(SessionState::Disconnected, None);
                    return;
                }
                IncarnationEnd::Terminal(e) => {
                    self.finish(SessionState::Disconnected, Some(e));
                    return;
                }
                IncarnationEnd::Migrate {
                    audience_token,
                    wait_time_sec,
                } => {
                    info!(wait_sec = wait_time_sec, "migrating watch session");
                    match with_audience_token(&ws_url, &audience_token) {
                        Ok(url) => ws_url = url,
                        Err(e) => {
                            self.finish(SessionState::Disconnected, Some(e));
                            return;
                        }
                    }
                    Some(Duration::from_secs(wait_time_sec))
                }
                IncarnationEnd::Retry(e) => {
                    warn!(error = %e, "connection lost, rebuilding");
                    None
                }
            };

            self.set_state(SessionState::Reconnecting);

            // A migration reopens once after the server-given wait; if that
            // fails it falls onto the regular retry schedule.
            let mut next = None;
            if let Some(wait) = migration_wait {
                if !self.sleep_unless_closed(wait).await {
                    self.finish(SessionState::Disconnected, None);
                    return;
                }
                match self
                    .open_incarnation(&ws_url, true, from, skip_to.clone())
                    .await
                {
                    Ok(incarnation) => next = Some(incarnation),
                    Err(e) => warn!(error = %e, "migration reopen failed"),
                }
            }

            let mut last_error = ClientError::Network("reconnect failed".to_owned());
            if next.is_none() {
                for delay in self.options.retry_delays.clone() {
                    if !self.sleep_unless_closed(delay).await {
                        self.finish(SessionState::Disconnected, None);
                        return;
                    }
                    match self
                        .open_incarnation(&ws_url, true, from, skip_to.clone())
                        .await
                    {
                        Ok(incarnation) => {
                            next = Some(incarnation);
                            break;
                        }
                        Err(ClientError::Abort) => {
                            self.finish(SessionState::Disconnected, None);
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "reconnect attempt failed");
                            last_error = e;
                        }
                    }
                }
            }

            match next {
                Some(n) => {
                    incarnation = n;
                    self.set_state(SessionState::Opened);
                }
                None => {
                    self.finish(SessionState::ReconnectFailed, Some(last_error));
                    return;
                }
            }
        }
    }

    /// Service commands and watch for the first lifecycle event of this
    /// incarnation.
    async fn drive(&mut self, incarnation: &mut Incarnation) -> IncarnationEnd {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return IncarnationEnd::CallerClosed,
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = incarnation.session.send(frame) {
                            warn!(error = %e, "outbound frame dropped");
                        }
                    }
                    None => return IncarnationEnd::CallerClosed,
                },
                control = incarnation.control.recv() => match control {
                    Some(WatchControl::Reconnect { audience_token, wait_time_sec }) => {
                        return IncarnationEnd::Migrate { audience_token, wait_time_sec };
                    }
                    Some(WatchControl::Disconnect { reason }) => {
                        return if reason.is_normal() {
                            IncarnationEnd::StreamEnded
                        } else {
                            IncarnationEnd::Terminal(ClientError::Disconnect { reason })
                        };
                    }
                    Some(WatchControl::Closed { error }) => {
                        return IncarnationEnd::Retry(error.unwrap_or_else(|| {
                            ClientError::Ws("watch socket closed".to_owned())
                        }));
                    }
                    None => {
                        return IncarnationEnd::Retry(
                            ClientError::Ws("watch session ended".to_owned()),
                        );
                    }
                },
                outcome = &mut incarnation.fetcher.task => {
                    return match outcome {
                        Ok(FetchOutcome::Ended) => IncarnationEnd::ProgramEnded,
                        Ok(FetchOutcome::Closed) => IncarnationEnd::StreamEnded,
                        Ok(FetchOutcome::Failed(e)) if e.is_recoverable() => {
                            IncarnationEnd::Retry(e)
                        }
                        Ok(FetchOutcome::Failed(e)) => IncarnationEnd::Terminal(e),
                        Err(_) => IncarnationEnd::Retry(
                            ClientError::Network("message fetcher aborted".to_owned()),
                        ),
                    };
                }
            }
        }
    }

    /// Open a watch session, wait for its message-server announcement, and
    /// spawn the fetcher pair behind it.
    async fn open_incarnation(
        &self,
        ws_url: &str,
        reconnect: bool,
        from: EntryPosition,
        skip_to: Option<String>,
    ) -> Result<Incarnation, ClientError> {
        let token = self.cancel.child_token();
        match self
            .try_open(&token, ws_url, reconnect, from, skip_to)
            .await
        {
            Ok(incarnation) => Ok(incarnation),
            Err(e) => {
                token.cancel();
                Err(e)
            }
        }
    }

    async fn try_open(
        &self,
        token: &CancellationToken,
        ws_url: &str,
        reconnect: bool,
        from: EntryPosition,
        skip_to: Option<String>,
    ) -> Result<Incarnation, ClientError> {
        // Drop the previous connection's announcement: each session must
        // hand out its own message-server coordinates.
        self.ports.message_server.send_replace(None);

        let (control_tx, mut control) = mpsc::unbounded_channel();
        let start = StartWatchingData {
            reconnect,
            stream: self.options.stream.clone(),
        };
        let session = WatchSession::connect(
            ws_url,
            self.options.user_agent.as_deref(),
            start,
            Arc::clone(&self.ports),
            control_tx,
            token.child_token(),
        )
        .await?;

        let server = self.wait_for_message_server(&mut control).await?;

        let (segments_tx, segments_rx) = channel::channel::<MessageSegment>();
        let entry = EntryFetcher::spawn(
            self.http.clone(),
            server.view_uri.clone(),
            from,
            segments_tx,
            self.backward.clone(),
            token.child_token(),
        );
        let fetcher = MessageFetcher::spawn(
            self.http.clone(),
            segments_rx,
            self.messages_tx.clone(),
            skip_to,
            Arc::clone(&self.last_meta),
            token.child_token(),
        );

        Ok(Incarnation {
            token: token.clone(),
            session,
            control,
            entry,
            fetcher,
        })
    }

    async fn wait_for_message_server(
        &self,
        control: &mut mpsc::UnboundedReceiver<WatchControl>,
    ) -> Result<MessageServerData, ClientError> {
        let mut announcements = self.ports.message_server.subscribe();
        loop {
            if let Some(server) = announcements.borrow_and_update().clone() {
                return Ok(server);
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(ClientError::Abort),
                event = control.recv() => {
                    return Err(match event {
                        Some(WatchControl::Disconnect { reason }) => {
                            ClientError::Disconnect { reason }
                        }
                        Some(WatchControl::Closed { error }) => error.unwrap_or_else(|| {
                            ClientError::Ws("watch socket closed during handshake".to_owned())
                        }),
                        Some(WatchControl::Reconnect { .. }) => {
                            ClientError::Ws("server migrated during handshake".to_owned())
                        }
                        None => ClientError::Ws("watch session ended during handshake".to_owned()),
                    });
                }
                changed = announcements.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Abort);
                    }
                }
            }
        }
    }

    /// False when the caller closed during the wait.
    async fn sleep_unless_closed(&self, wait: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(wait) => true,
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Latch the terminal state on every caller-facing port.
    fn finish(&self, state: SessionState, error: Option<ClientError>) {
        match error {
            Some(e) => self.messages_tx.throw(e),
            None => self.messages_tx.close(),
        }
        self.ports.frames.close();
        self.set_state(state);
    }
}

/// Rewrite the `audience_token` query parameter for a server migration.
fn with_audience_token(url: &str, token: &str) -> Result<String, ClientError> {
    let mut parsed =
        url::Url::parse(url).map_err(|e| ClientError::Protocol(format!("watch url: {e}")))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "audience_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair("audience_token", token);
    }
    Ok(parsed.into())
}
