//! Watch-channel WebSocket session.
//!
//! Opens the watch socket, sends the `startWatching` handshake, and runs a
//! single read/write loop that owns the socket. Inbound frames are parsed,
//! acted on (ping replies, schedule updates, message-server latch) and
//! surfaced to the caller-facing frame channel; migration and disconnect
//! frames become control events for the supervisor.
//!
//! Keep-alive is emitted strictly in response to server `ping` — a
//! client-driven timer is unreliable under background throttling, and the
//! server drives the cadence anyway.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ndgr_protocol::{
    CommentColor, CommentFont, CommentPosition, CommentSize, MessageServerData,
    NicoliveWsReceiveMessage, NicoliveWsSendMessage, ScheduleData, StartWatchingData,
};

use crate::channel;
use crate::error::ClientError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Decoration applied to a posted comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentOptions {
    pub color: Option<CommentColor>,
    pub size: Option<CommentSize>,
    pub position: Option<CommentPosition>,
    pub font: Option<CommentFont>,
}

/// Session-level events the supervisor reacts to.
#[derive(Debug)]
pub(crate) enum WatchControl {
    /// Server requested migration to a rotated audience token.
    Reconnect {
        audience_token: String,
        wait_time_sec: u64,
    },
    /// Terminal `disconnect` frame.
    Disconnect {
        reason: ndgr_protocol::DisconnectReason,
    },
    /// The socket closed without a disconnect frame.
    Closed { error: Option<ClientError> },
}

/// Ports a session writes into; shared across reconnects so callers keep
/// stable handles.
pub(crate) struct SharedPorts {
    pub message_server: watch::Sender<Option<MessageServerData>>,
    pub schedule: watch::Sender<Option<ScheduleData>>,
    pub frames: channel::Sender<NicoliveWsReceiveMessage>,
}

pub(crate) struct WatchSession {
    outbound: mpsc::UnboundedSender<NicoliveWsSendMessage>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl WatchSession {
    /// Connect, send `startWatching`, and start the session loop.
    pub(crate) async fn connect(
        url: &str,
        user_agent: Option<&str>,
        start: StartWatchingData,
        ports: Arc<SharedPorts>,
        control: mpsc::UnboundedSender<WatchControl>,
        cancel: CancellationToken,
    ) -> Result<Self, ClientError> {
        use tokio_tungstenite::connect_async;

        let request = build_watch_request(url, user_agent)?;
        let (mut ws, _response) = tokio::select! {
            () = cancel.cancelled() => return Err(ClientError::Abort),
            r = connect_async(request) => r.map_err(|e| ClientError::Ws(e.to_string()))?,
        };

        send_frame(&mut ws, &NicoliveWsSendMessage::StartWatching(start)).await?;
        info!(url = %url, "watch session opened");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_session_loop(ws, outbound_rx, ports, control, loop_cancel).await;
        });

        Ok(WatchSession {
            outbound,
            cancel,
            task,
        })
    }

    /// Queue a frame for transmission; frames go out in call order.
    pub(crate) fn send(&self, frame: NicoliveWsSendMessage) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Ws("watch session closed".to_owned()))
    }

    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Program-relative time in centiseconds since `base`.
pub(crate) fn compute_vpos(base: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (now - base).num_milliseconds();
    // f64 keeps round-half-away-from-zero for both signs.
    (ms as f64 / 10.0).round() as i64
}

/// Build the upgrade request, injecting a `User-Agent` when configured.
///
/// Delegates to [`tokio_tungstenite::tungstenite::client::IntoClientRequest`]
/// so all required WebSocket upgrade headers are populated first.
pub(crate) fn build_watch_request(
    url: &str,
    user_agent: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ClientError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Ws(format!("invalid watch url '{url}': {e}")))?;

    if let Some(ua) = user_agent {
        let value = ua
            .parse()
            .map_err(|_| ClientError::Ws(format!("invalid user agent: '{ua}'")))?;
        request.headers_mut().insert("User-Agent", value);
    }

    Ok(request)
}

async fn send_frame(ws: &mut WsStream, frame: &NicoliveWsSendMessage) -> Result<(), ClientError> {
    let json =
        serde_json::to_string(frame).map_err(|e| ClientError::Protocol(e.to_string()))?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| ClientError::Ws(e.to_string()))
}

async fn run_session_loop(
    mut ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<NicoliveWsSendMessage>,
    ports: Arc<SharedPorts>,
    control: mpsc::UnboundedSender<WatchControl>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = ws.close(None).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = send_frame(&mut ws, &frame).await {
                    warn!(error = %e, "watch send failed");
                    let _ = control.send(WatchControl::Closed { error: Some(e) });
                    break;
                }
            }
            inbound = ws.next() => {
                match inbound {
                    None => {
                        let _ = control.send(WatchControl::Closed { error: None });
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = control.send(WatchControl::Closed {
                            error: Some(ClientError::Ws(e.to_string())),
                        });
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<NicoliveWsReceiveMessage>(&text) {
                            Ok(frame) => {
                                if handle_frame(&mut ws, &ports, &control, frame)
                                    .await
                                    .is_break()
                                {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "unrecognized watch frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = control.send(WatchControl::Closed { error: None });
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Apply a parsed frame's internal effect, then surface it to the caller.
async fn handle_frame(
    ws: &mut WsStream,
    ports: &SharedPorts,
    control: &mpsc::UnboundedSender<WatchControl>,
    frame: NicoliveWsReceiveMessage,
) -> ControlFlow<()> {
    let shutdown = match &frame {
        NicoliveWsReceiveMessage::Ping => {
            // Reply before servicing anything else: pong first, then the
            // piggybacked seat keep-alive.
            if let Err(e) = send_frame(ws, &NicoliveWsSendMessage::Pong).await {
                warn!(error = %e, "pong failed");
            } else if let Err(e) = send_frame(ws, &NicoliveWsSendMessage::KeepSeat).await {
                warn!(error = %e, "keepSeat failed");
            }
            None
        }
        NicoliveWsReceiveMessage::Schedule(schedule) => {
            debug!(begin = %schedule.begin, end = %schedule.end, "schedule updated");
            ports.schedule.send_replace(Some(*schedule));
            None
        }
        NicoliveWsReceiveMessage::MessageServer(data) => {
            info!(view_uri = %data.view_uri, "message server announced");
            ports.message_server.send_replace(Some(data.clone()));
            None
        }
        NicoliveWsReceiveMessage::Reconnect(data) => {
            info!(wait_sec = data.wait_time_sec, "server requested migration");
            Some(WatchControl::Reconnect {
                audience_token: data.audience_token.clone(),
                wait_time_sec: data.wait_time_sec,
            })
        }
        NicoliveWsReceiveMessage::Disconnect(data) => {
            info!(reason = ?data.reason, "server disconnect");
            Some(WatchControl::Disconnect {
                reason: data.reason,
            })
        }
        _ => None,
    };

    ports.frames.enqueue(frame);
    match shutdown {
        None => ControlFlow::Continue(()),
        Some(event) => {
            let _ = control.send(event);
            let _ = ws.close(None).await;
            ControlFlow::Break(())
        }
    }
}
