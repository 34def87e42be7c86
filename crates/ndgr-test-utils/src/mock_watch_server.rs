// mock_watch_server: A scriptable WebSocket server speaking the
// watch-channel protocol.
//
// Each accepted connection is handed to the test as a `MockWatchConn`: the
// test reads the client's parsed outbound frames and pushes server frames
// (or a close) whenever the scenario calls for it. WebSocket-level pings
// are answered automatically.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use ndgr_protocol::{NicoliveWsReceiveMessage, NicoliveWsSendMessage};

enum Directive {
    Frame(String),
    Close,
}

/// One accepted watch connection, driven by the test.
pub struct MockWatchConn {
    /// URI of the upgrade request (path + query), so tests can assert on
    /// the audience token the client presented.
    pub request_uri: String,
    inbound: mpsc::UnboundedReceiver<NicoliveWsSendMessage>,
    directives: mpsc::UnboundedSender<Directive>,
}

impl MockWatchConn {
    /// Push a frame to the connected client.
    pub fn send(&self, frame: &NicoliveWsReceiveMessage) {
        let json = serde_json::to_string(frame).expect("serialize watch frame");
        let _ = self.directives.send(Directive::Frame(json));
    }

    /// Push raw JSON (for malformed-frame scenarios).
    pub fn send_raw(&self, json: &str) {
        let _ = self.directives.send(Directive::Frame(json.to_owned()));
    }

    /// Close the socket from the server side.
    pub fn close(&self) {
        let _ = self.directives.send(Directive::Close);
    }

    /// Next parsed frame from the client, `None` once it disconnected.
    pub async fn recv(&mut self) -> Option<NicoliveWsSendMessage> {
        self.inbound.recv().await
    }

    /// `recv` with a deadline; panics if the client stays silent.
    pub async fn expect_frame(&mut self) -> NicoliveWsSendMessage {
        tokio::time::timeout(Duration::from_secs(2), self.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client disconnected")
    }
}

pub struct MockWatchServer {
    addr: SocketAddr,
    accepted: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockWatchConn>>,
    connections: Arc<AtomicUsize>,
    /// Background accept loop; dropped with the server.
    _task: tokio::task::JoinHandle<()>,
}

impl MockWatchServer {
    /// Start the server on a random local port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock watch server");
        let addr = listener.local_addr().expect("local_addr");
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(listener, conn_tx, Arc::clone(&connections)));
        MockWatchServer {
            addr,
            accepted: tokio::sync::Mutex::new(conn_rx),
            connections,
            _task: task,
        }
    }

    /// Total TCP connections accepted so far (including failed handshakes).
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `ws://127.0.0.1:<port>/` — pass as the watch URL (append query
    /// parameters as needed).
    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Wait for the next client connection.
    pub async fn accept(&self) -> MockWatchConn {
        tokio::time::timeout(Duration::from_secs(2), async {
            self.accepted.lock().await.recv().await
        })
        .await
        .expect("timed out waiting for a connection")
        .expect("accept loop stopped")
    }
}

async fn accept_loop(
    listener: TcpListener,
    conn_tx: mpsc::UnboundedSender<MockWatchConn>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                connections.fetch_add(1, Ordering::SeqCst);
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    // Connection errors are expected in tests (clients drop
                    // mid-handshake); swallow them.
                    let _ = handle_connection(stream, conn_tx).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_tx: mpsc::UnboundedSender<MockWatchConn>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request_uri = Arc::new(Mutex::new(String::new()));
    let captured = Arc::clone(&request_uri);
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
              response: tokio_tungstenite::tungstenite::handshake::server::Response| {
            *captured.lock().expect("uri lock") = request.uri().to_string();
            Ok(response)
        },
    )
    .await?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (directive_tx, directive_rx) = mpsc::unbounded_channel();
    let conn = MockWatchConn {
        request_uri: request_uri.lock().expect("uri lock").clone(),
        inbound: inbound_rx,
        directives: directive_tx,
    };
    conn_tx.send(conn).map_err(|_| "server dropped")?;

    pump(ws, inbound_tx, directive_rx).await;
    Ok(())
}

async fn pump(
    mut ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    inbound_tx: mpsc::UnboundedSender<NicoliveWsSendMessage>,
    mut directives: mpsc::UnboundedReceiver<Directive>,
) {
    loop {
        tokio::select! {
            directive = directives.recv() => match directive {
                Some(Directive::Frame(json)) => {
                    if ws.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Some(Directive::Close) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            frame = ws.next() => match frame {
                None | Some(Err(_)) => break,
                Some(Ok(Message::Text(text))) => {
                    if let Ok(parsed) = serde_json::from_str::<NicoliveWsSendMessage>(&text) {
                        let _ = inbound_tx.send(parsed);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
