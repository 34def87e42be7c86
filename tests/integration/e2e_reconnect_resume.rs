//! Reconnect behavior: server-directed migration with resume-and-dedup, and
//! the bounded retry schedule when the server stays unreachable.

use std::sync::Arc;
use std::time::Duration;

use ndgr::protocol::{
    MessageServerData, NicoliveWsReceiveMessage, NicoliveWsSendMessage, NicolivePageData,
    ProgramLiveStatus, ReconnectData,
};
use ndgr::wire::{ChunkedMessage, encode_frames};
use ndgr::{ClientError, ConnectOptions, NicoliveClient, SessionState, channel};
use ndgr_test_utils::builders::{chat_message, next_entry, segment_entry};
use ndgr_test_utils::{MockMessageServer, MockWatchConn, MockWatchServer};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn page_data(ws_url: &str) -> NicolivePageData {
    NicolivePageData {
        websocket_url: ws_url.to_owned(),
        live_id: "lv123".to_owned(),
        title: "test program".to_owned(),
        begin_time: 1_700_000_000,
        end_time: 1_700_003_600,
        status: ProgramLiveStatus::OnAir,
        provider_type: None,
        supplier_name: None,
        login_user: None,
        broadcaster_comment_token: None,
    }
}

fn message_server(view_uri: &str) -> NicoliveWsReceiveMessage {
    NicoliveWsReceiveMessage::MessageServer(MessageServerData {
        view_uri: view_uri.to_owned(),
        vpos_base_time: "2023-11-14T22:13:20Z".parse().unwrap(),
        hashed_user_id: None,
    })
}

/// Accept a connection, swallow `startWatching`, announce the message
/// server. Returns the connection and whether the client flagged a resumed
/// session.
async fn accept_session(watch: &MockWatchServer, view_uri: &str) -> (MockWatchConn, bool) {
    let mut conn = watch.accept().await;
    let reconnect = match conn.expect_frame().await {
        NicoliveWsSendMessage::StartWatching(data) => data.reconnect,
        other => panic!("expected startWatching, got: {other:?}"),
    };
    conn.send(&message_server(view_uri));
    (conn, reconnect)
}

async fn next_id(rx: &channel::Receiver<ChunkedMessage>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("message channel errored")
        .map(|m| m.meta_id().unwrap_or_default().to_owned())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn migration_resumes_without_duplicates_or_gaps() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    let s1 = format!("{}/s1", http.base_url());
    http.stage(
        "/entry?at=now",
        encode_frames(&[segment_entry(&s1), next_entry(700)]),
    );
    http.stage_pending("/entry?at=700");
    http.stage(
        "/s1",
        encode_frames(&[chat_message("a", 1, "a"), chat_message("b", 2, "b")]),
    );

    let watch = MockWatchServer::start().await;
    let page = page_data(&format!("{}?audience_token=A", watch.url()));

    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let (conn1, resumed) = accept_session(&watch, &view_uri).await;
    assert!(!resumed);
    let client = connecting.await.unwrap().expect("connect failed");

    let messages = client.messages();
    assert_eq!(next_id(&messages).await.as_deref(), Some("a"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("b"));

    // Migration order: restage the rearm point first so the rebuilt entry
    // fetcher (resuming at the carried-over `at`) finds the new chain, then
    // tell the client to move.
    let s1b = format!("{}/s1b", http.base_url());
    http.stage(
        "/entry?at=700",
        encode_frames(&[segment_entry(&s1b), next_entry(800)]),
    );
    http.stage_pending("/entry?at=800");
    http.stage(
        "/s1b",
        encode_frames(&[
            chat_message("b", 2, "b"),
            chat_message("c", 3, "c"),
            chat_message("d", 4, "d"),
        ]),
    );
    conn1.send(&NicoliveWsReceiveMessage::Reconnect(ReconnectData {
        audience_token: "B".to_owned(),
        wait_time_sec: 0,
    }));

    let (_conn2, resumed) = accept_session(&watch, &view_uri).await;
    assert!(resumed, "startWatching after migration must carry reconnect=true");
    assert!(
        _conn2.request_uri.contains("audience_token=B"),
        "rotated token missing from: {}",
        _conn2.request_uri
    );

    // The replayed `b` is swallowed by the resume cursor; the caller sees
    // the stream continue exactly where it left off.
    assert_eq!(next_id(&messages).await.as_deref(), Some("c"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("d"));
    assert!(
        tokio::time::timeout(Duration::from_millis(100), messages.recv())
            .await
            .is_err()
    );

    client.close().await;
}

#[tokio::test]
async fn retry_schedule_is_exhausted_then_reports_reconnect_failed() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = Arc::new(MockWatchServer::start().await);
    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let options = ConnectOptions {
        retry_delays: vec![Duration::from_millis(10); 5],
        ..ConnectOptions::default()
    };

    let connecting = tokio::spawn(NicoliveClient::connect(page, options));
    let (conn1, _) = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");
    assert_eq!(watch.connection_count(), 1);

    // Every rebuilt session now dies during the handshake: the watch server
    // stops announcing a message server and drops each connection.
    let reopens = tokio::spawn({
        let watch = Arc::clone(&watch);
        async move {
            loop {
                let mut conn = watch.accept().await;
                let _ = conn.expect_frame().await;
                conn.close();
            }
        }
    });
    conn1.close();

    let mut state = client.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !state.borrow_and_update().is_terminal() {
            state.changed().await.expect("state publisher dropped");
        }
    })
    .await
    .expect("supervisor never reached a terminal state");
    assert_eq!(*state.borrow(), SessionState::ReconnectFailed);

    // The whole retry schedule was spent: the initial session plus five
    // rebuild attempts, no more.
    assert_eq!(watch.connection_count(), 6);

    // The latched failure reaches readers of the message sequence.
    let err = client.messages().recv().await.unwrap_err();
    assert!(err.is_recoverable(), "unexpected error class: {err:?}");
    assert!(matches!(err, ClientError::Ws(_) | ClientError::Network(_)));

    reopens.abort();
}
