//! Program lifecycle: the program-ended state terminates the live sequence
//! immediately with no reconnect, and server disconnect frames map onto the
//! clean/errorful split.

use std::sync::Arc;
use std::time::Duration;

use ndgr::protocol::{
    DisconnectData, DisconnectReason, MessageServerData, NicoliveWsReceiveMessage,
    NicoliveWsSendMessage, NicolivePageData, ProgramLiveStatus,
};
use ndgr::wire::{ChunkedMessage, encode_frames};
use ndgr::{ClientError, ConnectOptions, NicoliveClient, SessionState, channel};
use ndgr_test_utils::builders::{chat_message, ended_state_message, next_entry, segment_entry};
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

async fn accept_session(watch: &MockWatchServer, view_uri: &str) -> MockWatchConn {
    let mut conn = watch.accept().await;
    match conn.expect_frame().await {
        NicoliveWsSendMessage::StartWatching(_) => {}
        other => panic!("expected startWatching, got: {other:?}"),
    }
    conn.send(&message_server(view_uri));
    conn
}

async fn next_id(rx: &channel::Receiver<ChunkedMessage>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("message channel errored")
        .map(|m| m.meta_id().unwrap_or_default().to_owned())
}

async fn wait_terminal(client: &NicoliveClient) -> SessionState {
    let mut state = client.state();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.borrow_and_update().is_terminal() {
            if state.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("no terminal state");
    let state = *client.state().borrow();
    state
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn program_ended_terminates_the_sequence_without_reconnecting() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    let s1 = format!("{}/s1", http.base_url());
    http.stage(
        "/entry?at=now",
        encode_frames(&[segment_entry(&s1), next_entry(10)]),
    );
    http.stage_pending("/entry?at=10");
    http.stage(
        "/s1",
        encode_frames(&[
            chat_message("a", 1, "a"),
            chat_message("b", 2, "b"),
            ended_state_message("ended"),
        ]),
    );

    let watch = Arc::new(MockWatchServer::start().await);
    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let _conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    let messages = client.messages();
    assert_eq!(next_id(&messages).await.as_deref(), Some("a"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("b"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("ended"));
    // The sequence ends right after the ended-state message: zero further
    // reads, not an error.
    assert_eq!(next_id(&messages).await, None);

    assert_eq!(wait_terminal(&client).await, SessionState::Disconnected);

    // No reconnect was attempted.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watch.connection_count(), 1);
}

#[tokio::test]
async fn end_program_disconnect_is_a_clean_termination() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = MockWatchServer::start().await;
    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    conn.send(&NicoliveWsReceiveMessage::Disconnect(DisconnectData {
        reason: DisconnectReason::EndProgram,
    }));

    assert_eq!(wait_terminal(&client).await, SessionState::Disconnected);
    let messages = client.messages();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), messages.recv())
            .await
            .expect("timed out")
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn errorful_disconnect_reason_surfaces_to_readers() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = Arc::new(MockWatchServer::start().await);
    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    conn.send(&NicoliveWsReceiveMessage::Disconnect(DisconnectData {
        reason: DisconnectReason::Takeover,
    }));

    assert_eq!(wait_terminal(&client).await, SessionState::Disconnected);
    let err = client.messages().recv().await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Disconnect {
            reason: DisconnectReason::Takeover
        }
    );

    // Terminal reasons do not trigger the retry schedule.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watch.connection_count(), 1);
}

#[tokio::test]
async fn caller_close_drains_without_error() {
    let http = MockMessageServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = MockWatchServer::start().await;
    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let _conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    let messages = client.messages();
    client.close().await;

    // Caller-initiated aborts end the sequence silently.
    assert_eq!(messages.recv().await.unwrap(), None);
    assert_eq!(*client.state().borrow(), SessionState::Disconnected);
}
