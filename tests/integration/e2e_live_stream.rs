//! End-to-end happy path: bootstrap data -> watch handshake -> entry chain
//! -> segment stream -> caller sequence. Also covers the ping/keep-seat
//! reply ordering on the watch channel.

use std::time::Duration;

use ndgr::protocol::{
    MessageServerData, NicoliveWsReceiveMessage, NicoliveWsSendMessage, NicolivePageData,
    ProgramLiveStatus, ScheduleData, SeatData,
};
use ndgr::wire::{ChunkedMessage, encode_frames};
use ndgr::{ConnectOptions, NicoliveClient, SessionState, channel};
use ndgr_test_utils::builders::{chat_message, next_entry, segment_entry};
use ndgr_test_utils::{MockMessageServer, MockWatchConn, MockWatchServer};

// ---------------------------------------------------------------------------
// Harness helpers (duplicated across suite files to keep each one
// self-contained and independently runnable).
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
        hashed_user_id: Some("a:test".to_owned()),
    })
}

/// Accept a connection, check the `startWatching` lead frame, and complete
/// the handshake with seat, schedule, and the message-server announcement.
async fn accept_session(watch: &MockWatchServer, view_uri: &str) -> MockWatchConn {
    let mut conn = watch.accept().await;
    match conn.expect_frame().await {
        NicoliveWsSendMessage::StartWatching(_) => {}
        other => panic!("expected startWatching, got: {other:?}"),
    }
    conn.send(&NicoliveWsReceiveMessage::Seat(SeatData {
        keep_interval_sec: 30,
    }));
    conn.send(&NicoliveWsReceiveMessage::Schedule(ScheduleData {
        begin: "2023-11-14T22:13:20Z".parse().unwrap(),
        end: "2023-11-14T23:13:20Z".parse().unwrap(),
    }));
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

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_delivers_segment_messages_in_order() {
    let http = MockMessageServer::start().await;
    let s1 = format!("{}/s1", http.base_url());
    http.stage(
        "/entry?at=now",
        encode_frames(&[segment_entry(&s1), next_entry(1_700_000_100)]),
    );
    http.stage_pending("/entry?at=1700000100");
    http.stage(
        "/s1",
        encode_frames(&[
            chat_message("a", 1, "first"),
            chat_message("b", 2, "second"),
            chat_message("c", 3, "third"),
        ]),
    );

    let watch = MockWatchServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    let page = page_data(&format!("{}?audience_token=A", watch.url()));

    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let _conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    assert_eq!(*client.state().borrow(), SessionState::Opened);
    // Handshake frames were processed in order, so the schedule is latched.
    let schedule = client.schedule().expect("schedule latched");
    assert_eq!(schedule.begin.timestamp(), 1_700_000_000);
    assert_eq!(
        client.message_server_data().unwrap().view_uri,
        view_uri
    );

    let messages = client.messages();
    assert_eq!(next_id(&messages).await.as_deref(), Some("a"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("b"));
    assert_eq!(next_id(&messages).await.as_deref(), Some("c"));

    // The entry chain is rearmed on a pending fetch: the sequence stays
    // open without delivering anything else.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), messages.recv())
            .await
            .is_err()
    );

    client.close().await;
    assert!(client.state().borrow().is_terminal());
}

#[tokio::test]
async fn handshake_frames_are_surfaced_to_the_caller() {
    let http = MockMessageServer::start().await;
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = MockWatchServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    let page = page_data(&format!("{}?audience_token=A", watch.url()));

    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let _conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    let frames = client.watch_frames();
    let first = frames.recv().await.unwrap().unwrap();
    assert!(matches!(first, NicoliveWsReceiveMessage::Seat(_)), "got: {first:?}");
    let second = frames.recv().await.unwrap().unwrap();
    assert!(matches!(second, NicoliveWsReceiveMessage::Schedule(_)));
    let third = frames.recv().await.unwrap().unwrap();
    assert!(matches!(third, NicoliveWsReceiveMessage::MessageServer(_)));

    client.close().await;
}

#[tokio::test]
async fn ping_is_answered_with_pong_then_keep_seat() {
    let http = MockMessageServer::start().await;
    http.stage("/entry?at=now", encode_frames(&[next_entry(10)]));
    http.stage_pending("/entry?at=10");

    let watch = MockWatchServer::start().await;
    let view_uri = format!("{}/entry", http.base_url());
    let page = page_data(&format!("{}?audience_token=A", watch.url()));

    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let mut conn = accept_session(&watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    conn.send(&NicoliveWsReceiveMessage::Ping);

    // Two frames, in exactly this order, before anything else goes out.
    assert_eq!(conn.expect_frame().await, NicoliveWsSendMessage::Pong);
    assert_eq!(conn.expect_frame().await, NicoliveWsSendMessage::KeepSeat);

    client.close().await;
}
