//! Backward history: pointer discovery through the entry chain, page
//! walking with oldest-first flattening, single-flight enforcement, and
//! truncated-page behavior.

use std::time::Duration;

use ndgr::protocol::{
    MessageServerData, NicoliveWsReceiveMessage, NicoliveWsSendMessage, NicolivePageData,
    ProgramLiveStatus,
};
use ndgr::wire::encode_frames;
use ndgr::{ClientError, ConnectOptions, NicoliveClient};
use ndgr_test_utils::builders::{
    backward_entry, chat_message, next_entry, packed_body, segment_entry,
};
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

/// Client connected against an entry chain whose first fetch announces the
/// given backward head.
async fn client_with_backward(
    http: &MockMessageServer,
    watch: &MockWatchServer,
    backward_head: &str,
) -> (NicoliveClient, MockWatchConn) {
    let view_uri = format!("{}/entry", http.base_url());
    let s1 = format!("{}/s1", http.base_url());
    http.stage(
        "/entry?at=now",
        encode_frames(&[
            backward_entry(Some(backward_head), None),
            segment_entry(&s1),
            next_entry(10),
        ]),
    );
    http.stage_pending("/entry?at=10");
    http.stage("/s1", encode_frames(&[chat_message("live-1", 100, "live")]));

    let page = page_data(&format!("{}?audience_token=A", watch.url()));
    let connecting = tokio::spawn(NicoliveClient::connect(page, ConnectOptions::default()));
    let conn = accept_session(watch, &view_uri).await;
    let client = connecting.await.unwrap().expect("connect failed");

    // Drain the live message so the entry fetch has certainly completed
    // (and with it, the backward discovery).
    let messages = client.messages();
    let first = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .expect("timed out")
        .unwrap()
        .unwrap();
    assert_eq!(first.meta_id(), Some("live-1"));

    (client, conn)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pages_are_flattened_oldest_first_and_single_flight_is_enforced() {
    let http = MockMessageServer::start().await;
    let watch = MockWatchServer::start().await;

    let p1 = format!("{}/back/p1", http.base_url());
    let p2 = format!("{}/back/p2", http.base_url());
    let snap2 = format!("{}/snap/p2", http.base_url());
    http.stage(
        "/back/p1",
        packed_body(
            &[chat_message("y", 3, "y"), chat_message("z", 4, "z")],
            Some(&p2),
            None,
        ),
    );
    http.stage(
        "/back/p2",
        packed_body(
            &[chat_message("w", 1, "w"), chat_message("x", 2, "x")],
            None,
            Some(&snap2),
        ),
    );

    let (client, _conn) = client_with_backward(&http, &watch, &p1).await;

    let fetch = client
        .get_backward_messages(Duration::from_millis(20), 2, false)
        .expect("backward walk should start");

    // A concurrent call while the walk is in flight is refused.
    assert!(
        client
            .get_backward_messages(Duration::from_millis(20), 2, false)
            .is_none()
    );

    let batch = fetch.join().await.unwrap();
    let ids: Vec<_> = batch
        .messages
        .iter()
        .map(|m| m.meta_id().unwrap_or_default())
        .collect();
    assert_eq!(ids, vec!["w", "x", "y", "z"]);
    assert_eq!(batch.segment_uri, None);
    assert_eq!(batch.snapshot_uri, Some(snap2));

    // The chain is exhausted: a later call has nowhere to start.
    assert!(
        client
            .get_backward_messages(Duration::from_millis(20), 2, false)
            .is_none()
    );

    client.close().await;
}

#[tokio::test]
async fn truncated_page_keeps_the_completed_prefix() {
    let http = MockMessageServer::start().await;
    let watch = MockWatchServer::start().await;

    let p1 = format!("{}/back/p1", http.base_url());
    let p2 = format!("{}/back/p2", http.base_url());
    http.stage(
        "/back/p1",
        packed_body(&[chat_message("y", 3, "y")], Some(&p2), None),
    );
    let broken = packed_body(&[chat_message("w", 1, "w")], None, None);
    http.stage("/back/p2", broken[..broken.len() - 3].to_vec());

    let (client, _conn) = client_with_backward(&http, &watch, &p1).await;

    let batch = client
        .get_backward_messages(Duration::from_millis(10), 0, false)
        .expect("backward walk should start")
        .join()
        .await
        .unwrap();
    let ids: Vec<_> = batch
        .messages
        .iter()
        .map(|m| m.meta_id().unwrap_or_default())
        .collect();
    assert_eq!(ids, vec!["y"]);
    // The pointer still references the page that failed, so a later call
    // can retry it.
    assert_eq!(batch.segment_uri, Some(p2));

    client.close().await;
}

#[tokio::test]
async fn truncated_first_page_rejects_the_walk() {
    let http = MockMessageServer::start().await;
    let watch = MockWatchServer::start().await;

    let p1 = format!("{}/back/p1", http.base_url());
    let broken = packed_body(&[chat_message("w", 1, "w")], None, None);
    http.stage("/back/p1", broken[..broken.len() - 3].to_vec());

    let (client, _conn) = client_with_backward(&http, &watch, &p1).await;

    let err = client
        .get_backward_messages(Duration::from_millis(10), 0, false)
        .expect("backward walk should start")
        .join()
        .await
        .unwrap_err();
    assert!(
        matches!(err, ClientError::Fetch { truncated: true, .. }),
        "got: {err:?}"
    );

    client.close().await;
}
