//! Tests for the HTTP and WebSocket surface.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use tern_codec::LabelSigner;
use tern_engine::Labeler;
use tern_store::LogStore;
use tern_types::Label;
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

use crate::LabelerServer;

const LABELER_DID: &str = "did:example:labeler";
const TEST_DID: &str = "did:foo";
const PRIVATE_KEY: &str = "c6d40ec53c689ca905036e41d8c73560777e5746d1d228fd6f9db56efed8ecaf";

const LABELS_HEADER: [u8; 15] = [
    0xa2, 0x61, 0x74, 0x67, 0x23, 0x6c, 0x61, 0x62, 0x65, 0x6c, 0x73, 0x62, 0x6f, 0x70, 0x01,
];

fn test_labeler() -> Arc<Labeler> {
    let store = Arc::new(LogStore::in_memory());
    let signer = LabelSigner::from_hex(PRIVATE_KEY).unwrap();
    Arc::new(Labeler::new(store, signer, LABELER_DID))
}

fn label(val: &str) -> Label {
    Label {
        uri: TEST_DID.to_string(),
        val: val.to_string(),
        ..Label::default()
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// -----------------------------------------------------------------------
// queryLabels
// -----------------------------------------------------------------------

async fn query_status(labeler: Arc<Labeler>, query: &str) -> (StatusCode, String) {
    let router = LabelerServer::new(labeler).into_router();
    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/xrpc/com.atproto.label.queryLabels{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_string(response).await)
}

#[tokio::test]
async fn test_query_returns_signed_labels() {
    let labeler = test_labeler();
    labeler.add_label(label("a")).unwrap();
    labeler.add_label(label("b")).unwrap();

    let (status, body) = query_status(labeler, "?uriPatterns=did%3Afoo").await;
    assert_eq!(status, StatusCode::OK);

    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let labels = parsed["labels"].as_array().unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[0]["uri"], TEST_DID);
    assert_eq!(labels[0]["src"], LABELER_DID);
    assert_eq!(labels[0]["ver"], 1);
    assert!(labels[0]["sig"]["$bytes"].is_string());
}

#[tokio::test]
async fn test_query_requires_patterns() {
    let (status, _) = query_status(test_labeler(), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_rejects_did_wildcard() {
    let (status, _) = query_status(test_labeler(), "?uriPatterns=did%3Afoo%2A").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_unsupported_at_uri_wildcard_is_distinct() {
    let (status, body) =
        query_status(test_labeler(), "?uriPatterns=at%3A%2F%2Fdid%3Afoo%2F%2A").await;
    assert_eq!(status.as_u16(), 448);
    assert!(body.contains("unsupported pattern"));
}

#[tokio::test]
async fn test_query_ignores_cursor_and_limit() {
    let labeler = test_labeler();
    labeler.add_label(label("a")).unwrap();
    let (status, body) =
        query_status(labeler, "?uriPatterns=did%3Afoo&cursor=99&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"a\""));
}

// -----------------------------------------------------------------------
// Admin ingress
// -----------------------------------------------------------------------

async fn post_label(router: &axum::Router, label: &Label) -> StatusCode {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/label")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(label).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_admin_label_statuses() {
    let labeler = test_labeler();
    let router = LabelerServer::admin_router(labeler);

    // First write changes state, the repeat is a no-op.
    assert_eq!(post_label(&router, &label("a")).await, StatusCode::CREATED);
    assert_eq!(post_label(&router, &label("a")).await, StatusCode::OK);
    // A label without a value is rejected.
    assert_eq!(
        post_label(&router, &label("")).await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let labeler = test_labeler();
    labeler.add_label(label("a")).unwrap();
    let router = LabelerServer::admin_router(labeler);

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("tern_server_highest_cursor_value 1"));
    assert!(body.contains("tern_server_write_duration_seconds_count{status=\"written\"} 1"));
}

// -----------------------------------------------------------------------
// subscribeLabels
// -----------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Spawn a real listener for WebSocket tests and return its address.
async fn spawn_server(labeler: Arc<Labeler>) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = LabelerServer::new(labeler).into_router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

/// Wait until the server side has registered `n` wake channels. Live-tail
/// tests must not write before registration or the frame is not owed.
async fn wait_for_subscribers(labeler: &Labeler, n: usize) {
    let needle = format!("tern_server_active_subscriptions_count {n}");
    for _ in 0..200 {
        if labeler.metrics().render().contains(&needle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber count never reached {n}");
}

async fn connect(addr: std::net::SocketAddr, cursor: Option<u64>) -> WsStream {
    let url = match cursor {
        Some(c) => format!(
            "ws://{addr}/xrpc/com.atproto.label.subscribeLabels?cursor={c}"
        ),
        None => format!("ws://{addr}/xrpc/com.atproto.label.subscribeLabels"),
    };
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Read the next binary frame, skipping control messages.
async fn next_frame(stream: &mut WsStream) -> Option<Vec<u8>> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for a frame")?;
        match msg {
            Ok(tungstenite::Message::Binary(data)) => return Some(data.to_vec()),
            Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_)) => {}
            Ok(tungstenite::Message::Close(_)) | Err(_) => return None,
            Ok(other) => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Decode a labels frame into `(seq, val)`.
fn parse_labels_frame(frame: &[u8]) -> (i64, String) {
    assert_eq!(&frame[..15], &LABELS_HEADER, "bad frame header");

    let mut d = minicbor::Decoder::new(&frame[15..]);
    assert_eq!(d.map().unwrap(), Some(2));
    assert_eq!(d.str().unwrap(), "seq");
    let seq = d.i64().unwrap();
    assert_eq!(d.str().unwrap(), "labels");
    assert_eq!(d.array().unwrap(), Some(1));

    let pairs = d.map().unwrap().unwrap();
    let mut val = None;
    let mut sig_len = 0;
    for _ in 0..pairs {
        match d.str().unwrap() {
            "val" => val = Some(d.str().unwrap().to_string()),
            "sig" => sig_len = d.bytes().unwrap().len(),
            "neg" => {
                d.bool().unwrap();
            }
            "ver" => {
                d.i64().unwrap();
            }
            _ => {
                d.str().unwrap();
            }
        }
    }
    assert_eq!(sig_len, 64, "frame labels must be signed");
    (seq, val.expect("label must carry a val"))
}

#[tokio::test]
async fn test_subscribe_catch_up_then_live() {
    let labeler = test_labeler();
    for val in ["a", "b", "c", "d", "e"] {
        labeler.add_label(label(val)).unwrap();
    }
    let addr = spawn_server(Arc::clone(&labeler)).await;

    // Resume from cursor 2: entries 3..=5 replay in order.
    let mut stream = connect(addr, Some(2)).await;
    for (expected_seq, expected_val) in [(3, "c"), (4, "d"), (5, "e")] {
        let frame = next_frame(&mut stream).await.unwrap();
        let (seq, val) = parse_labels_frame(&frame);
        assert_eq!(seq, expected_seq);
        assert_eq!(val, expected_val);
    }

    // A live write shows up on the open stream.
    labeler.add_label(label("f")).unwrap();
    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(parse_labels_frame(&frame), (6, "f".to_string()));
}

#[tokio::test]
async fn test_subscribe_without_cursor_is_live_only() {
    let labeler = test_labeler();
    labeler.add_label(label("old")).unwrap();
    let addr = spawn_server(Arc::clone(&labeler)).await;

    let mut stream = connect(addr, None).await;
    wait_for_subscribers(&labeler, 1).await;
    labeler.add_label(label("new")).unwrap();

    let frame = next_frame(&mut stream).await.unwrap();
    let (seq, val) = parse_labels_frame(&frame);
    assert_eq!((seq, val.as_str()), (2, "new"), "history must be skipped");
}

#[tokio::test]
async fn test_subscribe_cursor_zero_replays_everything() {
    let labeler = test_labeler();
    labeler.add_label(label("a")).unwrap();
    let addr = spawn_server(Arc::clone(&labeler)).await;

    let mut stream = connect(addr, Some(0)).await;
    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(parse_labels_frame(&frame), (1, "a".to_string()));
}

#[tokio::test]
async fn test_subscribe_cursor_zero_on_empty_store_stays_open() {
    let labeler = test_labeler();
    let addr = spawn_server(Arc::clone(&labeler)).await;

    // Cursor 0 on an empty store is not a future cursor: the stream stays
    // open and delivers the first label ever written.
    let mut stream = connect(addr, Some(0)).await;
    labeler.add_label(label("first")).unwrap();
    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(parse_labels_frame(&frame), (1, "first".to_string()));
}

#[tokio::test]
async fn test_subscribe_future_cursor() {
    let labeler = test_labeler();
    let addr = spawn_server(labeler).await;

    let mut stream = connect(addr, Some(1)).await;
    let frame = next_frame(&mut stream).await.unwrap();

    let mut expected = vec![0xa1, 0x62, 0x6f, 0x70, 0x20, 0xa1, 0x65];
    expected.extend_from_slice(b"error");
    expected.push(0x6c);
    expected.extend_from_slice(b"FutureCursor");
    assert_eq!(frame, expected);

    // Nothing follows; the server closes the stream.
    assert!(next_frame(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_subscribe_bad_cursor_rejected_before_upgrade() {
    let labeler = test_labeler();
    let addr = spawn_server(labeler).await;

    let url = format!("ws://{addr}/xrpc/com.atproto.label.subscribeLabels?cursor=nonsense");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 400);
        }
        other => panic!("expected an HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subscriber_gauge_tracks_connections() {
    let labeler = test_labeler();
    let addr = spawn_server(Arc::clone(&labeler)).await;

    let mut stream = connect(addr, None).await;
    wait_for_subscribers(&labeler, 1).await;
    labeler.add_label(label("a")).unwrap();
    next_frame(&mut stream).await.unwrap();
    assert!(labeler.metrics().render().contains("tern_server_active_subscriptions_count 1"));

    stream.send(tungstenite::Message::Close(None)).await.unwrap();
    drop(stream);
    // The server notices the close and unregisters the wake channel.
    wait_for_subscribers(&labeler, 0).await;
}
