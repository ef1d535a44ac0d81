//! Integration tests for the image upload flow and the user directory,
//! against stub HTTP collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};

use duochat::chat::upload::{UploadError, Uploader};
use duochat::directory::{DirectoryError, UserDirectory};
use duochat::transport::Channel;
use duochat::transport::loopback::LoopbackChannel;
use duochat_proto::identity::UserId;
use duochat_proto::message::ContentKind;

/// Starts a stub server with the given router; returns its base URL.
async fn serve(app: Router) -> (url::Url, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}").parse().unwrap(), handle)
}

fn upload_router(response: serde_json::Value, hits: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/upload",
        post(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            let response = response.clone();
            async move { Json(response) }
        }),
    )
}

fn uploader_for(base: &url::Url) -> Uploader {
    Uploader::new(reqwest::Client::new(), base.join("upload").unwrap())
}

#[tokio::test]
async fn successful_upload_sends_an_image_reference() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base, _server) = serve(upload_router(
        serde_json::json!({"success": true, "url": "http://host/uploads/images/cat.png"}),
        Arc::clone(&hits),
    ))
    .await;
    let uploader = uploader_for(&base);
    let (channel, server_end) = LoopbackChannel::create_pair(32);

    let message = uploader
        .upload_and_send(
            "cat.png",
            vec![0xff, 0xd8, 0xff],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await
        .unwrap();

    assert_eq!(message.kind, ContentKind::Image);
    assert_eq!(message.body, "http://host/uploads/images/cat.png");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The announcement went over the live channel as a normal frame.
    let frame = server_end.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["sender"], "alice");
    assert_eq!(value["receiver"], "bob");
    assert_eq!(value["message"], "http://host/uploads/images/cat.png");
    assert_eq!(value["content_type"], "image");
}

#[tokio::test]
async fn rejected_upload_sends_nothing() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base, _server) = serve(upload_router(
        serde_json::json!({"success": false}),
        Arc::clone(&hits),
    ))
    .await;
    let uploader = uploader_for(&base);
    let (channel, server_end) = LoopbackChannel::create_pair(32);

    let result = uploader
        .upload_and_send(
            "cat.png",
            vec![1, 2, 3],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await;

    assert!(matches!(result, Err(UploadError::Rejected)));
    // No partial message reached the channel.
    let nothing = tokio::time::timeout(Duration::from_millis(100), server_end.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn closed_channel_fails_fast_without_uploading() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base, _server) = serve(upload_router(
        serde_json::json!({"success": true, "url": "http://host/u/x.png"}),
        Arc::clone(&hits),
    ))
    .await;
    let uploader = uploader_for(&base);
    let (channel, _server_end) = LoopbackChannel::create_pair(32);
    channel.close().await;

    let result = uploader
        .upload_and_send(
            "x.png",
            vec![1],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await;

    assert!(matches!(result, Err(UploadError::ChannelNotReady)));
    // The readiness check happens before any bytes are transferred.
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_upload_response_is_an_error() {
    let app = Router::new().route("/upload", post(|| async { "not json" }));
    let (base, _server) = serve(app).await;
    let uploader = uploader_for(&base);
    let (channel, _server_end) = LoopbackChannel::create_pair(32);

    let result = uploader
        .upload_and_send(
            "x.png",
            vec![1],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await;
    assert!(matches!(result, Err(UploadError::Malformed(_))));
}

#[tokio::test]
async fn upload_error_status_is_surfaced() {
    let app = Router::new().route(
        "/upload",
        post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let (base, _server) = serve(app).await;
    let uploader = uploader_for(&base);
    let (channel, _server_end) = LoopbackChannel::create_pair(32);

    let result = uploader
        .upload_and_send(
            "x.png",
            vec![1],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await;
    assert!(matches!(result, Err(UploadError::Status(_))));
}

#[tokio::test]
async fn success_without_a_url_is_malformed() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base, _server) = serve(upload_router(
        serde_json::json!({"success": true}),
        hits,
    ))
    .await;
    let uploader = uploader_for(&base);
    let (channel, _server_end) = LoopbackChannel::create_pair(32);

    let result = uploader
        .upload_and_send(
            "x.png",
            vec![1],
            &UserId::new("alice"),
            &UserId::new("bob"),
            &channel,
        )
        .await;
    assert!(matches!(result, Err(UploadError::Malformed(_))));
}

// ---------------------------------------------------------------------------
// User directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn directory_lists_everyone_but_the_local_user() {
    let app = Router::new().route(
        "/auth/users",
        get(|| async {
            Json(serde_json::json!([
                {"username": "alice"},
                {"username": "bob"},
                {"username": "carol"},
            ]))
        }),
    );
    let (base, _server) = serve(app).await;

    let directory = UserDirectory::new(reqwest::Client::new(), base);
    let peers = directory.peers(&UserId::new("alice")).await.unwrap();
    assert_eq!(peers, vec![UserId::new("bob"), UserId::new("carol")]);
}

#[tokio::test]
async fn directory_malformed_body_is_an_error() {
    let app = Router::new().route("/auth/users", get(|| async { "[]]" }));
    let (base, _server) = serve(app).await;

    let directory = UserDirectory::new(reqwest::Client::new(), base);
    let result = directory.peers(&UserId::new("alice")).await;
    assert!(matches!(result, Err(DirectoryError::Malformed(_))));
}
