//! Decision-service client against the reference service and against
//! endpoints that never answer.

use assert_matches::assert_matches;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use spdash::abr::{
    BufferBasedAbr, DecisionRequest, DecisionServer, DecisionService, HttpDecisionClient,
    SessionSnapshot,
};
use spdash_common::Error;

fn request(buffer: Duration, cookie: &str) -> DecisionRequest {
    SessionSnapshot {
        next_segment: 3,
        last_quality: 1,
        last_chunk_size: 2200,
        last_chunk_start: Duration::from_millis(1500),
        last_chunk_finish: Duration::from_millis(1750),
        buffer,
        total_rebuffer: Duration::from_millis(250),
        cookie: cookie.to_string(),
    }
    .decision_request(&[400000.0, 1000000.0, 2500000.0])
}

async fn start_service() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(DecisionServer::new(BufferBasedAbr::default()).serve(listener, shutdown.clone()));
    (addr, shutdown)
}

#[tokio::test]
async fn test_decisions_follow_buffer_and_count_cookie() {
    let (addr, shutdown) = start_service().await;
    let client = HttpDecisionClient::new(addr).with_timeout(Some(Duration::from_secs(5)));

    let low = client.decide(&request(Duration::from_secs(2), "")).await.unwrap();
    assert_eq!(low.quality, 0);
    assert_eq!(low.cookie_str(), "1");

    let high = client
        .decide(&request(Duration::from_secs(30), low.cookie_str()))
        .await
        .unwrap();
    assert_eq!(high.quality, 2);
    assert_eq!(high.cookie_str(), "2");

    shutdown.cancel();
}

#[tokio::test]
async fn test_refused_connection_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = HttpDecisionClient::new(addr);
    let err = client.decide(&request(Duration::ZERO, "")).await.unwrap_err();
    assert_matches!(err, Error::DecisionUnavailable(_));
}

#[tokio::test]
async fn test_silent_service_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    // Accept and hold connections without answering.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = HttpDecisionClient::new(addr).with_timeout(Some(Duration::from_millis(100)));
    let err = client.decide(&request(Duration::ZERO, "")).await.unwrap_err();
    assert_matches!(err, Error::DecisionUnavailable(_));
}

#[test]
fn test_wire_field_names_and_units() {
    let json = serde_json::to_value(request(Duration::from_millis(8500), "")).unwrap();
    assert_eq!(json["nextChunkId"], 3);
    assert_eq!(json["lastRequest"], 2);
    assert_eq!(json["lastquality"], 1);
    assert_eq!(json["buffer"], 8.5);
    assert_eq!(json["rebufferTime"], 0.25);
    assert_eq!(json["bitrateArray"][2], 2500000.0);
    assert_eq!(json["lastChunkStartTime"], 1_500_000_000u64);
    assert_eq!(json["lastChunkFinishTime"], 1_750_000_000u64);
    assert!(json["cookie"].is_null());
}
