//! Integration tests for the HTTP principles client against a real local
//! endpoint.
//!
//! Each test stands up a throwaway axum server on an ephemeral port and
//! points an [`HttpPrinciplesGate`] at it, exercising the wire contract:
//! `POST /check-plan` with `{"plan": …}`, answered by
//! `{"blocked": bool, "reason": string}`.

use axum::routing::post;
use axum::{http::StatusCode, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use synapse_foundation::HttpPrinciplesGate;
use synapse_kernel::error::WorkflowError;
use synapse_kernel::principles::PrinciplesGate;

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn admitted_verdict_round_trips() {
    async fn handler(Json(body): Json<Value>) -> Json<Value> {
        // The payload must wrap the plan under "plan".
        assert!(body.get("plan").is_some(), "missing plan envelope");
        Json(json!({"blocked": false, "reason": ""}))
    }
    let base = serve(Router::new().route("/check-plan", post(handler))).await;

    let gate = HttpPrinciplesGate::new(base);
    let verdict = gate.check_plan(&json!({"id": "p1"})).await.unwrap();
    assert!(!verdict.blocked);
}

#[tokio::test]
async fn blocked_verdict_carries_the_reason() {
    async fn handler(Json(_body): Json<Value>) -> Json<Value> {
        Json(json!({"blocked": true, "reason": "touches production data"}))
    }
    let base = serve(Router::new().route("/check-plan", post(handler))).await;

    let gate = HttpPrinciplesGate::new(base);
    let verdict = gate.check_plan(&json!({"id": "p1"})).await.unwrap();
    assert!(verdict.blocked);
    assert_eq!(verdict.reason, "touches production data");
}

#[tokio::test]
async fn non_2xx_is_principles_unavailable() {
    async fn handler(Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})))
    }
    let base = serve(Router::new().route("/check-plan", post(handler))).await;

    let gate = HttpPrinciplesGate::new(base);
    let err = gate.check_plan(&json!({"id": "p1"})).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PrinciplesUnavailable(_)));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn slow_service_times_out_as_unavailable() {
    async fn handler(Json(_body): Json<Value>) -> Json<Value> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Json(json!({"blocked": false, "reason": ""}))
    }
    let base = serve(Router::new().route("/check-plan", post(handler))).await;

    let gate = HttpPrinciplesGate::new(base).with_timeout(Duration::from_millis(100));
    let err = gate.check_plan(&json!({"id": "p1"})).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PrinciplesUnavailable(_)));
}

#[tokio::test]
async fn undecodable_body_is_unavailable() {
    async fn handler(Json(_body): Json<Value>) -> String {
        "not json".to_string()
    }
    let base = serve(Router::new().route("/check-plan", post(handler))).await;

    let gate = HttpPrinciplesGate::new(base);
    let err = gate.check_plan(&json!({"id": "p1"})).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PrinciplesUnavailable(_)));
}
