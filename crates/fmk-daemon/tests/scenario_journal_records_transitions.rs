//! When a transition journal is configured, every workflow transition leaves
//! one hash-chained line, and the chain verifies after a full workflow run.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use fmk_audit::{verify_hash_chain, VerifyResult};
use fmk_daemon::{auth::JwtKeys, routes, state::AppState};
use fmk_schemas::Role;
use fmk_testkit::MemStore;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

fn token(st: &AppState, user: Uuid, role: Role) -> String {
    st.jwt
        .issue(user, role, chrono::Duration::minutes(15))
        .expect("token issue")
}

async fn call(
    st: &Arc<AppState>,
    method: &str,
    uri: &str,
    bearer: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {bearer}"));
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = match body {
        Some(b) => builder.body(axum::body::Body::from(b.to_string())).unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = routes::build_router(Arc::clone(st))
        .oneshot(req)
        .await
        .expect("oneshot failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn workflow_run_leaves_a_verifiable_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("journal.jsonl");

    let journal = fmk_audit::TransitionJournal::open(&path, true).expect("journal open");
    let st = Arc::new(
        AppState::new(Arc::new(MemStore::new()), JwtKeys::new("test-secret"))
            .with_journal(journal),
    );

    let shipper = token(&st, Uuid::new_v4(), Role::Shipper);
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);

    let (_, created) = call(
        &st,
        "POST",
        "/v1/shipments",
        &shipper,
        Some(serde_json::json!({
            "origin_city": "Madrid",
            "origin_state": "Comunidad de Madrid",
            "dest_city": "Lisbon",
            "dest_state": "Lisboa",
            "weight_kg": 9000,
            "rate_cents": 180000,
            "equipment": "dry_van",
            "commodity": "furniture"
        })),
    )
    .await;
    let sid = created["data"]["shipment_id"].as_str().unwrap().to_string();

    let (_, bid) = call(
        &st,
        "POST",
        &format!("/v1/shipments/{sid}/bids"),
        &carrier,
        Some(serde_json::json!({ "amount_cents": 170000 })),
    )
    .await;
    let bid_id = bid["data"]["bid_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &st,
        "POST",
        &format!("/v1/bids/{bid_id}/accept"),
        &shipper,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Two journalled transitions so far: posted, bid_accepted.
    let content = std::fs::read_to_string(&path).expect("read journal");
    let actions: Vec<String> = content
        .lines()
        .map(|l| {
            serde_json::from_str::<serde_json::Value>(l).unwrap()["action"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(actions, vec!["posted", "bid_accepted"]);

    match verify_hash_chain(&path).expect("verify") {
        VerifyResult::Valid { lines } => assert_eq!(lines, 2),
        VerifyResult::Broken { line, reason } => {
            panic!("chain broken at line {line}: {reason}")
        }
    }
}
