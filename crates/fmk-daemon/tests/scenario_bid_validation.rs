//! Bid-amount validation: bad amounts must be refused with a 400 before any
//! persistence — the store must hold no trace of them afterwards.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use fmk_daemon::{auth::JwtKeys, routes, state::AppState};
use fmk_schemas::Role;
use fmk_testkit::MemStore;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

fn make_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        Arc::new(MemStore::new()),
        JwtKeys::new("test-secret"),
    ))
}

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

async fn posted_shipment(st: &Arc<AppState>, shipper: &str) -> String {
    let (status, created) = call(
        st,
        "POST",
        "/v1/shipments",
        shipper,
        Some(serde_json::json!({
            "origin_city": "Tangier",
            "origin_state": "Tanger-Tetouan",
            "dest_city": "Seville",
            "dest_state": "Andalusia",
            "weight_kg": 8000,
            "rate_cents": 150000,
            "equipment": "dry_van",
            "commodity": "machine parts"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    created["data"]["shipment_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn string_abc_amount_is_400_and_creates_no_row() {
    let st = make_state();
    let shipper = token(&st, Uuid::new_v4(), Role::Shipper);
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);
    let sid = posted_shipment(&st, &shipper).await;

    let (status, json) = call(
        &st,
        "POST",
        &format!("/v1/shipments/{sid}/bids"),
        &carrier,
        Some(serde_json::json!({ "amount_cents": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("numeric"));

    // No row, no counter bump.
    let (_, bids) = call(
        &st,
        "GET",
        &format!("/v1/shipments/{sid}/bids"),
        &shipper,
        None,
    )
    .await;
    assert!(bids["data"].as_array().unwrap().is_empty());

    let (_, shipment) = call(&st, "GET", &format!("/v1/shipments/{sid}"), &shipper, None).await;
    assert_eq!(shipment["data"]["bid_count"], 0);
}

#[tokio::test]
async fn zero_and_negative_amounts_are_400() {
    let st = make_state();
    let shipper = token(&st, Uuid::new_v4(), Role::Shipper);
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);
    let sid = posted_shipment(&st, &shipper).await;

    for amount in [serde_json::json!(0), serde_json::json!(-500), serde_json::json!("-1")] {
        let (status, _) = call(
            &st,
            "POST",
            &format!("/v1/shipments/{sid}/bids"),
            &carrier,
            Some(serde_json::json!({ "amount_cents": amount })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "amount {amount} must be refused");
    }

    let (_, bids) = call(
        &st,
        "GET",
        &format!("/v1/shipments/{sid}/bids"),
        &shipper,
        None,
    )
    .await;
    assert!(bids["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn fractional_amount_is_400() {
    let st = make_state();
    let shipper = token(&st, Uuid::new_v4(), Role::Shipper);
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);
    let sid = posted_shipment(&st, &shipper).await;

    let (status, _) = call(
        &st,
        "POST",
        &format!("/v1/shipments/{sid}/bids"),
        &carrier,
        Some(serde_json::json!({ "amount_cents": 199.99 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "cents are integral");
}

#[tokio::test]
async fn bid_on_missing_shipment_is_404() {
    let st = make_state();
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);

    let (status, _) = call(
        &st,
        "POST",
        &format!("/v1/shipments/{}/bids", Uuid::new_v4()),
        &carrier,
        Some(serde_json::json!({ "amount_cents": 100000 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shipper_cannot_bid_on_the_market() {
    let st = make_state();
    let shipper = token(&st, Uuid::new_v4(), Role::Shipper);
    let sid = posted_shipment(&st, &shipper).await;

    let (status, json) = call(
        &st,
        "POST",
        &format!("/v1/shipments/{sid}/bids"),
        &shipper,
        Some(serde_json::json!({ "amount_cents": 100000 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["gate"], "submit_bid");
}

#[tokio::test]
async fn submission_notifies_the_shipper() {
    let st = make_state();
    let shipper_id = Uuid::new_v4();
    let shipper = token(&st, shipper_id, Role::Shipper);
    let carrier = token(&st, Uuid::new_v4(), Role::Carrier);
    let sid = posted_shipment(&st, &shipper).await;

    call(
        &st,
        "POST",
        &format!("/v1/shipments/{sid}/bids"),
        &carrier,
        Some(serde_json::json!({ "amount_cents": 145000 })),
    )
    .await;

    let (_, inbox) = call(&st, "GET", "/v1/notifications", &shipper, None).await;
    let rows = inbox["data"].as_array().unwrap();
    assert!(
        rows.iter().any(|n| n["kind"] == "bid_submitted"),
        "shipper must be told about the new bid"
    );
}
