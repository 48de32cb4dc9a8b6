//! Axum router and all HTTP handlers for fmk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` and the router is built
//! from bare state so the scenario tests in `tests/` can compose it directly.
//!
//! Handler shape is uniform: authenticate (extractor) → capability gate →
//! ownership check where the resource is party-scoped → workflow legality →
//! store call → side effects (tracking event, journal line, notification
//! fan-out, bus broadcast). Side effects after a committed transition are
//! fire-and-forget: failures are WARN-logged and never roll anything back.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use fmk_notify::{fan_out, MarketEvent};
use fmk_policy::{allows, Action, Decision};
use fmk_schemas::{
    CustomerUpdate, NewBid, NewCustomer, NewDriver, NewIssue, NewNotification,
    NewProofOfDelivery, NewShipment, NewTrackingEvent, NewVehicle, Place, ProofOfDeliveryUpdate,
    Role, Shipment, ShipmentStatus, ShipmentUpdate, VehicleUpdate,
};
use fmk_workflow::{apply_shipment_event, ShipmentEvent};

use crate::{
    api_types::{
        parse_amount_cents, AssignDriverVehicleRequest, BidDecisionResponse, BookVehicleRequest,
        CreateDriverRequest, CreateIssueRequest, CreatePodRequest, CreateShipmentRequest,
        DriverLocationRequest, EstimateRequest, HealthResponse, MarkAllReadResponse,
        NotificationListParams, PostTrackingRequest, SendNotificationRequest, SubmitBidRequest,
    },
    auth::AuthUser,
    error::{ApiError, DataBody},
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/shipments", post(create_shipment).get(list_shipments))
        .route("/v1/shipments/:id", get(get_shipment).put(update_shipment))
        .route("/v1/shipments/:id/cancel", post(cancel_shipment))
        .route("/v1/shipments/:id/book", post(book_vehicle))
        .route(
            "/v1/shipments/:id/bids",
            post(submit_bid).get(list_shipment_bids),
        )
        .route(
            "/v1/shipments/:id/tracking",
            post(post_tracking).get(tracking_history),
        )
        .route("/v1/shipments/:id/pod", post(create_pod).get(list_pods))
        .route("/v1/bids", get(list_my_bids))
        .route("/v1/bids/:id/accept", post(accept_bid))
        .route("/v1/bids/:id/reject", post(reject_bid))
        .route("/v1/bids/:id/withdraw", post(withdraw_bid))
        .route("/v1/pod/:id", put(update_pod))
        .route("/v1/drivers", post(create_driver).get(list_drivers))
        .route("/v1/drivers/:id/vehicle", post(assign_driver_vehicle))
        .route("/v1/drivers/:id/location", post(update_driver_location))
        .route("/v1/vehicles", post(create_vehicle).get(list_vehicles))
        .route(
            "/v1/vehicles/:id",
            get(get_vehicle).put(update_vehicle).delete(delete_vehicle),
        )
        .route("/v1/customers", post(create_customer).get(list_customers))
        .route(
            "/v1/customers/:id",
            get(get_customer).put(update_customer).delete(delete_customer),
        )
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/notifications/read-all", post(mark_all_read))
        .route("/v1/notifications/:id/read", post(mark_read))
        .route("/v1/notifications/send", post(send_notification))
        .route("/v1/issues", post(create_issue).get(list_issues))
        .route("/v1/issues/:id/resolve", post(resolve_issue))
        .route("/v1/pricing/estimate", post(estimate_price))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Capability gate; a refusal carries the gate name into the 403 body.
fn gate(role: Role, action: Action) -> Result<(), ApiError> {
    match allows(role, action) {
        Decision::Allow => Ok(()),
        Decision::Refuse { gate } => Err(ApiError::Forbidden { gate }),
    }
}

/// Row-level visibility for a single shipment.
fn can_view_shipment(s: &Shipment, user: &AuthUser) -> bool {
    match user.role {
        Role::Admin | Role::Company | Role::FleetManager => true,
        Role::Shipper => s.shipper_id == user.user_id,
        Role::Carrier => {
            s.status == ShipmentStatus::Posted || s.carrier_id == Some(user.user_id)
        }
        Role::Driver => s.shipper_id == user.user_id || s.carrier_id == Some(user.user_id),
    }
}

/// Insert fan-out rows and push them on the SSE bus. Fire-and-forget: a
/// failed insert is logged and the triggering transition stands.
async fn notify_all(st: &AppState, rows: Vec<NewNotification>) {
    for row in rows {
        match st.store.insert_notification(row).await {
            Ok(saved) => {
                let _ = st.bus.send(BusMsg::Notification(saved));
            }
            Err(err) => warn!("notification insert failed (ignored): {err}"),
        }
    }
}

/// Append a tracking event; failures are logged, the transition stands.
async fn track(st: &AppState, shipment_id: Uuid, kind: &str, description: String) {
    let res = st
        .store
        .append_tracking_event(NewTrackingEvent {
            shipment_id,
            kind: kind.to_string(),
            description,
            lat: None,
            lon: None,
        })
        .await;
    if let Err(err) = res {
        warn!(%shipment_id, "tracking append failed (ignored): {err}");
    }
}

/// Append a journal line when a journal is configured.
fn journal(st: &AppState, shipment_id: Uuid, actor: &AuthUser, action: &str, detail: serde_json::Value) {
    let Some(journal) = &st.journal else {
        return;
    };
    match journal.lock() {
        Ok(mut j) => {
            if let Err(err) = j.append(shipment_id, Some(actor.user_id), action, detail) {
                warn!(%shipment_id, "journal append failed (ignored): {err}");
            }
        }
        Err(_) => warn!("journal mutex poisoned; entry dropped"),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

pub(crate) async fn create_shipment(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::CreateShipment)?;

    if req.weight_kg <= 0 {
        return Err(ApiError::Validation(format!(
            "weight_kg must be > 0, got {}",
            req.weight_kg
        )));
    }
    if req.rate_cents <= 0 {
        return Err(ApiError::Validation(format!(
            "rate_cents must be > 0, got {}",
            req.rate_cents
        )));
    }
    if req.commodity.trim().is_empty() {
        return Err(ApiError::Validation("commodity is required".to_string()));
    }

    let shipment = st
        .store
        .create_shipment(NewShipment {
            shipper_id: user.user_id,
            origin: Place {
                city: req.origin_city,
                state: req.origin_state,
            },
            destination: Place {
                city: req.dest_city,
                state: req.dest_state,
            },
            weight_kg: req.weight_kg,
            rate_cents: req.rate_cents,
            equipment: req.equipment,
            commodity: req.commodity,
        })
        .await?;

    info!(shipment_id = %shipment.shipment_id, "shipment posted");
    track(
        &st,
        shipment.shipment_id,
        "posted",
        "shipment posted to the market".to_string(),
    )
    .await;
    journal(
        &st,
        shipment.shipment_id,
        &user,
        "posted",
        serde_json::json!({ "rate_cents": shipment.rate_cents }),
    );

    Ok((StatusCode::CREATED, Json(DataBody { data: shipment })).into_response())
}

pub(crate) async fn list_shipments(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListShipments)?;

    let scope = fmk_policy::shipment_scope(user.role, user.user_id);
    let shipments = st.store.list_shipments(scope).await?;
    Ok((StatusCode::OK, Json(DataBody { data: shipments })).into_response())
}

pub(crate) async fn get_shipment(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ViewShipment)?;

    let shipment = st
        .store
        .get_shipment(id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if !can_view_shipment(&shipment, &user) {
        return Err(ApiError::NotFound("shipment"));
    }
    Ok((StatusCode::OK, Json(DataBody { data: shipment })).into_response())
}

pub(crate) async fn update_shipment(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<ShipmentUpdate>,
) -> Result<Response, ApiError> {
    // Editing a posting is a shipper capability, same as creating one.
    gate(user.role, Action::CreateShipment)?;

    let shipment = st
        .store
        .get_shipment(id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role != Role::Admin && shipment.shipper_id != user.user_id {
        return Err(ApiError::NotFound("shipment"));
    }

    let updated = st.store.update_shipment(id, update).await?;
    Ok((StatusCode::OK, Json(DataBody { data: updated })).into_response())
}

pub(crate) async fn cancel_shipment(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::CancelShipment)?;

    let shipment = st
        .store
        .get_shipment(id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role != Role::Admin && shipment.shipper_id != user.user_id {
        return Err(ApiError::Forbidden {
            gate: "cancel_shipment",
        });
    }

    // Workflow legality first (typed error), then the guarded swap (handles
    // the race against a concurrent acceptance).
    let next = apply_shipment_event(shipment.status, &ShipmentEvent::Cancel)?;
    let updated = st
        .store
        .transition_shipment(id, shipment.status, next)
        .await?;

    info!(shipment_id = %id, "shipment cancelled");
    track(&st, id, "cancelled", "shipment cancelled by shipper".to_string()).await;
    journal(
        &st,
        id,
        &user,
        "cancelled",
        serde_json::json!({ "from": shipment.status.as_str() }),
    );
    notify_all(
        &st,
        fan_out(&MarketEvent::StatusChanged {
            shipment_id: id,
            shipper_id: updated.shipper_id,
            carrier_id: updated.carrier_id,
            from: shipment.status,
            to: next,
        }),
    )
    .await;
    let _ = st.bus.send(BusMsg::ShipmentStatus {
        shipment_id: id,
        from: shipment.status,
        to: next,
    });

    Ok((StatusCode::OK, Json(DataBody { data: updated })).into_response())
}

pub(crate) async fn book_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<BookVehicleRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::AssignVehicle)?;

    let shipment = st
        .store
        .get_shipment(id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role == Role::Carrier && shipment.carrier_id != Some(user.user_id) {
        return Err(ApiError::Forbidden {
            gate: "assign_vehicle",
        });
    }

    let vehicle = st
        .store
        .get_vehicle(req.vehicle_id)
        .await?
        .ok_or(ApiError::NotFound("vehicle"))?;
    if !vehicle.active {
        return Err(ApiError::Validation("vehicle is not active".to_string()));
    }

    let next = apply_shipment_event(
        shipment.status,
        &ShipmentEvent::VehicleAssigned {
            vehicle_id: vehicle.vehicle_id,
        },
    )?;
    let updated = st
        .store
        .transition_shipment(id, shipment.status, next)
        .await?;
    st.store.set_shipment_vehicle(id, vehicle.vehicle_id).await?;

    info!(shipment_id = %id, vehicle_id = %vehicle.vehicle_id, "vehicle booked; shipment in transit");
    track(
        &st,
        id,
        "vehicle_assigned",
        format!("vehicle {} booked onto load", vehicle.plate),
    )
    .await;
    journal(
        &st,
        id,
        &user,
        "vehicle_assigned",
        serde_json::json!({ "vehicle_id": vehicle.vehicle_id }),
    );
    notify_all(
        &st,
        fan_out(&MarketEvent::StatusChanged {
            shipment_id: id,
            shipper_id: updated.shipper_id,
            carrier_id: updated.carrier_id,
            from: shipment.status,
            to: next,
        }),
    )
    .await;
    let _ = st.bus.send(BusMsg::ShipmentStatus {
        shipment_id: id,
        from: shipment.status,
        to: next,
    });

    Ok((StatusCode::OK, Json(DataBody { data: updated })).into_response())
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

pub(crate) async fn submit_bid(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
    Json(req): Json<SubmitBidRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::SubmitBid)?;

    // Amount validation happens before any storage access: "abc" or ≤ 0 must
    // never create a row.
    let amount_cents = parse_amount_cents(&req.amount_cents)?;

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if !fmk_workflow::accepts_bids(shipment.status) {
        return Err(ApiError::Conflict(format!(
            "shipment is {}, bids are only accepted while posted",
            shipment.status.as_str()
        )));
    }

    let bid = st
        .store
        .create_bid(NewBid {
            shipment_id,
            carrier_id: user.user_id,
            amount_cents,
            notes: req.notes,
        })
        .await?;

    info!(bid_id = %bid.bid_id, %shipment_id, amount_cents, "bid submitted");
    notify_all(
        &st,
        fan_out(&MarketEvent::BidSubmitted {
            shipment_id,
            bid_id: bid.bid_id,
            shipper_id: shipment.shipper_id,
            amount_cents,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(DataBody { data: bid })).into_response())
}

pub(crate) async fn list_shipment_bids(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListBids)?;

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;

    let bids = st.store.list_bids_for_shipment(shipment_id).await?;
    // Shippers see every bid on their shipment; carriers only their own.
    let bids = match user.role {
        Role::Admin | Role::Company => bids,
        Role::Shipper if shipment.shipper_id == user.user_id => bids,
        Role::Carrier => bids
            .into_iter()
            .filter(|b| b.carrier_id == user.user_id)
            .collect(),
        _ => return Err(ApiError::Forbidden { gate: "list_bids" }),
    };

    Ok((StatusCode::OK, Json(DataBody { data: bids })).into_response())
}

pub(crate) async fn list_my_bids(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListBids)?;
    let bids = st.store.list_bids_for_carrier(user.user_id).await?;
    Ok((StatusCode::OK, Json(DataBody { data: bids })).into_response())
}

pub(crate) async fn accept_bid(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(bid_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::DecideBid)?;

    let bid = st
        .store
        .get_bid(bid_id)
        .await?
        .ok_or(ApiError::NotFound("bid"))?;
    let shipment = st
        .store
        .get_shipment(bid.shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role != Role::Admin && shipment.shipper_id != user.user_id {
        return Err(ApiError::Forbidden { gate: "decide_bid" });
    }

    // A shipment that already left `posted` is a lost race, not bad input;
    // the store swap below is what actually makes acceptance race-safe.
    apply_shipment_event(
        shipment.status,
        &ShipmentEvent::BidAccepted {
            bid_id,
            carrier_id: bid.carrier_id,
        },
    )
    .map_err(|e| ApiError::Conflict(e.to_string()))?;

    let outcome = st.store.accept_bid(bid.shipment_id, bid_id).await?;

    info!(
        shipment_id = %outcome.shipment.shipment_id,
        %bid_id,
        auto_rejected = outcome.auto_rejected.len(),
        "bid accepted; shipment assigned"
    );
    track(
        &st,
        outcome.shipment.shipment_id,
        "bid_accepted",
        "carrier assigned via bid acceptance".to_string(),
    )
    .await;
    journal(
        &st,
        outcome.shipment.shipment_id,
        &user,
        "bid_accepted",
        serde_json::json!({
            "bid_id": bid_id,
            "carrier_id": outcome.bid.carrier_id,
            "amount_cents": outcome.bid.amount_cents,
            "auto_rejected": outcome.auto_rejected.len(),
        }),
    );

    let mut rows = fan_out(&MarketEvent::BidAccepted {
        shipment_id: outcome.shipment.shipment_id,
        bid_id,
        carrier_id: outcome.bid.carrier_id,
    });
    for lost in &outcome.auto_rejected {
        rows.extend(fan_out(&MarketEvent::BidRejected {
            shipment_id: outcome.shipment.shipment_id,
            bid_id: lost.bid_id,
            carrier_id: lost.carrier_id,
            auto: true,
        }));
    }
    notify_all(&st, rows).await;
    let _ = st.bus.send(BusMsg::ShipmentStatus {
        shipment_id: outcome.shipment.shipment_id,
        from: ShipmentStatus::Posted,
        to: ShipmentStatus::Assigned,
    });

    let response = BidDecisionResponse {
        shipment: outcome.shipment,
        bid: outcome.bid,
        auto_rejected: outcome.auto_rejected.len(),
    };
    Ok((StatusCode::OK, Json(DataBody { data: response })).into_response())
}

pub(crate) async fn reject_bid(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(bid_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::DecideBid)?;

    let bid = st
        .store
        .get_bid(bid_id)
        .await?
        .ok_or(ApiError::NotFound("bid"))?;
    let shipment = st
        .store
        .get_shipment(bid.shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role != Role::Admin && shipment.shipper_id != user.user_id {
        return Err(ApiError::Forbidden { gate: "decide_bid" });
    }

    let settled = st
        .store
        .settle_bid(bid_id, fmk_schemas::BidStatus::Rejected)
        .await?;

    info!(%bid_id, "bid rejected");
    notify_all(
        &st,
        fan_out(&MarketEvent::BidRejected {
            shipment_id: settled.shipment_id,
            bid_id,
            carrier_id: settled.carrier_id,
            auto: false,
        }),
    )
    .await;

    Ok((StatusCode::OK, Json(DataBody { data: settled })).into_response())
}

pub(crate) async fn withdraw_bid(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(bid_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::WithdrawBid)?;

    let bid = st
        .store
        .get_bid(bid_id)
        .await?
        .ok_or(ApiError::NotFound("bid"))?;
    if user.role != Role::Admin && bid.carrier_id != user.user_id {
        return Err(ApiError::Forbidden {
            gate: "withdraw_bid",
        });
    }

    let settled = st
        .store
        .settle_bid(bid_id, fmk_schemas::BidStatus::Withdrawn)
        .await?;

    info!(%bid_id, "bid withdrawn");
    Ok((StatusCode::OK, Json(DataBody { data: settled })).into_response())
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

pub(crate) async fn post_tracking(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
    Json(req): Json<PostTrackingRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::PostTracking)?;

    if req.kind.trim().is_empty() {
        return Err(ApiError::Validation("tracking kind is required".to_string()));
    }

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role == Role::Carrier && shipment.carrier_id != Some(user.user_id) {
        return Err(ApiError::Forbidden {
            gate: "post_tracking",
        });
    }

    let event = st
        .store
        .append_tracking_event(NewTrackingEvent {
            shipment_id,
            kind: req.kind,
            description: req.description,
            lat: req.lat,
            lon: req.lon,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DataBody { data: event })).into_response())
}

pub(crate) async fn tracking_history(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ViewTracking)?;

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if !can_view_shipment(&shipment, &user) {
        return Err(ApiError::NotFound("shipment"));
    }

    let history = st.store.tracking_history(shipment_id).await?;
    Ok((StatusCode::OK, Json(DataBody { data: history })).into_response())
}

// ---------------------------------------------------------------------------
// Proof of delivery
// ---------------------------------------------------------------------------

pub(crate) async fn create_pod(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
    Json(req): Json<CreatePodRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::CreatePod)?;

    if req.signed_by.trim().is_empty() {
        return Err(ApiError::Validation("signed_by is required".to_string()));
    }

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if user.role == Role::Carrier && shipment.carrier_id != Some(user.user_id) {
        return Err(ApiError::Forbidden { gate: "create_pod" });
    }

    // POD drives in_transit → delivered; anything else is an illegal
    // transition surfaced before the record is written.
    let next = apply_shipment_event(shipment.status, &ShipmentEvent::DeliveryConfirmed)?;

    let pod = st
        .store
        .create_pod(NewProofOfDelivery {
            shipment_id,
            signed_by: req.signed_by,
            photo_url: req.photo_url,
            notes: req.notes,
        })
        .await?;
    let updated = st
        .store
        .transition_shipment(shipment_id, shipment.status, next)
        .await?;

    info!(%shipment_id, pod_id = %pod.pod_id, "delivery confirmed");
    track(
        &st,
        shipment_id,
        "delivered",
        format!("proof of delivery signed by {}", pod.signed_by),
    )
    .await;
    journal(
        &st,
        shipment_id,
        &user,
        "delivered",
        serde_json::json!({ "pod_id": pod.pod_id }),
    );
    notify_all(
        &st,
        fan_out(&MarketEvent::StatusChanged {
            shipment_id,
            shipper_id: updated.shipper_id,
            carrier_id: updated.carrier_id,
            from: shipment.status,
            to: next,
        }),
    )
    .await;
    let _ = st.bus.send(BusMsg::ShipmentStatus {
        shipment_id,
        from: shipment.status,
        to: next,
    });

    Ok((StatusCode::CREATED, Json(DataBody { data: pod })).into_response())
}

pub(crate) async fn list_pods(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(shipment_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ViewPod)?;

    let shipment = st
        .store
        .get_shipment(shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    if !can_view_shipment(&shipment, &user) {
        return Err(ApiError::NotFound("shipment"));
    }

    let pods = st.store.list_pods(shipment_id).await?;
    Ok((StatusCode::OK, Json(DataBody { data: pods })).into_response())
}

pub(crate) async fn update_pod(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(pod_id): Path<Uuid>,
    Json(update): Json<ProofOfDeliveryUpdate>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::UpdatePod)?;

    let pod = st.store.update_pod(pod_id, update).await?;
    Ok((StatusCode::OK, Json(DataBody { data: pod })).into_response())
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

pub(crate) async fn create_driver(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateDriverRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::CreateDriver)?;

    if req.name.trim().is_empty() || req.license_no.trim().is_empty() {
        return Err(ApiError::Validation(
            "driver name and license_no are required".to_string(),
        ));
    }

    let driver = st
        .store
        .create_driver(NewDriver {
            user_id: req.user_id,
            name: req.name,
            phone: req.phone,
            license_no: req.license_no,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DataBody { data: driver })).into_response())
}

pub(crate) async fn list_drivers(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListDrivers)?;
    let drivers = st.store.list_drivers().await?;
    Ok((StatusCode::OK, Json(DataBody { data: drivers })).into_response())
}

pub(crate) async fn assign_driver_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(driver_id): Path<Uuid>,
    Json(req): Json<AssignDriverVehicleRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::AssignDriverVehicle)?;

    let driver = st
        .store
        .assign_vehicle_to_driver(driver_id, req.vehicle_id)
        .await?;
    Ok((StatusCode::OK, Json(DataBody { data: driver })).into_response())
}

pub(crate) async fn update_driver_location(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(driver_id): Path<Uuid>,
    Json(req): Json<DriverLocationRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::UpdateDriverLocation)?;

    if !(-90.0..=90.0).contains(&req.lat) || !(-180.0..=180.0).contains(&req.lon) {
        return Err(ApiError::Validation(format!(
            "coordinates out of range: ({}, {})",
            req.lat, req.lon
        )));
    }

    // A driver may only move their own pin.
    if user.role == Role::Driver {
        let driver = st
            .store
            .get_driver(driver_id)
            .await?
            .ok_or(ApiError::NotFound("driver"))?;
        if driver.user_id != user.user_id {
            return Err(ApiError::Forbidden {
                gate: "update_driver_location",
            });
        }
    }

    let driver = st
        .store
        .update_driver_location(driver_id, req.lat, req.lon)
        .await?;
    Ok((StatusCode::OK, Json(DataBody { data: driver })).into_response())
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

pub(crate) async fn create_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewVehicle>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageVehicles)?;

    if req.plate.trim().is_empty() {
        return Err(ApiError::Validation("plate is required".to_string()));
    }
    if req.capacity_kg <= 0 {
        return Err(ApiError::Validation(format!(
            "capacity_kg must be > 0, got {}",
            req.capacity_kg
        )));
    }

    let vehicle = st.store.create_vehicle(req).await?;
    Ok((StatusCode::CREATED, Json(DataBody { data: vehicle })).into_response())
}

pub(crate) async fn list_vehicles(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListVehicles)?;
    let vehicles = st.store.list_vehicles().await?;
    Ok((StatusCode::OK, Json(DataBody { data: vehicles })).into_response())
}

pub(crate) async fn get_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListVehicles)?;
    let vehicle = st
        .store
        .get_vehicle(id)
        .await?
        .ok_or(ApiError::NotFound("vehicle"))?;
    Ok((StatusCode::OK, Json(DataBody { data: vehicle })).into_response())
}

pub(crate) async fn update_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<VehicleUpdate>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageVehicles)?;

    if let Some(capacity) = update.capacity_kg {
        if capacity <= 0 {
            return Err(ApiError::Validation(format!(
                "capacity_kg must be > 0, got {capacity}"
            )));
        }
    }

    let vehicle = st.store.update_vehicle(id, update).await?;
    Ok((StatusCode::OK, Json(DataBody { data: vehicle })).into_response())
}

pub(crate) async fn delete_vehicle(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageVehicles)?;

    if !st.store.delete_vehicle(id).await? {
        return Err(ApiError::NotFound("vehicle"));
    }
    Ok((StatusCode::OK, Json(DataBody { data: serde_json::json!({ "deleted": true }) }))
        .into_response())
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

pub(crate) async fn create_customer(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewCustomer>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageCustomers)?;

    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("customer name is required".to_string()));
    }

    let customer = st.store.create_customer(req).await?;
    Ok((StatusCode::CREATED, Json(DataBody { data: customer })).into_response())
}

pub(crate) async fn list_customers(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListCustomers)?;
    let customers = st.store.list_customers().await?;
    Ok((StatusCode::OK, Json(DataBody { data: customers })).into_response())
}

pub(crate) async fn get_customer(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListCustomers)?;
    let customer = st
        .store
        .get_customer(id)
        .await?
        .ok_or(ApiError::NotFound("customer"))?;
    Ok((StatusCode::OK, Json(DataBody { data: customer })).into_response())
}

pub(crate) async fn update_customer(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<CustomerUpdate>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageCustomers)?;
    let customer = st.store.update_customer(id, update).await?;
    Ok((StatusCode::OK, Json(DataBody { data: customer })).into_response())
}

pub(crate) async fn delete_customer(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ManageCustomers)?;

    if !st.store.delete_customer(id).await? {
        return Err(ApiError::NotFound("customer"));
    }
    Ok((StatusCode::OK, Json(DataBody { data: serde_json::json!({ "deleted": true }) }))
        .into_response())
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub(crate) async fn list_notifications(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<NotificationListParams>,
) -> Result<Response, ApiError> {
    let unread_only = params.unread.unwrap_or(false);
    let notifications = st
        .store
        .list_notifications(user.user_id, unread_only)
        .await?;
    Ok((StatusCode::OK, Json(DataBody { data: notifications })).into_response())
}

pub(crate) async fn mark_read(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    if !st.store.mark_notification_read(id, user.user_id).await? {
        return Err(ApiError::NotFound("notification"));
    }
    Ok((StatusCode::OK, Json(DataBody { data: serde_json::json!({ "read": true }) }))
        .into_response())
}

pub(crate) async fn mark_all_read(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let marked = st.store.mark_all_notifications_read(user.user_id).await?;
    let unread = st.store.unread_notification_count(user.user_id).await?;
    Ok((
        StatusCode::OK,
        Json(DataBody {
            data: MarkAllReadResponse { marked, unread },
        }),
    )
        .into_response())
}

pub(crate) async fn send_notification(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SendNotificationRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::SendNotification)?;

    let notification = st
        .store
        .insert_notification(NewNotification {
            user_id: req.user_id,
            kind: req.kind,
            title: req.title,
            body: req.body,
            entity_id: req.entity_id,
        })
        .await?;
    let _ = st.bus.send(BusMsg::Notification(notification.clone()));

    Ok((StatusCode::CREATED, Json(DataBody { data: notification })).into_response())
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

pub(crate) async fn create_issue(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateIssueRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ReportIssue)?;

    if req.description.trim().is_empty() {
        return Err(ApiError::Validation("description is required".to_string()));
    }

    let shipment = st
        .store
        .get_shipment(req.shipment_id)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    let is_party = shipment.shipper_id == user.user_id
        || shipment.carrier_id == Some(user.user_id);
    if user.role != Role::Admin && !is_party {
        return Err(ApiError::Forbidden {
            gate: "report_issue",
        });
    }

    let issue = st
        .store
        .create_issue(NewIssue {
            shipment_id: req.shipment_id,
            reported_by: user.user_id,
            description: req.description,
        })
        .await?;

    notify_all(
        &st,
        fan_out(&MarketEvent::IssueReported {
            shipment_id: shipment.shipment_id,
            issue_id: issue.issue_id,
            reported_by: user.user_id,
            shipper_id: shipment.shipper_id,
            carrier_id: shipment.carrier_id,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(DataBody { data: issue })).into_response())
}

pub(crate) async fn list_issues(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ListIssues)?;

    let scope = fmk_policy::issue_scope(user.role, user.user_id);
    let issues = st.store.list_issues(scope).await?;
    Ok((StatusCode::OK, Json(DataBody { data: issues })).into_response())
}

pub(crate) async fn resolve_issue(
    State(st): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::ResolveIssue)?;

    let issue = st.store.resolve_issue(id).await?;
    info!(issue_id = %id, "issue resolved");
    Ok((StatusCode::OK, Json(DataBody { data: issue })).into_response())
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

pub(crate) async fn estimate_price(
    State(_st): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<EstimateRequest>,
) -> Result<Response, ApiError> {
    gate(user.role, Action::EstimatePrice)?;

    let quote = fmk_pricing::estimate(&fmk_pricing::QuoteRequest {
        origin_city: req.origin_city,
        destination_city: req.destination_city,
        weight_kg: req.weight_kg,
        equipment: req.equipment,
        urgency: req.urgency,
    })
    .map_err(|e| ApiError::Validation(e.to_string()))?;

    Ok((StatusCode::OK, Json(DataBody { data: quote })).into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    _user: AuthUser,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Notification(_) => "notification",
                    BusMsg::ShipmentStatus { .. } => "shipment_status",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
