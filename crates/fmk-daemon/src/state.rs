//! Shared runtime state for fmk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The store is a trait
//! object so scenario tests can swap Postgres for the in-memory testkit store
//! without touching a single handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fmk_audit::TransitionJournal;
use fmk_db::MarketStore;
use fmk_schemas::{Notification, ShipmentStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::JwtKeys;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
/// This is the in-process stand-in for a realtime channel: the client UI
/// subscribes once and receives notification and status pushes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Notification(Notification),
    ShipmentStatus {
        shipment_id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in the health response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    /// Durable storage; Postgres in production, MemStore in tests.
    pub store: Arc<dyn MarketStore>,
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Token signing/verification.
    pub jwt: JwtKeys,
    /// Optional append-only transition journal. Journal failures are logged
    /// and never fail the request that triggered them.
    pub journal: Option<Mutex<TransitionJournal>>,
}

impl AppState {
    pub fn new(store: Arc<dyn MarketStore>, jwt: JwtKeys) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        Self {
            store,
            bus,
            build: BuildInfo {
                service: "fmk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            jwt,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: TransitionJournal) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
