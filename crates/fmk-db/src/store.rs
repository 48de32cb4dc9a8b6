//! Storage boundary for the marketplace.
//!
//! This module defines **only** the store trait, its error type, and the
//! acceptance outcome. No SQL, no pool management, no in-memory fakes belong
//! here; `pg.rs` holds the Postgres implementation and fmk-testkit holds the
//! in-memory one.

use async_trait::async_trait;
use fmk_schemas::{
    Bid, BidStatus, Customer, CustomerUpdate, Driver, Issue, NewBid, NewCustomer, NewDriver,
    NewIssue, NewNotification, NewProofOfDelivery, NewShipment, NewTrackingEvent, NewVehicle,
    Notification, ProofOfDelivery, ProofOfDeliveryUpdate, RowScope, Shipment, ShipmentStatus,
    ShipmentUpdate, TrackingEvent, Vehicle, VehicleUpdate,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`MarketStore`] implementation may return.
#[derive(Debug)]
pub enum StoreError {
    /// The named entity does not exist.
    NotFound(&'static str),
    /// A conditional update lost its race or found the entity in the wrong
    /// state (e.g. the shipment left `posted` before the swap landed).
    Conflict(String),
    /// The request was rejected before touching storage.
    Invalid(String),
    /// The underlying backend failed; the message is surfaced verbatim.
    Backend(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "{what} not found"),
            StoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StoreError::Invalid(msg) => write!(f, "invalid: {msg}"),
            StoreError::Backend(err) => write!(f, "storage error: {err:#}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Backend(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Acceptance outcome
// ---------------------------------------------------------------------------

/// Everything that changed inside one atomic bid acceptance.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    /// The shipment, now `assigned` with `accepted_bid_id` set.
    pub shipment: Shipment,
    /// The winning bid, now `accepted`.
    pub bid: Bid,
    /// Sibling bids flipped `pending → rejected` in the same transaction.
    pub auto_rejected: Vec<Bid>,
}

// ---------------------------------------------------------------------------
// The store trait
// ---------------------------------------------------------------------------

/// Durable storage contract for every marketplace entity.
///
/// Implementations must be object-safe (`Arc<dyn MarketStore>` in the daemon)
/// and `Send + Sync`. Two invariants are the implementation's responsibility,
/// not the caller's:
///
/// 1. **Acceptance atomicity.** [`accept_bid`][MarketStore::accept_bid] is a
///    single atomic conditional transition: the shipment swap is guarded on
///    `status = posted`, the bid swap on `status = pending`, and sibling
///    pending bids are rejected in the same transaction. Concurrent accepts on
///    one shipment — exactly one wins; losers get [`StoreError::Conflict`].
/// 2. **Tracking is append-only.** There is no API to mutate or delete a
///    tracking event, and history is returned in recorded order.
#[async_trait]
pub trait MarketStore: Send + Sync {
    // -- shipments ---------------------------------------------------------

    async fn create_shipment(&self, new: NewShipment) -> StoreResult<Shipment>;

    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>>;

    /// List shipments visible under `scope`, newest first.
    ///
    /// `Carrier(id)` means: open `posted` shipments plus shipments assigned
    /// to that carrier (the marketplace a carrier actually sees).
    async fn list_shipments(&self, scope: RowScope) -> StoreResult<Vec<Shipment>>;

    /// Conditional status swap: `from → to`, guarded on the current status.
    ///
    /// Returns the updated shipment; [`StoreError::Conflict`] when the
    /// shipment exists but is not in `from`.
    async fn transition_shipment(
        &self,
        id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
    ) -> StoreResult<Shipment>;

    /// Edit a still-`posted` shipment. [`StoreError::Conflict`] once the
    /// shipment has left the market.
    async fn update_shipment(&self, id: Uuid, update: ShipmentUpdate) -> StoreResult<Shipment>;

    /// Record the assigned carrier's vehicle when the load starts moving.
    async fn set_shipment_vehicle(&self, id: Uuid, vehicle_id: Uuid) -> StoreResult<()>;

    // -- bids --------------------------------------------------------------

    /// Insert a `pending` bid and bump the shipment's `bid_count`.
    ///
    /// Refuses when the shipment is missing (`NotFound`) or no longer
    /// `posted` (`Conflict`).
    async fn create_bid(&self, new: NewBid) -> StoreResult<Bid>;

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>>;

    async fn list_bids_for_shipment(&self, shipment_id: Uuid) -> StoreResult<Vec<Bid>>;

    async fn list_bids_for_carrier(&self, carrier_id: Uuid) -> StoreResult<Vec<Bid>>;

    /// The atomic acceptance transition (see trait docs).
    async fn accept_bid(&self, shipment_id: Uuid, bid_id: Uuid) -> StoreResult<AcceptOutcome>;

    /// Settle a single bid `pending → rejected|withdrawn`, guarded on
    /// `pending`. Acceptance must go through [`accept_bid`][MarketStore::accept_bid].
    async fn settle_bid(&self, bid_id: Uuid, to: BidStatus) -> StoreResult<Bid>;

    // -- tracking ----------------------------------------------------------

    async fn append_tracking_event(&self, new: NewTrackingEvent) -> StoreResult<TrackingEvent>;

    /// Full history for a shipment, ordered by `recorded_at_utc` ascending.
    async fn tracking_history(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>>;

    // -- notifications -----------------------------------------------------

    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification>;

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>>;

    /// Returns `false` when the row does not exist or belongs to another user.
    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Returns the number of rows flipped unread → read.
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64>;

    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<i64>;

    // -- drivers -----------------------------------------------------------

    async fn create_driver(&self, new: NewDriver) -> StoreResult<Driver>;

    async fn list_drivers(&self) -> StoreResult<Vec<Driver>>;

    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>>;

    async fn assign_vehicle_to_driver(
        &self,
        driver_id: Uuid,
        vehicle_id: Uuid,
    ) -> StoreResult<Driver>;

    async fn update_driver_location(&self, driver_id: Uuid, lat: f64, lon: f64)
        -> StoreResult<Driver>;

    // -- vehicles ----------------------------------------------------------

    async fn create_vehicle(&self, new: NewVehicle) -> StoreResult<Vehicle>;

    async fn list_vehicles(&self) -> StoreResult<Vec<Vehicle>>;

    async fn get_vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>>;

    async fn update_vehicle(&self, id: Uuid, update: VehicleUpdate) -> StoreResult<Vehicle>;

    async fn delete_vehicle(&self, id: Uuid) -> StoreResult<bool>;

    // -- customers ---------------------------------------------------------

    async fn create_customer(&self, new: NewCustomer) -> StoreResult<Customer>;

    async fn list_customers(&self) -> StoreResult<Vec<Customer>>;

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>>;

    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> StoreResult<Customer>;

    async fn delete_customer(&self, id: Uuid) -> StoreResult<bool>;

    // -- issues ------------------------------------------------------------

    async fn create_issue(&self, new: NewIssue) -> StoreResult<Issue>;

    /// `Party(id)` scope means issues on shipments where that user is the
    /// shipper or the assigned carrier.
    async fn list_issues(&self, scope: RowScope) -> StoreResult<Vec<Issue>>;

    async fn resolve_issue(&self, id: Uuid) -> StoreResult<Issue>;

    // -- proof of delivery -------------------------------------------------

    async fn create_pod(&self, new: NewProofOfDelivery) -> StoreResult<ProofOfDelivery>;

    async fn list_pods(&self, shipment_id: Uuid) -> StoreResult<Vec<ProofOfDelivery>>;

    async fn update_pod(
        &self,
        id: Uuid,
        update: ProofOfDeliveryUpdate,
    ) -> StoreResult<ProofOfDelivery>;
}
