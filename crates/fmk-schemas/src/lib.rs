use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Capability class of an authenticated user. Carried in the bearer token and
/// consumed by fmk-policy for query-level authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Shipper,
    Carrier,
    Admin,
    Company,
    Driver,
    FleetManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Shipper => "shipper",
            Role::Carrier => "carrier",
            Role::Admin => "admin",
            Role::Company => "company",
            Role::Driver => "driver",
            Role::FleetManager => "fleet_manager",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shipper" => Some(Role::Shipper),
            "carrier" => Some(Role::Carrier),
            "admin" => Some(Role::Admin),
            "company" => Some(Role::Company),
            "driver" => Some(Role::Driver),
            "fleet_manager" => Some(Role::FleetManager),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Posted,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Posted => "posted",
            ShipmentStatus::Assigned => "assigned",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "posted" => Some(ShipmentStatus::Posted),
            "assigned" => Some(ShipmentStatus::Assigned),
            "in_transit" => Some(ShipmentStatus::InTransit),
            "delivered" => Some(ShipmentStatus::Delivered),
            "cancelled" => Some(ShipmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::Rejected => "rejected",
            BidStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BidStatus::Pending),
            "accepted" => Some(BidStatus::Accepted),
            "rejected" => Some(BidStatus::Rejected),
            "withdrawn" => Some(BidStatus::Withdrawn),
            _ => None,
        }
    }

    /// Every state except `pending` is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BidStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    DryVan,
    Flatbed,
    Refrigerated,
    Tanker,
    Container,
}

impl EquipmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::DryVan => "dry_van",
            EquipmentType::Flatbed => "flatbed",
            EquipmentType::Refrigerated => "refrigerated",
            EquipmentType::Tanker => "tanker",
            EquipmentType::Container => "container",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dry_van" => Some(EquipmentType::DryVan),
            "flatbed" => Some(EquipmentType::Flatbed),
            "refrigerated" => Some(EquipmentType::Refrigerated),
            "tanker" => Some(EquipmentType::Tanker),
            "container" => Some(EquipmentType::Container),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Standard,
    Express,
    Urgent,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Standard => "standard",
            Urgency::Express => "express",
            Urgency::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Urgency::Standard),
            "express" => Some(Urgency::Express),
            "urgent" => Some(Urgency::Urgent),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shipment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: Uuid,
    pub shipper_id: Uuid,
    /// Set iff the shipment has progressed past `posted` via bid acceptance.
    pub carrier_id: Option<Uuid>,
    pub origin: Place,
    pub destination: Place,
    pub weight_kg: i64,
    /// Shipper's posted rate, integer cents.
    pub rate_cents: i64,
    pub equipment: EquipmentType,
    pub commodity: String,
    pub status: ShipmentStatus,
    /// Set iff the shipment has progressed past `posted` via bid acceptance.
    pub accepted_bid_id: Option<Uuid>,
    /// Set when the carrier books a vehicle onto the load (`in_transit`).
    pub vehicle_id: Option<Uuid>,
    pub bid_count: i64,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipment {
    pub shipper_id: Uuid,
    pub origin: Place,
    pub destination: Place,
    pub weight_kg: i64,
    pub rate_cents: i64,
    pub equipment: EquipmentType,
    pub commodity: String,
}

/// Partial update; `None` fields are left untouched. Only legal while the
/// shipment is still `posted` — the store enforces this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    pub weight_kg: Option<i64>,
    pub rate_cents: Option<i64>,
    pub equipment: Option<EquipmentType>,
    pub commodity: Option<String>,
}

// ---------------------------------------------------------------------------
// Bid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub bid_id: Uuid,
    pub shipment_id: Uuid,
    pub carrier_id: Uuid,
    /// Offered amount, integer cents. Always > 0 (validated before persistence).
    pub amount_cents: i64,
    pub notes: Option<String>,
    pub status: BidStatus,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBid {
    pub shipment_id: Uuid,
    pub carrier_id: Uuid,
    pub amount_cents: i64,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// TrackingEvent — append-only
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub event_id: Uuid,
    pub shipment_id: Uuid,
    /// Short event type, e.g. "status_change", "location_update", "pickup".
    pub kind: String,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub recorded_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrackingEvent {
    pub shipment_id: Uuid,
    pub kind: String,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    /// Related entity (shipment or bid), when there is one.
    pub entity_id: Option<Uuid>,
    pub read: bool,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub entity_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Fleet: drivers and vehicles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub driver_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub license_no: String,
    pub vehicle_id: Option<Uuid>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub located_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDriver {
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub license_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: Uuid,
    pub plate: String,
    pub equipment: EquipmentType,
    pub capacity_kg: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVehicle {
    pub plate: String,
    pub equipment: EquipmentType,
    pub capacity_kg: i64,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleUpdate {
    pub plate: Option<String>,
    pub equipment: Option<EquipmentType>,
    pub capacity_kg: Option<i64>,
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Customer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: Uuid,
    pub shipment_id: Uuid,
    pub reported_by: Uuid,
    pub description: String,
    pub resolved: bool,
    pub created_at_utc: DateTime<Utc>,
    pub resolved_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub shipment_id: Uuid,
    pub reported_by: Uuid,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Proof of delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfDelivery {
    pub pod_id: Uuid,
    pub shipment_id: Uuid,
    pub signed_by: String,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProofOfDelivery {
    pub shipment_id: Uuid,
    pub signed_by: String,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
}

/// Amendment to an existing POD record; the shipment link never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProofOfDeliveryUpdate {
    pub signed_by: Option<String>,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Row scope — which rows a query may touch
// ---------------------------------------------------------------------------

/// Query-level visibility filter derived from the caller's role by fmk-policy
/// and applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowScope {
    /// No filtering (admin / company views).
    All,
    /// Rows where the given user is the shipper.
    Shipper(Uuid),
    /// Rows where the given user is the assigned carrier, plus open `posted`
    /// shipments (the marketplace a carrier bids into).
    Carrier(Uuid),
    /// Rows where the given user is either party.
    Party(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_as_str() {
        for r in [
            Role::Shipper,
            Role::Carrier,
            Role::Admin,
            Role::Company,
            Role::Driver,
            Role::FleetManager,
        ] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
        assert_eq!(Role::parse("dispatcher"), None);
    }

    #[test]
    fn shipment_status_terminality() {
        assert!(!ShipmentStatus::Posted.is_terminal());
        assert!(!ShipmentStatus::Assigned.is_terminal());
        assert!(!ShipmentStatus::InTransit.is_terminal());
        assert!(ShipmentStatus::Delivered.is_terminal());
        assert!(ShipmentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn bid_status_only_pending_is_live() {
        assert!(!BidStatus::Pending.is_terminal());
        assert!(BidStatus::Accepted.is_terminal());
        assert!(BidStatus::Rejected.is_terminal());
        assert!(BidStatus::Withdrawn.is_terminal());
    }

    #[test]
    fn status_strings_are_snake_case_on_the_wire() {
        let s = serde_json::to_string(&ShipmentStatus::InTransit).unwrap();
        assert_eq!(s, "\"in_transit\"");
        let e = serde_json::to_string(&EquipmentType::DryVan).unwrap();
        assert_eq!(e, "\"dry_van\"");
    }
}
