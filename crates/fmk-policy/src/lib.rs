//! Capability checking for the marketplace API.
//!
//! One declared table maps every API action to the roles permitted to perform
//! it; handlers call [`allows`] and refuse with the gate name on failure
//! instead of re-implementing role checks inline. Row-level visibility is a
//! separate concern: [`shipment_scope`] derives the query filter a role is
//! entitled to, and the store applies it.

use fmk_schemas::{Role, RowScope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Every privileged operation the API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateShipment,
    ListShipments,
    ViewShipment,
    CancelShipment,
    AssignVehicle,
    SubmitBid,
    ListBids,
    DecideBid,
    WithdrawBid,
    PostTracking,
    ViewTracking,
    CreateDriver,
    ListDrivers,
    AssignDriverVehicle,
    UpdateDriverLocation,
    ManageVehicles,
    ListVehicles,
    ManageCustomers,
    ListCustomers,
    ReportIssue,
    ListIssues,
    ResolveIssue,
    CreatePod,
    ViewPod,
    UpdatePod,
    SendNotification,
    EstimatePrice,
}

impl Action {
    /// Gate name surfaced in 403 responses.
    pub fn gate(&self) -> &'static str {
        match self {
            Action::CreateShipment => "create_shipment",
            Action::ListShipments => "list_shipments",
            Action::ViewShipment => "view_shipment",
            Action::CancelShipment => "cancel_shipment",
            Action::AssignVehicle => "assign_vehicle",
            Action::SubmitBid => "submit_bid",
            Action::ListBids => "list_bids",
            Action::DecideBid => "decide_bid",
            Action::WithdrawBid => "withdraw_bid",
            Action::PostTracking => "post_tracking",
            Action::ViewTracking => "view_tracking",
            Action::CreateDriver => "create_driver",
            Action::ListDrivers => "list_drivers",
            Action::AssignDriverVehicle => "assign_driver_vehicle",
            Action::UpdateDriverLocation => "update_driver_location",
            Action::ManageVehicles => "manage_vehicles",
            Action::ListVehicles => "list_vehicles",
            Action::ManageCustomers => "manage_customers",
            Action::ListCustomers => "list_customers",
            Action::ReportIssue => "report_issue",
            Action::ListIssues => "list_issues",
            Action::ResolveIssue => "resolve_issue",
            Action::CreatePod => "create_pod",
            Action::ViewPod => "view_pod",
            Action::UpdatePod => "update_pod",
            Action::SendNotification => "send_notification",
            Action::EstimatePrice => "estimate_price",
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of a capability check. A refusal carries the gate name so the
/// handler can surface which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Refuse { gate: &'static str },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

// ---------------------------------------------------------------------------
// The capability table
// ---------------------------------------------------------------------------

use fmk_schemas::Role::*;

/// The single source of truth: which roles may perform each action.
/// Admin is implicitly allowed everything and is omitted from the rows.
fn allowed_roles(action: Action) -> &'static [Role] {
    match action {
        Action::CreateShipment => &[Shipper],
        Action::ListShipments => &[Shipper, Carrier, Company, FleetManager],
        Action::ViewShipment => &[Shipper, Carrier, Company, Driver, FleetManager],
        Action::CancelShipment => &[Shipper],
        Action::AssignVehicle => &[Carrier, FleetManager],
        Action::SubmitBid => &[Carrier],
        Action::ListBids => &[Shipper, Carrier],
        Action::DecideBid => &[Shipper],
        Action::WithdrawBid => &[Carrier],
        Action::PostTracking => &[Carrier, Driver],
        Action::ViewTracking => &[Shipper, Carrier, Company, Driver, FleetManager],
        Action::CreateDriver => &[FleetManager],
        Action::ListDrivers => &[Company, FleetManager],
        Action::AssignDriverVehicle => &[FleetManager],
        Action::UpdateDriverLocation => &[Driver, FleetManager],
        Action::ManageVehicles => &[FleetManager],
        Action::ListVehicles => &[Company, Carrier, FleetManager],
        Action::ManageCustomers => &[Company],
        Action::ListCustomers => &[Company],
        Action::ReportIssue => &[Shipper, Carrier, Driver],
        Action::ListIssues => &[Shipper, Carrier, Company],
        Action::ResolveIssue => &[Company],
        Action::CreatePod => &[Carrier, Driver],
        Action::ViewPod => &[Shipper, Carrier, Company, Driver],
        Action::UpdatePod => &[Carrier, Driver],
        Action::SendNotification => &[],
        Action::EstimatePrice => &[Shipper, Carrier, Company, FleetManager],
    }
}

/// Capability check: may `role` perform `action`?
pub fn allows(role: Role, action: Action) -> Decision {
    if role == Admin || allowed_roles(action).contains(&role) {
        Decision::Allow
    } else {
        Decision::Refuse {
            gate: action.gate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Row scope
// ---------------------------------------------------------------------------

/// Which shipment rows a caller may see. Back-office roles see everything,
/// market participants see their side of the relationship.
pub fn shipment_scope(role: Role, user_id: Uuid) -> RowScope {
    match role {
        Admin | Company | FleetManager => RowScope::All,
        Shipper => RowScope::Shipper(user_id),
        Carrier => RowScope::Carrier(user_id),
        Driver => RowScope::Party(user_id),
    }
}

/// Which issue rows a caller may see.
pub fn issue_scope(role: Role, user_id: Uuid) -> RowScope {
    match role {
        Admin | Company => RowScope::All,
        _ => RowScope::Party(user_id),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_passes_every_gate() {
        for action in [
            Action::CreateShipment,
            Action::DecideBid,
            Action::ManageVehicles,
            Action::SendNotification,
            Action::ResolveIssue,
        ] {
            assert!(allows(Admin, action).is_allowed(), "{action:?}");
        }
    }

    #[test]
    fn shipper_cannot_bid_carrier_cannot_decide() {
        // The two sides of the marketplace must not cross.
        assert_eq!(
            allows(Shipper, Action::SubmitBid),
            Decision::Refuse { gate: "submit_bid" }
        );
        assert_eq!(
            allows(Carrier, Action::DecideBid),
            Decision::Refuse { gate: "decide_bid" }
        );
    }

    #[test]
    fn only_shipper_creates_and_cancels_shipments() {
        assert!(allows(Shipper, Action::CreateShipment).is_allowed());
        for r in [Carrier, Company, Driver, FleetManager] {
            assert!(!allows(r, Action::CreateShipment).is_allowed(), "{r:?}");
            assert!(!allows(r, Action::CancelShipment).is_allowed(), "{r:?}");
        }
    }

    #[test]
    fn send_notification_is_admin_only() {
        for r in [Shipper, Carrier, Company, Driver, FleetManager] {
            assert!(!allows(r, Action::SendNotification).is_allowed(), "{r:?}");
        }
        assert!(allows(Admin, Action::SendNotification).is_allowed());
    }

    #[test]
    fn fleet_actions_are_fleet_manager_territory() {
        assert!(allows(FleetManager, Action::CreateDriver).is_allowed());
        assert!(allows(FleetManager, Action::ManageVehicles).is_allowed());
        assert!(!allows(Carrier, Action::CreateDriver).is_allowed());
        assert!(!allows(Driver, Action::ManageVehicles).is_allowed());
    }

    #[test]
    fn refusal_names_the_gate() {
        match allows(Driver, Action::CreateShipment) {
            Decision::Refuse { gate } => assert_eq!(gate, "create_shipment"),
            Decision::Allow => panic!("driver must not create shipments"),
        }
    }

    #[test]
    fn scopes_follow_the_relationship() {
        let uid = Uuid::new_v4();
        assert_eq!(shipment_scope(Admin, uid), RowScope::All);
        assert_eq!(shipment_scope(Shipper, uid), RowScope::Shipper(uid));
        assert_eq!(shipment_scope(Carrier, uid), RowScope::Carrier(uid));
        assert_eq!(shipment_scope(Driver, uid), RowScope::Party(uid));
    }
}
