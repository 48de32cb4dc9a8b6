//! Shipment and bid lifecycle state machines.
//!
//! # Design
//!
//! Every status change in the marketplace flows through [`apply_shipment_event`]
//! or [`apply_bid_event`], which enforce one invariant:
//!
//! **Legal transitions only.** An illegal event returns [`TransitionError`]
//! and leaves the caller's state untouched; handlers map it to a validation
//! failure. The store additionally guards the `posted → assigned` transition
//! with a conditional swap so that two concurrent acceptances cannot both win
//! (the check here is necessary but not sufficient under concurrency).
//!
//! # State diagram
//!
//! ```text
//!              BidAccepted          VehicleAssigned        DeliveryConfirmed
//!   Posted ─────────────► Assigned ─────────────► InTransit ─────────────► Delivered (term.)
//!     │                      │
//!     │ Cancel               │ Cancel
//!     ▼                      ▼
//!        Cancelled (term.)
//!
//!   Pending ──► Accepted | Rejected | Withdrawn   (all terminal)
//! ```

use fmk_schemas::{BidStatus, ShipmentStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events that drive shipment status transitions. Each one corresponds to an
/// explicit caller action; nothing is timed or retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShipmentEvent {
    /// The shipper accepted a bid; records the winning bid and carrier.
    BidAccepted { bid_id: Uuid, carrier_id: Uuid },
    /// A vehicle was assigned to the load; the shipment is moving.
    VehicleAssigned { vehicle_id: Uuid },
    /// Proof of delivery was submitted.
    DeliveryConfirmed,
    /// The shipper withdrew the shipment from the market.
    Cancel,
}

impl ShipmentEvent {
    /// Tracking-event kind string recorded alongside this transition.
    pub fn kind(&self) -> &'static str {
        match self {
            ShipmentEvent::BidAccepted { .. } => "bid_accepted",
            ShipmentEvent::VehicleAssigned { .. } => "vehicle_assigned",
            ShipmentEvent::DeliveryConfirmed => "delivered",
            ShipmentEvent::Cancel => "cancelled",
        }
    }
}

/// Events that drive bid status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidEvent {
    /// The shipment's shipper accepted this bid.
    Accept,
    /// The shipment's shipper rejected this bid.
    Reject,
    /// The bidding carrier withdrew the offer.
    Withdraw,
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied in the current status.
///
/// State must never change when this is returned; callers surface it as a
/// validation failure, not a server error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// Status the entity was in when the illegal event arrived.
    pub from: &'static str,
    /// Debug string of the event that was refused.
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal transition: {} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Compute the successor status for a shipment event.
///
/// # Errors
/// Returns [`TransitionError`] when the event is illegal in `from`; the
/// caller's state is untouched.
pub fn apply_shipment_event(
    from: ShipmentStatus,
    event: &ShipmentEvent,
) -> Result<ShipmentStatus, TransitionError> {
    use fmk_schemas::ShipmentStatus::*;
    use ShipmentEvent::*;

    let next = match (from, event) {
        (Posted, BidAccepted { .. }) => Assigned,
        (Assigned, VehicleAssigned { .. }) => InTransit,
        (InTransit, DeliveryConfirmed) => Delivered,

        // Cancellation is only reachable while no carrier is committed to
        // driving: posted or assigned.
        (Posted | Assigned, Cancel) => Cancelled,

        (from, event) => {
            return Err(TransitionError {
                from: from.as_str(),
                event: format!("{event:?}"),
            })
        }
    };

    Ok(next)
}

/// Compute the successor status for a bid event. `pending` is the only state
/// with outgoing edges.
pub fn apply_bid_event(from: BidStatus, event: BidEvent) -> Result<BidStatus, TransitionError> {
    let next = match (from, event) {
        (BidStatus::Pending, BidEvent::Accept) => BidStatus::Accepted,
        (BidStatus::Pending, BidEvent::Reject) => BidStatus::Rejected,
        (BidStatus::Pending, BidEvent::Withdraw) => BidStatus::Withdrawn,

        (from, event) => {
            return Err(TransitionError {
                from: from.as_str(),
                event: format!("{event:?}"),
            })
        }
    };

    Ok(next)
}

/// Statuses from which a shipment may still be cancelled.
pub fn cancellable_from(status: ShipmentStatus) -> bool {
    matches!(status, ShipmentStatus::Posted | ShipmentStatus::Assigned)
}

/// Bids may only be submitted against a shipment that is still on the market.
pub fn accepts_bids(status: ShipmentStatus) -> bool {
    matches!(status, ShipmentStatus::Posted)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(bid: Uuid, carrier: Uuid) -> ShipmentEvent {
        ShipmentEvent::BidAccepted {
            bid_id: bid,
            carrier_id: carrier,
        }
    }

    #[test]
    fn happy_path_posted_to_delivered() {
        let s = ShipmentStatus::Posted;
        let s = apply_shipment_event(s, &accepted(Uuid::new_v4(), Uuid::new_v4())).unwrap();
        assert_eq!(s, ShipmentStatus::Assigned);
        let s = apply_shipment_event(
            s,
            &ShipmentEvent::VehicleAssigned {
                vehicle_id: Uuid::new_v4(),
            },
        )
        .unwrap();
        assert_eq!(s, ShipmentStatus::InTransit);
        let s = apply_shipment_event(s, &ShipmentEvent::DeliveryConfirmed).unwrap();
        assert_eq!(s, ShipmentStatus::Delivered);
        assert!(s.is_terminal());
    }

    #[test]
    fn cancel_from_posted_and_assigned_only() {
        assert_eq!(
            apply_shipment_event(ShipmentStatus::Posted, &ShipmentEvent::Cancel).unwrap(),
            ShipmentStatus::Cancelled
        );
        assert_eq!(
            apply_shipment_event(ShipmentStatus::Assigned, &ShipmentEvent::Cancel).unwrap(),
            ShipmentStatus::Cancelled
        );
        assert!(apply_shipment_event(ShipmentStatus::InTransit, &ShipmentEvent::Cancel).is_err());
        assert!(apply_shipment_event(ShipmentStatus::Delivered, &ShipmentEvent::Cancel).is_err());
    }

    #[test]
    fn delivery_requires_in_transit() {
        let err =
            apply_shipment_event(ShipmentStatus::Posted, &ShipmentEvent::DeliveryConfirmed)
                .unwrap_err();
        assert_eq!(err.from, "posted");

        let err =
            apply_shipment_event(ShipmentStatus::Assigned, &ShipmentEvent::DeliveryConfirmed)
                .unwrap_err();
        assert_eq!(err.from, "assigned");
    }

    #[test]
    fn accepting_a_bid_requires_posted() {
        for from in [
            ShipmentStatus::Assigned,
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered,
            ShipmentStatus::Cancelled,
        ] {
            let err = apply_shipment_event(from, &accepted(Uuid::new_v4(), Uuid::new_v4()))
                .unwrap_err();
            assert_eq!(err.from, from.as_str());
        }
    }

    #[test]
    fn terminal_shipment_states_have_no_outgoing_edges() {
        let events = [
            accepted(Uuid::new_v4(), Uuid::new_v4()),
            ShipmentEvent::VehicleAssigned {
                vehicle_id: Uuid::new_v4(),
            },
            ShipmentEvent::DeliveryConfirmed,
            ShipmentEvent::Cancel,
        ];
        for from in [ShipmentStatus::Delivered, ShipmentStatus::Cancelled] {
            for ev in &events {
                assert!(apply_shipment_event(from, ev).is_err(), "{from:?} + {ev:?}");
            }
        }
    }

    #[test]
    fn bid_pending_fans_out_to_all_terminals() {
        assert_eq!(
            apply_bid_event(BidStatus::Pending, BidEvent::Accept).unwrap(),
            BidStatus::Accepted
        );
        assert_eq!(
            apply_bid_event(BidStatus::Pending, BidEvent::Reject).unwrap(),
            BidStatus::Rejected
        );
        assert_eq!(
            apply_bid_event(BidStatus::Pending, BidEvent::Withdraw).unwrap(),
            BidStatus::Withdrawn
        );
    }

    #[test]
    fn settled_bids_refuse_every_event() {
        for from in [BidStatus::Accepted, BidStatus::Rejected, BidStatus::Withdrawn] {
            for ev in [BidEvent::Accept, BidEvent::Reject, BidEvent::Withdraw] {
                let err = apply_bid_event(from, ev).unwrap_err();
                assert_eq!(err.from, from.as_str());
            }
        }
    }

    #[test]
    fn bids_only_accepted_while_posted() {
        assert!(accepts_bids(ShipmentStatus::Posted));
        assert!(!accepts_bids(ShipmentStatus::Assigned));
        assert!(!accepts_bids(ShipmentStatus::Cancelled));
    }
}
