//! Notification fan-out rules.
//!
//! [`fan_out`] is a pure rule table: given a workflow event, it returns the
//! notification rows to insert — one per interested counter-party. Insertion
//! and delivery are the caller's problem; a failed insert must never roll back
//! the transition that triggered it (fire-and-forget, logged at WARN).
//!
//! External channels (email / SMS) are stubs that log; there is no delivery
//! guarantee and no retry anywhere in this crate.

use fmk_schemas::{NewNotification, Notification, ShipmentStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow events that notify someone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    BidSubmitted {
        shipment_id: Uuid,
        bid_id: Uuid,
        shipper_id: Uuid,
        amount_cents: i64,
    },
    BidAccepted {
        shipment_id: Uuid,
        bid_id: Uuid,
        carrier_id: Uuid,
    },
    /// `auto` marks bids rejected as a side effect of another bid's acceptance.
    BidRejected {
        shipment_id: Uuid,
        bid_id: Uuid,
        carrier_id: Uuid,
        auto: bool,
    },
    StatusChanged {
        shipment_id: Uuid,
        shipper_id: Uuid,
        carrier_id: Option<Uuid>,
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
    IssueReported {
        shipment_id: Uuid,
        issue_id: Uuid,
        reported_by: Uuid,
        shipper_id: Uuid,
        carrier_id: Option<Uuid>,
    },
}

fn cents_to_display(amount_cents: i64) -> String {
    format!("{}.{:02}", amount_cents / 100, (amount_cents % 100).abs())
}

/// The rule table: which rows get written for each event.
pub fn fan_out(event: &MarketEvent) -> Vec<NewNotification> {
    match event {
        MarketEvent::BidSubmitted {
            shipment_id,
            bid_id,
            shipper_id,
            amount_cents,
        } => vec![NewNotification {
            user_id: *shipper_id,
            kind: "bid_submitted".to_string(),
            title: "New bid on your shipment".to_string(),
            body: format!(
                "A carrier offered {} on shipment {shipment_id}",
                cents_to_display(*amount_cents)
            ),
            entity_id: Some(*bid_id),
        }],

        MarketEvent::BidAccepted {
            shipment_id,
            bid_id,
            carrier_id,
        } => vec![NewNotification {
            user_id: *carrier_id,
            kind: "bid_accepted".to_string(),
            title: "Your bid was accepted".to_string(),
            body: format!("You won shipment {shipment_id}"),
            entity_id: Some(*bid_id),
        }],

        MarketEvent::BidRejected {
            shipment_id,
            bid_id,
            carrier_id,
            auto,
        } => {
            let body = if *auto {
                format!("Shipment {shipment_id} was assigned to another carrier")
            } else {
                format!("Your bid on shipment {shipment_id} was declined")
            };
            vec![NewNotification {
                user_id: *carrier_id,
                kind: "bid_rejected".to_string(),
                title: "Bid not accepted".to_string(),
                body,
                entity_id: Some(*bid_id),
            }]
        }

        MarketEvent::StatusChanged {
            shipment_id,
            shipper_id,
            carrier_id,
            from,
            to,
        } => {
            let mut out = vec![NewNotification {
                user_id: *shipper_id,
                kind: "status_changed".to_string(),
                title: "Shipment status updated".to_string(),
                body: format!("{} → {}", from.as_str(), to.as_str()),
                entity_id: Some(*shipment_id),
            }];
            if let Some(carrier) = carrier_id {
                out.push(NewNotification {
                    user_id: *carrier,
                    kind: "status_changed".to_string(),
                    title: "Shipment status updated".to_string(),
                    body: format!("{} → {}", from.as_str(), to.as_str()),
                    entity_id: Some(*shipment_id),
                });
            }
            out
        }

        MarketEvent::IssueReported {
            shipment_id,
            issue_id,
            reported_by,
            shipper_id,
            carrier_id,
        } => {
            // Notify every party to the shipment except the reporter.
            let mut out = Vec::new();
            for party in [Some(*shipper_id), *carrier_id].into_iter().flatten() {
                if party != *reported_by {
                    out.push(NewNotification {
                        user_id: party,
                        kind: "issue_reported".to_string(),
                        title: "Issue reported on shipment".to_string(),
                        body: format!("An issue was reported on shipment {shipment_id}"),
                        entity_id: Some(*issue_id),
                    });
                }
            }
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery channels (stubs)
// ---------------------------------------------------------------------------

/// External delivery contract. Implementations must be `Send + Sync` so the
/// daemon can hold them behind a trait object.
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fire-and-forget: implementations log failures, never return them.
    fn deliver(&self, notification: &Notification);
}

/// Stub email channel: logs what would be sent.
pub struct EmailStub;

impl Channel for EmailStub {
    fn name(&self) -> &'static str {
        "email"
    }

    fn deliver(&self, n: &Notification) {
        tracing::info!(
            user_id = %n.user_id,
            kind = %n.kind,
            "email stub: would deliver '{}'",
            n.title
        );
    }
}

/// Stub SMS channel: logs what would be sent.
pub struct SmsStub;

impl Channel for SmsStub {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn deliver(&self, n: &Notification) {
        tracing::info!(
            user_id = %n.user_id,
            kind = %n.kind,
            "sms stub: would deliver '{}'",
            n.title
        );
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_submitted_notifies_the_shipper_only() {
        let shipper = Uuid::new_v4();
        let out = fan_out(&MarketEvent::BidSubmitted {
            shipment_id: Uuid::new_v4(),
            bid_id: Uuid::new_v4(),
            shipper_id: shipper,
            amount_cents: 123_450,
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_id, shipper);
        assert_eq!(out[0].kind, "bid_submitted");
        assert!(out[0].body.contains("1234.50"));
    }

    #[test]
    fn bid_decisions_notify_the_carrier() {
        let carrier = Uuid::new_v4();
        let accepted = fan_out(&MarketEvent::BidAccepted {
            shipment_id: Uuid::new_v4(),
            bid_id: Uuid::new_v4(),
            carrier_id: carrier,
        });
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].user_id, carrier);

        let rejected = fan_out(&MarketEvent::BidRejected {
            shipment_id: Uuid::new_v4(),
            bid_id: Uuid::new_v4(),
            carrier_id: carrier,
            auto: true,
        });
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].body.contains("another carrier"));
    }

    #[test]
    fn status_change_reaches_both_parties_when_assigned() {
        let shipper = Uuid::new_v4();
        let carrier = Uuid::new_v4();
        let out = fan_out(&MarketEvent::StatusChanged {
            shipment_id: Uuid::new_v4(),
            shipper_id: shipper,
            carrier_id: Some(carrier),
            from: ShipmentStatus::Assigned,
            to: ShipmentStatus::InTransit,
        });
        let users: Vec<Uuid> = out.iter().map(|n| n.user_id).collect();
        assert_eq!(users, vec![shipper, carrier]);
    }

    #[test]
    fn status_change_on_posted_shipment_reaches_shipper_only() {
        let shipper = Uuid::new_v4();
        let out = fan_out(&MarketEvent::StatusChanged {
            shipment_id: Uuid::new_v4(),
            shipper_id: shipper,
            carrier_id: None,
            from: ShipmentStatus::Posted,
            to: ShipmentStatus::Cancelled,
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_id, shipper);
    }

    #[test]
    fn issue_report_skips_the_reporter() {
        let shipper = Uuid::new_v4();
        let carrier = Uuid::new_v4();
        let out = fan_out(&MarketEvent::IssueReported {
            shipment_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            reported_by: carrier,
            shipper_id: shipper,
            carrier_id: Some(carrier),
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_id, shipper);
    }
}
