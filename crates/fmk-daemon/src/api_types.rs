//! Request and response types for all fmk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by tests. The only logic here is amount parsing: bid
//! amounts arrive as raw JSON so a non-numeric value (`"abc"`) becomes a 400
//! validation error, never a row.

use fmk_schemas::{EquipmentType, Urgency};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShipmentRequest {
    pub origin_city: String,
    pub origin_state: String,
    pub dest_city: String,
    pub dest_state: String,
    pub weight_kg: i64,
    pub rate_cents: i64,
    pub equipment: EquipmentType,
    pub commodity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookVehicleRequest {
    pub vehicle_id: Uuid,
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

/// `amount_cents` is raw JSON on purpose: amount validation must reject
/// non-numeric input with a 400 before anything touches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBidRequest {
    pub amount_cents: Value,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Parse a bid amount from raw JSON: an integer, or a string holding one.
/// Anything else — floats with fractions, `"abc"`, null, ≤ 0 — is refused.
pub fn parse_amount_cents(raw: &Value) -> Result<i64, ApiError> {
    let amount = match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ApiError::Validation("bid amount must be an integer number of cents".to_string()))?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            ApiError::Validation(format!("bid amount must be numeric, got {s:?}"))
        })?,
        other => {
            return Err(ApiError::Validation(format!(
                "bid amount must be numeric, got {other}"
            )))
        }
    };

    if amount <= 0 {
        return Err(ApiError::Validation(format!(
            "bid amount must be > 0, got {amount}"
        )));
    }
    Ok(amount)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidDecisionResponse {
    pub shipment: fmk_schemas::Shipment,
    pub bid: fmk_schemas::Bid,
    /// Sibling pending bids auto-rejected by this acceptance.
    pub auto_rejected: usize,
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTrackingRequest {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDriverRequest {
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub license_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignDriverVehicleRequest {
    pub vehicle_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocationRequest {
    pub lat: f64,
    pub lon: f64,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationListParams {
    #[serde(default)]
    pub unread: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub marked: u64,
    pub unread: i64,
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIssueRequest {
    pub shipment_id: Uuid,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Proof of delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePodRequest {
    pub signed_by: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub origin_city: String,
    pub destination_city: String,
    pub weight_kg: i64,
    pub equipment: EquipmentType,
    pub urgency: Urgency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_and_numeric_string_amounts_parse() {
        assert_eq!(parse_amount_cents(&json!(250_000)).unwrap(), 250_000);
        assert_eq!(parse_amount_cents(&json!("250000")).unwrap(), 250_000);
        assert_eq!(parse_amount_cents(&json!(" 42 ")).unwrap(), 42);
    }

    #[test]
    fn non_numeric_amounts_are_validation_errors() {
        for raw in [json!("abc"), json!(null), json!([1]), json!({"v": 1}), json!(12.5)] {
            let err = parse_amount_cents(&raw).unwrap_err();
            assert!(
                matches!(err, ApiError::Validation(_)),
                "{raw} should be a validation error, got {err}"
            );
        }
    }

    #[test]
    fn non_positive_amounts_are_refused() {
        for raw in [json!(0), json!(-5), json!("-100")] {
            let err = parse_amount_cents(&raw).unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "{raw}: {err}");
        }
    }
}
