//! Quote estimator for posted loads.
//!
//! The deterministic skeleton is [`base_cents`]: linear in distance, scaled by
//! the equipment rate, a weight factor above the 10-tonne threshold, and the
//! urgency multiplier. On top of that, [`estimate_with`] applies a fuel
//! surcharge and a market adjustment randomized per call within fixed bands —
//! **the estimator is non-deterministic and non-idempotent**; callers must not
//! assume two calls with identical input return identical output. Randomness
//! comes in through the `Rng` parameter so tests can pin a seed.
//!
//! All money is integer cents; factor arithmetic is done in basis points to
//! keep rounding deterministic.

use fmk_schemas::{EquipmentType, Urgency};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod distance;

pub use distance::lookup_km;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Weight above this threshold starts increasing the price.
pub const WEIGHT_THRESHOLD_KG: i64 = 10_000;

/// Fallback band when a city pair is not in the table (km).
const FALLBACK_KM_MIN: u32 = 450;
const FALLBACK_KM_MAX: u32 = 2_200;

/// Fuel surcharge band, basis points of base.
const FUEL_BP_MIN: i64 = 1_200;
const FUEL_BP_MAX: i64 = 1_800;

/// Market adjustment band, basis points of base (can discount).
const MARKET_BP_MIN: i64 = -500;
const MARKET_BP_MAX: i64 = 800;

/// Tax applied on (base + fuel + market), basis points.
const TAX_BP: i64 = 1_000;

fn rate_per_km_cents(equipment: EquipmentType) -> i64 {
    match equipment {
        EquipmentType::DryVan => 120,
        EquipmentType::Flatbed => 135,
        EquipmentType::Container => 150,
        EquipmentType::Refrigerated => 180,
        EquipmentType::Tanker => 200,
    }
}

fn urgency_bp(urgency: Urgency) -> i64 {
    match urgency {
        Urgency::Standard => 10_000,
        Urgency::Express => 12_500,
        Urgency::Urgent => 15_000,
    }
}

// 1.0 up to the threshold, then +0.04 per tonne above it (pro-rated per kg).
fn weight_factor_bp(weight_kg: i64) -> i64 {
    let extra_kg = (weight_kg - WEIGHT_THRESHOLD_KG).max(0);
    10_000 + extra_kg * 400 / 1_000
}

fn apply_bp(cents: i64, bp: i64) -> i64 {
    ((cents as i128 * bp as i128) / 10_000) as i64
}

// ---------------------------------------------------------------------------
// Request / quote types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub origin_city: String,
    pub destination_city: String,
    pub weight_kg: i64,
    pub equipment: EquipmentType,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTier {
    /// "economy" | "standard" | "express"
    pub tier: String,
    pub total_cents: i64,
    pub transit_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub distance_km: u32,
    /// `true` when the pair was absent from the table and the distance is a
    /// banded pseudo-random estimate.
    pub distance_estimated: bool,
    pub base_cents: i64,
    pub fuel_surcharge_cents: i64,
    /// May be negative (soft market discount).
    pub market_adjustment_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub tiers: Vec<QuoteTier>,
}

/// Input the estimator refuses outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Weight must be strictly positive.
    InvalidWeight(i64),
    /// Origin or destination city is blank.
    BlankCity,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::InvalidWeight(kg) => write!(f, "invalid weight_kg: {kg}"),
            PricingError::BlankCity => write!(f, "origin and destination cities are required"),
        }
    }
}

impl std::error::Error for PricingError {}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Deterministic price skeleton, before any randomized terms.
///
/// Linear in `distance_km`; monotone in `weight_kg` above
/// [`WEIGHT_THRESHOLD_KG`]; scaled by equipment rate and urgency multiplier.
pub fn base_cents(
    distance_km: u32,
    weight_kg: i64,
    equipment: EquipmentType,
    urgency: Urgency,
) -> i64 {
    let raw = distance_km as i64 * rate_per_km_cents(equipment);
    let weighted = apply_bp(raw, weight_factor_bp(weight_kg));
    apply_bp(weighted, urgency_bp(urgency))
}

/// Produce a full quote, drawing the randomized terms from `rng`.
pub fn estimate_with<R: Rng>(req: &QuoteRequest, rng: &mut R) -> Result<Quote, PricingError> {
    if req.weight_kg <= 0 {
        return Err(PricingError::InvalidWeight(req.weight_kg));
    }
    if req.origin_city.trim().is_empty() || req.destination_city.trim().is_empty() {
        return Err(PricingError::BlankCity);
    }

    let (distance_km, distance_estimated) =
        match distance::lookup_km(&req.origin_city, &req.destination_city) {
            Some(km) => (km, false),
            None => (rng.gen_range(FALLBACK_KM_MIN..=FALLBACK_KM_MAX), true),
        };

    let base = base_cents(distance_km, req.weight_kg, req.equipment, req.urgency);
    let fuel = apply_bp(base, rng.gen_range(FUEL_BP_MIN..=FUEL_BP_MAX));
    let market = apply_bp(base, rng.gen_range(MARKET_BP_MIN..=MARKET_BP_MAX));
    let subtotal = base + fuel + market;
    let tax = apply_bp(subtotal, TAX_BP);
    let total = subtotal + tax;

    let base_days = distance_km / 600 + 1;
    let tiers = vec![
        QuoteTier {
            tier: "economy".to_string(),
            total_cents: apply_bp(total, 8_500),
            transit_days: base_days + 2,
        },
        QuoteTier {
            tier: "standard".to_string(),
            total_cents: total,
            transit_days: base_days,
        },
        QuoteTier {
            tier: "express".to_string(),
            total_cents: apply_bp(total, 13_000),
            transit_days: base_days.saturating_sub(1).max(1),
        },
    ];

    Ok(Quote {
        distance_km,
        distance_estimated,
        base_cents: base,
        fuel_surcharge_cents: fuel,
        market_adjustment_cents: market,
        tax_cents: tax,
        total_cents: total,
        tiers,
    })
}

/// Convenience wrapper over the process RNG.
pub fn estimate(req: &QuoteRequest) -> Result<Quote, PricingError> {
    estimate_with(req, &mut rand::thread_rng())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn req(origin: &str, dest: &str) -> QuoteRequest {
        QuoteRequest {
            origin_city: origin.to_string(),
            destination_city: dest.to_string(),
            weight_kg: 8_000,
            equipment: EquipmentType::DryVan,
            urgency: Urgency::Standard,
        }
    }

    #[test]
    fn base_is_linear_in_distance() {
        let one = base_cents(500, 8_000, EquipmentType::DryVan, Urgency::Standard);
        let two = base_cents(1_000, 8_000, EquipmentType::DryVan, Urgency::Standard);
        assert_eq!(two, one * 2);
    }

    #[test]
    fn base_is_flat_below_weight_threshold() {
        let light = base_cents(800, 1_000, EquipmentType::Flatbed, Urgency::Standard);
        let near = base_cents(800, WEIGHT_THRESHOLD_KG, EquipmentType::Flatbed, Urgency::Standard);
        assert_eq!(light, near);
    }

    #[test]
    fn base_is_monotone_above_weight_threshold() {
        let mut prev = base_cents(800, WEIGHT_THRESHOLD_KG, EquipmentType::Tanker, Urgency::Standard);
        for weight in [12_000, 15_000, 20_000, 24_000] {
            let cur = base_cents(800, weight, EquipmentType::Tanker, Urgency::Standard);
            assert!(cur > prev, "weight {weight} should cost more");
            prev = cur;
        }
    }

    #[test]
    fn urgency_multipliers_order_the_price() {
        let std_ = base_cents(700, 9_000, EquipmentType::Container, Urgency::Standard);
        let exp = base_cents(700, 9_000, EquipmentType::Container, Urgency::Express);
        let urg = base_cents(700, 9_000, EquipmentType::Container, Urgency::Urgent);
        assert!(std_ < exp && exp < urg);
        assert_eq!(urg, std_ * 3 / 2);
    }

    #[test]
    fn known_route_resolves_table_distance() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = estimate_with(&req("Casablanca", "Madrid"), &mut rng).unwrap();
        assert_eq!(q.distance_km, 1050);
        assert!(!q.distance_estimated);
    }

    #[test]
    fn unknown_route_falls_back_within_band() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = estimate_with(&req("Casablanca", "Reykjavik"), &mut rng).unwrap();
        assert!(q.distance_estimated);
        assert!((450..=2_200).contains(&q.distance_km));
    }

    #[test]
    fn same_seed_same_quote() {
        let a = estimate_with(&req("Madrid", "Barcelona"), &mut StdRng::seed_from_u64(42)).unwrap();
        let b = estimate_with(&req("Madrid", "Barcelona"), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.total_cents, b.total_cents);
        assert_eq!(a.fuel_surcharge_cents, b.fuel_surcharge_cents);
    }

    #[test]
    fn totals_add_up() {
        let q = estimate_with(&req("Madrid", "Lisbon"), &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(
            q.total_cents,
            q.base_cents + q.fuel_surcharge_cents + q.market_adjustment_cents + q.tax_cents
        );
    }

    #[test]
    fn tiers_are_ordered_economy_standard_express() {
        let q = estimate_with(&req("Madrid", "Paris"), &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(q.tiers.len(), 3);
        assert!(q.tiers[0].total_cents < q.tiers[1].total_cents);
        assert!(q.tiers[1].total_cents < q.tiers[2].total_cents);
        assert!(q.tiers[0].transit_days > q.tiers[2].transit_days);
    }

    #[test]
    fn non_positive_weight_is_refused() {
        let mut r = req("Madrid", "Paris");
        r.weight_kg = 0;
        let err = estimate_with(&r, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert_eq!(err, PricingError::InvalidWeight(0));
        r.weight_kg = -4;
        assert!(estimate_with(&r, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn blank_city_is_refused() {
        let mut r = req("", "Paris");
        r.origin_city = "  ".to_string();
        let err = estimate_with(&r, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert_eq!(err, PricingError::BlankCity);
    }
}
