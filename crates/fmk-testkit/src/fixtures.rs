//! Fixture builders. Values are arbitrary but stable; override fields at the
//! call site when a test cares about them.

use fmk_schemas::{EquipmentType, NewBid, NewDriver, NewShipment, NewVehicle, Place};
use uuid::Uuid;

pub fn posted_shipment(shipper_id: Uuid) -> NewShipment {
    NewShipment {
        shipper_id,
        origin: Place {
            city: "Casablanca".to_string(),
            state: "Casablanca-Settat".to_string(),
        },
        destination: Place {
            city: "Madrid".to_string(),
            state: "Comunidad de Madrid".to_string(),
        },
        weight_kg: 15_000,
        rate_cents: 320_000,
        equipment: EquipmentType::Refrigerated,
        commodity: "citrus".to_string(),
    }
}

pub fn sample_bid(shipment_id: Uuid, carrier_id: Uuid, amount_cents: i64) -> NewBid {
    NewBid {
        shipment_id,
        carrier_id,
        amount_cents,
        notes: Some("can pick up tomorrow".to_string()),
    }
}

pub fn sample_driver(user_id: Uuid) -> NewDriver {
    NewDriver {
        user_id,
        name: "Youssef Amrani".to_string(),
        phone: "+212600000001".to_string(),
        license_no: "DL-48213".to_string(),
    }
}

pub fn sample_vehicle(plate: &str) -> NewVehicle {
    NewVehicle {
        plate: plate.to_string(),
        equipment: EquipmentType::Refrigerated,
        capacity_kg: 24_000,
    }
}
