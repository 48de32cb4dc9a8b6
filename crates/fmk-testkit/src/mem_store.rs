//! Deterministic in-memory [`MarketStore`] for scenario tests.
//!
//! One mutex guards all tables, so every multi-row operation — in particular
//! bid acceptance — is atomic exactly like the Postgres transaction it stands
//! in for: the shipment swap is guarded on `posted`, the bid swap on
//! `pending`, and sibling pending bids are rejected inside the same critical
//! section. No I/O, no randomness beyond v4 ids.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use fmk_db::store::{AcceptOutcome, MarketStore, StoreError, StoreResult};
use fmk_schemas::{
    Bid, BidStatus, Customer, CustomerUpdate, Driver, Issue, NewBid, NewCustomer, NewDriver,
    NewIssue, NewNotification, NewProofOfDelivery, NewShipment, NewTrackingEvent, NewVehicle,
    Notification, ProofOfDelivery, ProofOfDeliveryUpdate, RowScope, Shipment, ShipmentStatus,
    ShipmentUpdate, TrackingEvent, Vehicle, VehicleUpdate,
};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    shipments: HashMap<Uuid, Shipment>,
    bids: HashMap<Uuid, Bid>,
    tracking: Vec<TrackingEvent>,
    notifications: HashMap<Uuid, Notification>,
    drivers: HashMap<Uuid, Driver>,
    vehicles: HashMap<Uuid, Vehicle>,
    customers: HashMap<Uuid, Customer>,
    issues: HashMap<Uuid, Issue>,
    pods: HashMap<Uuid, ProofOfDelivery>,
}

/// In-memory store; a keyed table per entity, one lock over all of them.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("mem store mutex poisoned")))
    }
}

fn newest_first<T, F: Fn(&T) -> chrono::DateTime<Utc>>(mut rows: Vec<T>, key: F) -> Vec<T> {
    rows.sort_by_key(|r| std::cmp::Reverse(key(r)));
    rows
}

#[async_trait]
impl MarketStore for MemStore {
    // -- shipments ---------------------------------------------------------

    async fn create_shipment(&self, new: NewShipment) -> StoreResult<Shipment> {
        if new.weight_kg <= 0 {
            return Err(StoreError::Invalid(format!(
                "weight_kg must be > 0, got {}",
                new.weight_kg
            )));
        }
        if new.rate_cents <= 0 {
            return Err(StoreError::Invalid(format!(
                "rate_cents must be > 0, got {}",
                new.rate_cents
            )));
        }

        let now = Utc::now();
        let shipment = Shipment {
            shipment_id: Uuid::new_v4(),
            shipper_id: new.shipper_id,
            carrier_id: None,
            origin: new.origin,
            destination: new.destination,
            weight_kg: new.weight_kg,
            rate_cents: new.rate_cents,
            equipment: new.equipment,
            commodity: new.commodity,
            status: ShipmentStatus::Posted,
            accepted_bid_id: None,
            vehicle_id: None,
            bid_count: 0,
            created_at_utc: now,
            updated_at_utc: now,
        };

        self.tables()?
            .shipments
            .insert(shipment.shipment_id, shipment.clone());
        Ok(shipment)
    }

    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        Ok(self.tables()?.shipments.get(&id).cloned())
    }

    async fn list_shipments(&self, scope: RowScope) -> StoreResult<Vec<Shipment>> {
        let t = self.tables()?;
        let rows: Vec<Shipment> = t
            .shipments
            .values()
            .filter(|s| match scope {
                RowScope::All => true,
                RowScope::Shipper(uid) => s.shipper_id == uid,
                RowScope::Carrier(uid) => {
                    s.status == ShipmentStatus::Posted || s.carrier_id == Some(uid)
                }
                RowScope::Party(uid) => s.shipper_id == uid || s.carrier_id == Some(uid),
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |s| s.created_at_utc))
    }

    async fn transition_shipment(
        &self,
        id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
    ) -> StoreResult<Shipment> {
        let mut t = self.tables()?;
        let shipment = t
            .shipments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("shipment"))?;

        if shipment.status != from {
            return Err(StoreError::Conflict(format!(
                "shipment is {}, expected {}",
                shipment.status.as_str(),
                from.as_str()
            )));
        }

        shipment.status = to;
        shipment.updated_at_utc = Utc::now();
        Ok(shipment.clone())
    }

    async fn update_shipment(&self, id: Uuid, update: ShipmentUpdate) -> StoreResult<Shipment> {
        if let Some(weight) = update.weight_kg {
            if weight <= 0 {
                return Err(StoreError::Invalid(format!(
                    "weight_kg must be > 0, got {weight}"
                )));
            }
        }
        if let Some(rate) = update.rate_cents {
            if rate <= 0 {
                return Err(StoreError::Invalid(format!(
                    "rate_cents must be > 0, got {rate}"
                )));
            }
        }

        let mut t = self.tables()?;
        let shipment = t
            .shipments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("shipment"))?;

        if shipment.status != ShipmentStatus::Posted {
            return Err(StoreError::Conflict(format!(
                "shipment is {}, edits are only allowed while posted",
                shipment.status.as_str()
            )));
        }

        if let Some(weight) = update.weight_kg {
            shipment.weight_kg = weight;
        }
        if let Some(rate) = update.rate_cents {
            shipment.rate_cents = rate;
        }
        if let Some(equipment) = update.equipment {
            shipment.equipment = equipment;
        }
        if let Some(commodity) = update.commodity {
            shipment.commodity = commodity;
        }
        shipment.updated_at_utc = Utc::now();
        Ok(shipment.clone())
    }

    async fn set_shipment_vehicle(&self, id: Uuid, vehicle_id: Uuid) -> StoreResult<()> {
        let mut t = self.tables()?;
        let shipment = t
            .shipments
            .get_mut(&id)
            .ok_or(StoreError::NotFound("shipment"))?;
        shipment.vehicle_id = Some(vehicle_id);
        shipment.updated_at_utc = Utc::now();
        Ok(())
    }

    // -- bids --------------------------------------------------------------

    async fn create_bid(&self, new: NewBid) -> StoreResult<Bid> {
        if new.amount_cents <= 0 {
            return Err(StoreError::Invalid(format!(
                "amount_cents must be > 0, got {}",
                new.amount_cents
            )));
        }

        let mut t = self.tables()?;
        let shipment = t
            .shipments
            .get_mut(&new.shipment_id)
            .ok_or(StoreError::NotFound("shipment"))?;

        if shipment.status != ShipmentStatus::Posted {
            return Err(StoreError::Conflict(format!(
                "shipment is {}, bids are only accepted while posted",
                shipment.status.as_str()
            )));
        }
        shipment.bid_count += 1;
        shipment.updated_at_utc = Utc::now();

        let bid = Bid {
            bid_id: Uuid::new_v4(),
            shipment_id: new.shipment_id,
            carrier_id: new.carrier_id,
            amount_cents: new.amount_cents,
            notes: new.notes,
            status: BidStatus::Pending,
            created_at_utc: Utc::now(),
        };
        t.bids.insert(bid.bid_id, bid.clone());
        Ok(bid)
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        Ok(self.tables()?.bids.get(&id).cloned())
    }

    async fn list_bids_for_shipment(&self, shipment_id: Uuid) -> StoreResult<Vec<Bid>> {
        let t = self.tables()?;
        let mut rows: Vec<Bid> = t
            .bids
            .values()
            .filter(|b| b.shipment_id == shipment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.created_at_utc);
        Ok(rows)
    }

    async fn list_bids_for_carrier(&self, carrier_id: Uuid) -> StoreResult<Vec<Bid>> {
        let t = self.tables()?;
        let rows: Vec<Bid> = t
            .bids
            .values()
            .filter(|b| b.carrier_id == carrier_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |b| b.created_at_utc))
    }

    async fn accept_bid(&self, shipment_id: Uuid, bid_id: Uuid) -> StoreResult<AcceptOutcome> {
        // Everything below happens under one lock: the conditional swap and
        // the sibling rejections are indivisible, mirroring the SQL transaction.
        let mut t = self.tables()?;

        let bid = t
            .bids
            .get(&bid_id)
            .cloned()
            .ok_or(StoreError::NotFound("bid"))?;
        if bid.shipment_id != shipment_id {
            return Err(StoreError::Invalid(
                "bid does not belong to this shipment".to_string(),
            ));
        }

        {
            let shipment = t
                .shipments
                .get_mut(&shipment_id)
                .ok_or(StoreError::NotFound("shipment"))?;

            // The compare-and-swap: only a still-posted shipment can be assigned.
            if shipment.status != ShipmentStatus::Posted {
                return Err(StoreError::Conflict(
                    "shipment is no longer posted; another bid may have been accepted".to_string(),
                ));
            }
            if bid.status != BidStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "bid is {}, expected pending",
                    bid.status.as_str()
                )));
            }

            shipment.status = ShipmentStatus::Assigned;
            shipment.carrier_id = Some(bid.carrier_id);
            shipment.accepted_bid_id = Some(bid_id);
            shipment.updated_at_utc = Utc::now();
        }

        let mut auto_rejected = Vec::new();
        for b in t.bids.values_mut() {
            if b.bid_id == bid_id {
                b.status = BidStatus::Accepted;
            } else if b.shipment_id == shipment_id && b.status == BidStatus::Pending {
                b.status = BidStatus::Rejected;
                auto_rejected.push(b.clone());
            }
        }
        auto_rejected.sort_by_key(|b| b.created_at_utc);

        let shipment = t.shipments[&shipment_id].clone();
        let bid = t.bids[&bid_id].clone();

        Ok(AcceptOutcome {
            shipment,
            bid,
            auto_rejected,
        })
    }

    async fn settle_bid(&self, bid_id: Uuid, to: BidStatus) -> StoreResult<Bid> {
        if !matches!(to, BidStatus::Rejected | BidStatus::Withdrawn) {
            return Err(StoreError::Invalid(format!(
                "settle_bid target must be rejected or withdrawn, got {}",
                to.as_str()
            )));
        }

        let mut t = self.tables()?;
        let bid = t.bids.get_mut(&bid_id).ok_or(StoreError::NotFound("bid"))?;
        if bid.status != BidStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "bid is {}, expected pending",
                bid.status.as_str()
            )));
        }
        bid.status = to;
        Ok(bid.clone())
    }

    // -- tracking ----------------------------------------------------------

    async fn append_tracking_event(&self, new: NewTrackingEvent) -> StoreResult<TrackingEvent> {
        let event = TrackingEvent {
            event_id: Uuid::new_v4(),
            shipment_id: new.shipment_id,
            kind: new.kind,
            description: new.description,
            lat: new.lat,
            lon: new.lon,
            recorded_at_utc: Utc::now(),
        };
        self.tables()?.tracking.push(event.clone());
        Ok(event)
    }

    async fn tracking_history(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>> {
        let t = self.tables()?;
        let mut rows: Vec<TrackingEvent> = t
            .tracking
            .iter()
            .filter(|e| e.shipment_id == shipment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.recorded_at_utc);
        Ok(rows)
    }

    // -- notifications -----------------------------------------------------

    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification> {
        let notification = Notification {
            notification_id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title,
            body: new.body,
            entity_id: new.entity_id,
            read: false,
            created_at_utc: Utc::now(),
        };
        self.tables()?
            .notifications
            .insert(notification.notification_id, notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let t = self.tables()?;
        let rows: Vec<Notification> = t
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        Ok(newest_first(rows, |n| n.created_at_utc))
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.notifications.get_mut(&id) {
            Some(n) if n.user_id == user_id => {
                n.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut t = self.tables()?;
        let mut flipped = 0u64;
        for n in t.notifications.values_mut() {
            if n.user_id == user_id && !n.read {
                n.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<i64> {
        let t = self.tables()?;
        Ok(t.notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as i64)
    }

    // -- drivers -----------------------------------------------------------

    async fn create_driver(&self, new: NewDriver) -> StoreResult<Driver> {
        let driver = Driver {
            driver_id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            phone: new.phone,
            license_no: new.license_no,
            vehicle_id: None,
            last_lat: None,
            last_lon: None,
            located_at_utc: None,
        };
        self.tables()?.drivers.insert(driver.driver_id, driver.clone());
        Ok(driver)
    }

    async fn list_drivers(&self) -> StoreResult<Vec<Driver>> {
        let t = self.tables()?;
        let mut rows: Vec<Driver> = t.drivers.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        Ok(self.tables()?.drivers.get(&id).cloned())
    }

    async fn assign_vehicle_to_driver(
        &self,
        driver_id: Uuid,
        vehicle_id: Uuid,
    ) -> StoreResult<Driver> {
        let mut t = self.tables()?;
        match t.vehicles.get(&vehicle_id) {
            None => return Err(StoreError::NotFound("vehicle")),
            Some(v) if !v.active => {
                return Err(StoreError::Conflict("vehicle is not active".to_string()))
            }
            Some(_) => {}
        }

        let driver = t
            .drivers
            .get_mut(&driver_id)
            .ok_or(StoreError::NotFound("driver"))?;
        driver.vehicle_id = Some(vehicle_id);
        Ok(driver.clone())
    }

    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        lat: f64,
        lon: f64,
    ) -> StoreResult<Driver> {
        let mut t = self.tables()?;
        let driver = t
            .drivers
            .get_mut(&driver_id)
            .ok_or(StoreError::NotFound("driver"))?;
        driver.last_lat = Some(lat);
        driver.last_lon = Some(lon);
        driver.located_at_utc = Some(Utc::now());
        Ok(driver.clone())
    }

    // -- vehicles ----------------------------------------------------------

    async fn create_vehicle(&self, new: NewVehicle) -> StoreResult<Vehicle> {
        if new.capacity_kg <= 0 {
            return Err(StoreError::Invalid(format!(
                "capacity_kg must be > 0, got {}",
                new.capacity_kg
            )));
        }

        let vehicle = Vehicle {
            vehicle_id: Uuid::new_v4(),
            plate: new.plate,
            equipment: new.equipment,
            capacity_kg: new.capacity_kg,
            active: true,
        };
        self.tables()?
            .vehicles
            .insert(vehicle.vehicle_id, vehicle.clone());
        Ok(vehicle)
    }

    async fn list_vehicles(&self) -> StoreResult<Vec<Vehicle>> {
        let t = self.tables()?;
        let mut rows: Vec<Vehicle> = t.vehicles.values().cloned().collect();
        rows.sort_by(|a, b| a.plate.cmp(&b.plate));
        Ok(rows)
    }

    async fn get_vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>> {
        Ok(self.tables()?.vehicles.get(&id).cloned())
    }

    async fn update_vehicle(&self, id: Uuid, update: VehicleUpdate) -> StoreResult<Vehicle> {
        let mut t = self.tables()?;
        let vehicle = t
            .vehicles
            .get_mut(&id)
            .ok_or(StoreError::NotFound("vehicle"))?;
        if let Some(plate) = update.plate {
            vehicle.plate = plate;
        }
        if let Some(equipment) = update.equipment {
            vehicle.equipment = equipment;
        }
        if let Some(capacity_kg) = update.capacity_kg {
            vehicle.capacity_kg = capacity_kg;
        }
        if let Some(active) = update.active {
            vehicle.active = active;
        }
        Ok(vehicle.clone())
    }

    async fn delete_vehicle(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables()?.vehicles.remove(&id).is_some())
    }

    // -- customers ---------------------------------------------------------

    async fn create_customer(&self, new: NewCustomer) -> StoreResult<Customer> {
        let customer = Customer {
            customer_id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            phone: new.phone,
            created_at_utc: Utc::now(),
        };
        self.tables()?
            .customers
            .insert(customer.customer_id, customer.clone());
        Ok(customer)
    }

    async fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        let t = self.tables()?;
        let mut rows: Vec<Customer> = t.customers.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        Ok(self.tables()?.customers.get(&id).cloned())
    }

    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> StoreResult<Customer> {
        let mut t = self.tables()?;
        let customer = t
            .customers
            .get_mut(&id)
            .ok_or(StoreError::NotFound("customer"))?;
        if let Some(name) = update.name {
            customer.name = name;
        }
        if let Some(email) = update.email {
            customer.email = email;
        }
        if let Some(phone) = update.phone {
            customer.phone = phone;
        }
        Ok(customer.clone())
    }

    async fn delete_customer(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables()?.customers.remove(&id).is_some())
    }

    // -- issues ------------------------------------------------------------

    async fn create_issue(&self, new: NewIssue) -> StoreResult<Issue> {
        let mut t = self.tables()?;
        if !t.shipments.contains_key(&new.shipment_id) {
            return Err(StoreError::NotFound("shipment"));
        }

        let issue = Issue {
            issue_id: Uuid::new_v4(),
            shipment_id: new.shipment_id,
            reported_by: new.reported_by,
            description: new.description,
            resolved: false,
            created_at_utc: Utc::now(),
            resolved_at_utc: None,
        };
        t.issues.insert(issue.issue_id, issue.clone());
        Ok(issue)
    }

    async fn list_issues(&self, scope: RowScope) -> StoreResult<Vec<Issue>> {
        let t = self.tables()?;
        let rows: Vec<Issue> = t
            .issues
            .values()
            .filter(|i| match scope {
                RowScope::All => true,
                RowScope::Shipper(uid) | RowScope::Carrier(uid) | RowScope::Party(uid) => t
                    .shipments
                    .get(&i.shipment_id)
                    .map(|s| s.shipper_id == uid || s.carrier_id == Some(uid))
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        Ok(newest_first(rows, |i| i.created_at_utc))
    }

    async fn resolve_issue(&self, id: Uuid) -> StoreResult<Issue> {
        let mut t = self.tables()?;
        let issue = t.issues.get_mut(&id).ok_or(StoreError::NotFound("issue"))?;
        if issue.resolved {
            return Err(StoreError::Conflict("issue is already resolved".to_string()));
        }
        issue.resolved = true;
        issue.resolved_at_utc = Some(Utc::now());
        Ok(issue.clone())
    }

    // -- proof of delivery -------------------------------------------------

    async fn create_pod(&self, new: NewProofOfDelivery) -> StoreResult<ProofOfDelivery> {
        let pod = ProofOfDelivery {
            pod_id: Uuid::new_v4(),
            shipment_id: new.shipment_id,
            signed_by: new.signed_by,
            photo_url: new.photo_url,
            notes: new.notes,
            created_at_utc: Utc::now(),
        };
        self.tables()?.pods.insert(pod.pod_id, pod.clone());
        Ok(pod)
    }

    async fn list_pods(&self, shipment_id: Uuid) -> StoreResult<Vec<ProofOfDelivery>> {
        let t = self.tables()?;
        let mut rows: Vec<ProofOfDelivery> = t
            .pods
            .values()
            .filter(|p| p.shipment_id == shipment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at_utc);
        Ok(rows)
    }

    async fn update_pod(
        &self,
        id: Uuid,
        update: ProofOfDeliveryUpdate,
    ) -> StoreResult<ProofOfDelivery> {
        let mut t = self.tables()?;
        let pod = t.pods.get_mut(&id).ok_or(StoreError::NotFound("pod"))?;
        if let Some(signed_by) = update.signed_by {
            pod.signed_by = signed_by;
        }
        if let Some(notes) = update.notes {
            pod.notes = Some(notes);
        }
        Ok(pod.clone())
    }
}
