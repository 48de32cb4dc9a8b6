//! Postgres implementation of [`MarketStore`].
//!
//! All queries are runtime `sqlx::query` with `try_get` row mapping. The
//! acceptance path is one transaction with conditional swaps; everything the
//! swap guards is also backed by a database constraint
//! (`uq_bids_one_accepted`, status checks) so an application bug cannot
//! corrupt the invariant silently.

use anyhow::Context;
use async_trait::async_trait;
use fmk_schemas::{
    Bid, BidStatus, Customer, CustomerUpdate, Driver, EquipmentType, Issue, NewBid, NewCustomer,
    NewDriver, NewIssue, NewNotification, NewProofOfDelivery, NewShipment, NewTrackingEvent,
    NewVehicle, Notification, Place, ProofOfDelivery, ProofOfDeliveryUpdate, RowScope, Shipment,
    ShipmentStatus, ShipmentUpdate, TrackingEvent, Vehicle, VehicleUpdate,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::{AcceptOutcome, MarketStore, StoreError, StoreResult};

/// Postgres-backed store. Cheap to clone; wraps the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(e: sqlx::Error, ctx: &'static str) -> StoreError {
    StoreError::Backend(anyhow::Error::new(e).context(ctx))
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const SHIPMENT_COLS: &str = "shipment_id, shipper_id, carrier_id, origin_city, origin_state, \
     dest_city, dest_state, weight_kg, rate_cents, equipment, commodity, status, \
     accepted_bid_id, vehicle_id, bid_count, created_at_utc, updated_at_utc";

fn map_shipment(row: &PgRow) -> anyhow::Result<Shipment> {
    let equipment: String = row.try_get("equipment")?;
    let status: String = row.try_get("status")?;
    Ok(Shipment {
        shipment_id: row.try_get("shipment_id")?,
        shipper_id: row.try_get("shipper_id")?,
        carrier_id: row.try_get("carrier_id")?,
        origin: Place {
            city: row.try_get("origin_city")?,
            state: row.try_get("origin_state")?,
        },
        destination: Place {
            city: row.try_get("dest_city")?,
            state: row.try_get("dest_state")?,
        },
        weight_kg: row.try_get("weight_kg")?,
        rate_cents: row.try_get("rate_cents")?,
        equipment: EquipmentType::parse(&equipment)
            .with_context(|| format!("bad equipment in db: {equipment}"))?,
        commodity: row.try_get("commodity")?,
        status: ShipmentStatus::parse(&status)
            .with_context(|| format!("bad shipment status in db: {status}"))?,
        accepted_bid_id: row.try_get("accepted_bid_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        bid_count: row.try_get("bid_count")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

const BID_COLS: &str = "bid_id, shipment_id, carrier_id, amount_cents, notes, status, created_at_utc";

fn map_bid(row: &PgRow) -> anyhow::Result<Bid> {
    let status: String = row.try_get("status")?;
    Ok(Bid {
        bid_id: row.try_get("bid_id")?,
        shipment_id: row.try_get("shipment_id")?,
        carrier_id: row.try_get("carrier_id")?,
        amount_cents: row.try_get("amount_cents")?,
        notes: row.try_get("notes")?,
        status: BidStatus::parse(&status)
            .with_context(|| format!("bad bid status in db: {status}"))?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn map_tracking_event(row: &PgRow) -> anyhow::Result<TrackingEvent> {
    Ok(TrackingEvent {
        event_id: row.try_get("event_id")?,
        shipment_id: row.try_get("shipment_id")?,
        kind: row.try_get("kind")?,
        description: row.try_get("description")?,
        lat: row.try_get("lat")?,
        lon: row.try_get("lon")?,
        recorded_at_utc: row.try_get("recorded_at_utc")?,
    })
}

fn map_notification(row: &PgRow) -> anyhow::Result<Notification> {
    Ok(Notification {
        notification_id: row.try_get("notification_id")?,
        user_id: row.try_get("user_id")?,
        kind: row.try_get("kind")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        entity_id: row.try_get("entity_id")?,
        read: row.try_get("read")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn map_driver(row: &PgRow) -> anyhow::Result<Driver> {
    Ok(Driver {
        driver_id: row.try_get("driver_id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        license_no: row.try_get("license_no")?,
        vehicle_id: row.try_get("vehicle_id")?,
        last_lat: row.try_get("last_lat")?,
        last_lon: row.try_get("last_lon")?,
        located_at_utc: row.try_get("located_at_utc")?,
    })
}

fn map_vehicle(row: &PgRow) -> anyhow::Result<Vehicle> {
    let equipment: String = row.try_get("equipment")?;
    Ok(Vehicle {
        vehicle_id: row.try_get("vehicle_id")?,
        plate: row.try_get("plate")?,
        equipment: EquipmentType::parse(&equipment)
            .with_context(|| format!("bad equipment in db: {equipment}"))?,
        capacity_kg: row.try_get("capacity_kg")?,
        active: row.try_get("active")?,
    })
}

fn map_customer(row: &PgRow) -> anyhow::Result<Customer> {
    Ok(Customer {
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn map_issue(row: &PgRow) -> anyhow::Result<Issue> {
    Ok(Issue {
        issue_id: row.try_get("issue_id")?,
        shipment_id: row.try_get("shipment_id")?,
        reported_by: row.try_get("reported_by")?,
        description: row.try_get("description")?,
        resolved: row.try_get("resolved")?,
        created_at_utc: row.try_get("created_at_utc")?,
        resolved_at_utc: row.try_get("resolved_at_utc")?,
    })
}

fn map_pod(row: &PgRow) -> anyhow::Result<ProofOfDelivery> {
    Ok(ProofOfDelivery {
        pod_id: row.try_get("pod_id")?,
        shipment_id: row.try_get("shipment_id")?,
        signed_by: row.try_get("signed_by")?,
        photo_url: row.try_get("photo_url")?,
        notes: row.try_get("notes")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

// ---------------------------------------------------------------------------
// MarketStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketStore for PgStore {
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

        let row = sqlx::query(&format!(
            "insert into shipments (shipment_id, shipper_id, origin_city, origin_state, \
             dest_city, dest_state, weight_kg, rate_cents, equipment, commodity) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             returning {SHIPMENT_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.shipper_id)
        .bind(&new.origin.city)
        .bind(&new.origin.state)
        .bind(&new.destination.city)
        .bind(&new.destination.state)
        .bind(new.weight_kg)
        .bind(new.rate_cents)
        .bind(new.equipment.as_str())
        .bind(&new.commodity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_shipment insert failed"))?;

        Ok(map_shipment(&row)?)
    }

    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        let row = sqlx::query(&format!(
            "select {SHIPMENT_COLS} from shipments where shipment_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "get_shipment failed"))?;

        match row {
            Some(r) => Ok(Some(map_shipment(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_shipments(&self, scope: RowScope) -> StoreResult<Vec<Shipment>> {
        let rows = match scope {
            RowScope::All => {
                sqlx::query(&format!(
                    "select {SHIPMENT_COLS} from shipments order by created_at_utc desc"
                ))
                .fetch_all(&self.pool)
                .await
            }
            RowScope::Shipper(uid) => {
                sqlx::query(&format!(
                    "select {SHIPMENT_COLS} from shipments where shipper_id = $1 \
                     order by created_at_utc desc"
                ))
                .bind(uid)
                .fetch_all(&self.pool)
                .await
            }
            RowScope::Carrier(uid) => {
                // The market a carrier sees: open loads plus their own.
                sqlx::query(&format!(
                    "select {SHIPMENT_COLS} from shipments \
                     where status = 'posted' or carrier_id = $1 \
                     order by created_at_utc desc"
                ))
                .bind(uid)
                .fetch_all(&self.pool)
                .await
            }
            RowScope::Party(uid) => {
                sqlx::query(&format!(
                    "select {SHIPMENT_COLS} from shipments \
                     where shipper_id = $1 or carrier_id = $1 \
                     order by created_at_utc desc"
                ))
                .bind(uid)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| backend(e, "list_shipments failed"))?;

        rows.iter()
            .map(|r| map_shipment(r).map_err(StoreError::from))
            .collect()
    }

    async fn transition_shipment(
        &self,
        id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
    ) -> StoreResult<Shipment> {
        let row = sqlx::query(&format!(
            "update shipments set status = $3, updated_at_utc = now() \
             where shipment_id = $1 and status = $2 \
             returning {SHIPMENT_COLS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "transition_shipment update failed"))?;

        match row {
            Some(r) => Ok(map_shipment(&r)?),
            // Zero rows: either the shipment is gone or the guard lost.
            None => match self.get_shipment(id).await? {
                Some(s) => Err(StoreError::Conflict(format!(
                    "shipment is {}, expected {}",
                    s.status.as_str(),
                    from.as_str()
                ))),
                None => Err(StoreError::NotFound("shipment")),
            },
        }
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

        // Edits are only legal while the shipment is on the market; the
        // status guard doubles as the race check against acceptance.
        let row = sqlx::query(&format!(
            "update shipments set \
               weight_kg = coalesce($2, weight_kg), \
               rate_cents = coalesce($3, rate_cents), \
               equipment = coalesce($4, equipment), \
               commodity = coalesce($5, commodity), \
               updated_at_utc = now() \
             where shipment_id = $1 and status = 'posted' \
             returning {SHIPMENT_COLS}"
        ))
        .bind(id)
        .bind(update.weight_kg)
        .bind(update.rate_cents)
        .bind(update.equipment.map(|e| e.as_str()))
        .bind(update.commodity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "update_shipment failed"))?;

        match row {
            Some(r) => Ok(map_shipment(&r)?),
            None => match self.get_shipment(id).await? {
                Some(s) => Err(StoreError::Conflict(format!(
                    "shipment is {}, edits are only allowed while posted",
                    s.status.as_str()
                ))),
                None => Err(StoreError::NotFound("shipment")),
            },
        }
    }

    async fn set_shipment_vehicle(&self, id: Uuid, vehicle_id: Uuid) -> StoreResult<()> {
        let res = sqlx::query(
            "update shipments set vehicle_id = $2, updated_at_utc = now() where shipment_id = $1",
        )
        .bind(id)
        .bind(vehicle_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend(e, "set_shipment_vehicle failed"))?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("shipment"));
        }
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend(e, "create_bid begin failed"))?;

        // Lock the shipment row so the posted check and the counter bump are
        // consistent with a concurrent acceptance.
        let status: Option<String> =
            sqlx::query_scalar("select status from shipments where shipment_id = $1 for update")
                .bind(new.shipment_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| backend(e, "create_bid shipment lookup failed"))?;

        match status.as_deref() {
            None => return Err(StoreError::NotFound("shipment")),
            Some("posted") => {}
            Some(other) => {
                return Err(StoreError::Conflict(format!(
                    "shipment is {other}, bids are only accepted while posted"
                )))
            }
        }

        let row = sqlx::query(&format!(
            "insert into bids (bid_id, shipment_id, carrier_id, amount_cents, notes) \
             values ($1, $2, $3, $4, $5) returning {BID_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.shipment_id)
        .bind(new.carrier_id)
        .bind(new.amount_cents)
        .bind(&new.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| backend(e, "create_bid insert failed"))?;

        sqlx::query(
            "update shipments set bid_count = bid_count + 1, updated_at_utc = now() \
             where shipment_id = $1",
        )
        .bind(new.shipment_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend(e, "create_bid counter bump failed"))?;

        tx.commit()
            .await
            .map_err(|e| backend(e, "create_bid commit failed"))?;

        Ok(map_bid(&row)?)
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<Bid>> {
        let row = sqlx::query(&format!("select {BID_COLS} from bids where bid_id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend(e, "get_bid failed"))?;

        match row {
            Some(r) => Ok(Some(map_bid(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_bids_for_shipment(&self, shipment_id: Uuid) -> StoreResult<Vec<Bid>> {
        let rows = sqlx::query(&format!(
            "select {BID_COLS} from bids where shipment_id = $1 order by created_at_utc asc"
        ))
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "list_bids_for_shipment failed"))?;

        rows.iter()
            .map(|r| map_bid(r).map_err(StoreError::from))
            .collect()
    }

    async fn list_bids_for_carrier(&self, carrier_id: Uuid) -> StoreResult<Vec<Bid>> {
        let rows = sqlx::query(&format!(
            "select {BID_COLS} from bids where carrier_id = $1 order by created_at_utc desc"
        ))
        .bind(carrier_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "list_bids_for_carrier failed"))?;

        rows.iter()
            .map(|r| map_bid(r).map_err(StoreError::from))
            .collect()
    }

    async fn accept_bid(&self, shipment_id: Uuid, bid_id: Uuid) -> StoreResult<AcceptOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend(e, "accept_bid begin failed"))?;

        let bid_row = sqlx::query(&format!(
            "select {BID_COLS} from bids where bid_id = $1 for update"
        ))
        .bind(bid_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend(e, "accept_bid bid lookup failed"))?;

        let bid = match bid_row {
            Some(r) => map_bid(&r)?,
            None => return Err(StoreError::NotFound("bid")),
        };
        if bid.shipment_id != shipment_id {
            return Err(StoreError::Invalid(
                "bid does not belong to this shipment".to_string(),
            ));
        }

        // The compare-and-swap: only a still-posted shipment can be assigned.
        // Zero rows means a concurrent acceptance (or cancellation) won.
        let shipment_row = sqlx::query(&format!(
            "update shipments set status = 'assigned', carrier_id = $2, accepted_bid_id = $3, \
             updated_at_utc = now() \
             where shipment_id = $1 and status = 'posted' \
             returning {SHIPMENT_COLS}"
        ))
        .bind(shipment_id)
        .bind(bid.carrier_id)
        .bind(bid_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend(e, "accept_bid shipment swap failed"))?;

        let shipment = match shipment_row {
            Some(r) => map_shipment(&r)?,
            None => {
                return Err(StoreError::Conflict(
                    "shipment is no longer posted; another bid may have been accepted".to_string(),
                ))
            }
        };

        let bid_row = sqlx::query(&format!(
            "update bids set status = 'accepted' where bid_id = $1 and status = 'pending' \
             returning {BID_COLS}"
        ))
        .bind(bid_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_constraint_violation(&e, "uq_bids_one_accepted") {
                StoreError::Conflict("another bid is already accepted for this shipment".to_string())
            } else {
                backend(e, "accept_bid bid swap failed")
            }
        })?;

        let accepted = match bid_row {
            Some(r) => map_bid(&r)?,
            None => {
                return Err(StoreError::Conflict(format!(
                    "bid is {}, expected pending",
                    bid.status.as_str()
                )))
            }
        };

        // Sibling pending bids lose in the same transaction.
        let rejected_rows = sqlx::query(&format!(
            "update bids set status = 'rejected' \
             where shipment_id = $1 and bid_id <> $2 and status = 'pending' \
             returning {BID_COLS}"
        ))
        .bind(shipment_id)
        .bind(bid_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| backend(e, "accept_bid sibling reject failed"))?;

        let auto_rejected = rejected_rows
            .iter()
            .map(|r| map_bid(r).map_err(StoreError::from))
            .collect::<StoreResult<Vec<_>>>()?;

        tx.commit()
            .await
            .map_err(|e| backend(e, "accept_bid commit failed"))?;

        Ok(AcceptOutcome {
            shipment,
            bid: accepted,
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

        let row = sqlx::query(&format!(
            "update bids set status = $2 where bid_id = $1 and status = 'pending' \
             returning {BID_COLS}"
        ))
        .bind(bid_id)
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "settle_bid update failed"))?;

        match row {
            Some(r) => Ok(map_bid(&r)?),
            None => match self.get_bid(bid_id).await? {
                Some(b) => Err(StoreError::Conflict(format!(
                    "bid is {}, expected pending",
                    b.status.as_str()
                ))),
                None => Err(StoreError::NotFound("bid")),
            },
        }
    }

    // -- tracking ----------------------------------------------------------

    async fn append_tracking_event(&self, new: NewTrackingEvent) -> StoreResult<TrackingEvent> {
        let row = sqlx::query(
            "insert into tracking_events (event_id, shipment_id, kind, description, lat, lon) \
             values ($1, $2, $3, $4, $5, $6) \
             returning event_id, shipment_id, kind, description, lat, lon, recorded_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(new.shipment_id)
        .bind(&new.kind)
        .bind(&new.description)
        .bind(new.lat)
        .bind(new.lon)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "append_tracking_event insert failed"))?;

        Ok(map_tracking_event(&row)?)
    }

    async fn tracking_history(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>> {
        let rows = sqlx::query(
            "select event_id, shipment_id, kind, description, lat, lon, recorded_at_utc \
             from tracking_events where shipment_id = $1 order by recorded_at_utc asc",
        )
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "tracking_history failed"))?;

        rows.iter()
            .map(|r| map_tracking_event(r).map_err(StoreError::from))
            .collect()
    }

    // -- notifications -----------------------------------------------------

    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification> {
        let row = sqlx::query(
            "insert into notifications (notification_id, user_id, kind, title, body, entity_id) \
             values ($1, $2, $3, $4, $5, $6) \
             returning notification_id, user_id, kind, title, body, entity_id, read, created_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.kind)
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.entity_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "insert_notification failed"))?;

        Ok(map_notification(&row)?)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let sql = if unread_only {
            "select notification_id, user_id, kind, title, body, entity_id, read, created_at_utc \
             from notifications where user_id = $1 and read = false \
             order by created_at_utc desc"
        } else {
            "select notification_id, user_id, kind, title, body, entity_id, read, created_at_utc \
             from notifications where user_id = $1 order by created_at_utc desc"
        };

        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend(e, "list_notifications failed"))?;

        rows.iter()
            .map(|r| map_notification(r).map_err(StoreError::from))
            .collect()
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query(
            "update notifications set read = true \
             where notification_id = $1 and user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend(e, "mark_notification_read failed"))?;

        Ok(res.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query(
            "update notifications set read = true where user_id = $1 and read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| backend(e, "mark_all_notifications_read failed"))?;

        Ok(res.rows_affected())
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<i64> {
        let (n,): (i64,) = sqlx::query_as(
            "select count(*)::bigint from notifications where user_id = $1 and read = false",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "unread_notification_count failed"))?;

        Ok(n)
    }

    // -- drivers -----------------------------------------------------------

    async fn create_driver(&self, new: NewDriver) -> StoreResult<Driver> {
        let row = sqlx::query(
            "insert into drivers (driver_id, user_id, name, phone, license_no) \
             values ($1, $2, $3, $4, $5) \
             returning driver_id, user_id, name, phone, license_no, vehicle_id, \
                       last_lat, last_lon, located_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.name)
        .bind(&new.phone)
        .bind(&new.license_no)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_driver failed"))?;

        Ok(map_driver(&row)?)
    }

    async fn list_drivers(&self) -> StoreResult<Vec<Driver>> {
        let rows = sqlx::query(
            "select driver_id, user_id, name, phone, license_no, vehicle_id, \
                    last_lat, last_lon, located_at_utc \
             from drivers order by name asc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "list_drivers failed"))?;

        rows.iter()
            .map(|r| map_driver(r).map_err(StoreError::from))
            .collect()
    }

    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        let row = sqlx::query(
            "select driver_id, user_id, name, phone, license_no, vehicle_id, \
                    last_lat, last_lon, located_at_utc \
             from drivers where driver_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "get_driver failed"))?;

        match row {
            Some(r) => Ok(Some(map_driver(&r)?)),
            None => Ok(None),
        }
    }

    async fn assign_vehicle_to_driver(
        &self,
        driver_id: Uuid,
        vehicle_id: Uuid,
    ) -> StoreResult<Driver> {
        // Vehicle must exist and be active before it can be assigned.
        let active: Option<bool> =
            sqlx::query_scalar("select active from vehicles where vehicle_id = $1")
                .bind(vehicle_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend(e, "assign_vehicle vehicle lookup failed"))?;

        match active {
            None => return Err(StoreError::NotFound("vehicle")),
            Some(false) => {
                return Err(StoreError::Conflict("vehicle is not active".to_string()))
            }
            Some(true) => {}
        }

        let row = sqlx::query(
            "update drivers set vehicle_id = $2 where driver_id = $1 \
             returning driver_id, user_id, name, phone, license_no, vehicle_id, \
                       last_lat, last_lon, located_at_utc",
        )
        .bind(driver_id)
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "assign_vehicle_to_driver failed"))?;

        match row {
            Some(r) => Ok(map_driver(&r)?),
            None => Err(StoreError::NotFound("driver")),
        }
    }

    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        lat: f64,
        lon: f64,
    ) -> StoreResult<Driver> {
        let row = sqlx::query(
            "update drivers set last_lat = $2, last_lon = $3, located_at_utc = now() \
             where driver_id = $1 \
             returning driver_id, user_id, name, phone, license_no, vehicle_id, \
                       last_lat, last_lon, located_at_utc",
        )
        .bind(driver_id)
        .bind(lat)
        .bind(lon)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "update_driver_location failed"))?;

        match row {
            Some(r) => Ok(map_driver(&r)?),
            None => Err(StoreError::NotFound("driver")),
        }
    }

    // -- vehicles ----------------------------------------------------------

    async fn create_vehicle(&self, new: NewVehicle) -> StoreResult<Vehicle> {
        if new.capacity_kg <= 0 {
            return Err(StoreError::Invalid(format!(
                "capacity_kg must be > 0, got {}",
                new.capacity_kg
            )));
        }

        let row = sqlx::query(
            "insert into vehicles (vehicle_id, plate, equipment, capacity_kg) \
             values ($1, $2, $3, $4) \
             returning vehicle_id, plate, equipment, capacity_kg, active",
        )
        .bind(Uuid::new_v4())
        .bind(&new.plate)
        .bind(new.equipment.as_str())
        .bind(new.capacity_kg)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_vehicle failed"))?;

        Ok(map_vehicle(&row)?)
    }

    async fn list_vehicles(&self) -> StoreResult<Vec<Vehicle>> {
        let rows =
            sqlx::query("select vehicle_id, plate, equipment, capacity_kg, active from vehicles \
                         order by plate asc")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| backend(e, "list_vehicles failed"))?;

        rows.iter()
            .map(|r| map_vehicle(r).map_err(StoreError::from))
            .collect()
    }

    async fn get_vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>> {
        let row = sqlx::query(
            "select vehicle_id, plate, equipment, capacity_kg, active from vehicles \
             where vehicle_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "get_vehicle failed"))?;

        match row {
            Some(r) => Ok(Some(map_vehicle(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_vehicle(&self, id: Uuid, update: VehicleUpdate) -> StoreResult<Vehicle> {
        let row = sqlx::query(
            "update vehicles set \
               plate = coalesce($2, plate), \
               equipment = coalesce($3, equipment), \
               capacity_kg = coalesce($4, capacity_kg), \
               active = coalesce($5, active) \
             where vehicle_id = $1 \
             returning vehicle_id, plate, equipment, capacity_kg, active",
        )
        .bind(id)
        .bind(update.plate)
        .bind(update.equipment.map(|e| e.as_str()))
        .bind(update.capacity_kg)
        .bind(update.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "update_vehicle failed"))?;

        match row {
            Some(r) => Ok(map_vehicle(&r)?),
            None => Err(StoreError::NotFound("vehicle")),
        }
    }

    async fn delete_vehicle(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("delete from vehicles where vehicle_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend(e, "delete_vehicle failed"))?;

        Ok(res.rows_affected() > 0)
    }

    // -- customers ---------------------------------------------------------

    async fn create_customer(&self, new: NewCustomer) -> StoreResult<Customer> {
        let row = sqlx::query(
            "insert into customers (customer_id, name, email, phone) \
             values ($1, $2, $3, $4) \
             returning customer_id, name, email, phone, created_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_customer failed"))?;

        Ok(map_customer(&row)?)
    }

    async fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        let rows = sqlx::query(
            "select customer_id, name, email, phone, created_at_utc from customers \
             order by name asc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "list_customers failed"))?;

        rows.iter()
            .map(|r| map_customer(r).map_err(StoreError::from))
            .collect()
    }

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(
            "select customer_id, name, email, phone, created_at_utc from customers \
             where customer_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "get_customer failed"))?;

        match row {
            Some(r) => Ok(Some(map_customer(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> StoreResult<Customer> {
        let row = sqlx::query(
            "update customers set \
               name = coalesce($2, name), \
               email = coalesce($3, email), \
               phone = coalesce($4, phone) \
             where customer_id = $1 \
             returning customer_id, name, email, phone, created_at_utc",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.email)
        .bind(update.phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "update_customer failed"))?;

        match row {
            Some(r) => Ok(map_customer(&r)?),
            None => Err(StoreError::NotFound("customer")),
        }
    }

    async fn delete_customer(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("delete from customers where customer_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend(e, "delete_customer failed"))?;

        Ok(res.rows_affected() > 0)
    }

    // -- issues ------------------------------------------------------------

    async fn create_issue(&self, new: NewIssue) -> StoreResult<Issue> {
        let exists: Option<Uuid> =
            sqlx::query_scalar("select shipment_id from shipments where shipment_id = $1")
                .bind(new.shipment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend(e, "create_issue shipment lookup failed"))?;

        if exists.is_none() {
            return Err(StoreError::NotFound("shipment"));
        }

        let row = sqlx::query(
            "insert into issues (issue_id, shipment_id, reported_by, description) \
             values ($1, $2, $3, $4) \
             returning issue_id, shipment_id, reported_by, description, resolved, \
                       created_at_utc, resolved_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(new.shipment_id)
        .bind(new.reported_by)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_issue failed"))?;

        Ok(map_issue(&row)?)
    }

    async fn list_issues(&self, scope: RowScope) -> StoreResult<Vec<Issue>> {
        let rows = match scope {
            RowScope::All => {
                sqlx::query(
                    "select issue_id, i.shipment_id, reported_by, description, resolved, \
                            i.created_at_utc, resolved_at_utc \
                     from issues i order by i.created_at_utc desc",
                )
                .fetch_all(&self.pool)
                .await
            }
            RowScope::Shipper(uid) | RowScope::Carrier(uid) | RowScope::Party(uid) => {
                sqlx::query(
                    "select issue_id, i.shipment_id, reported_by, description, resolved, \
                            i.created_at_utc, resolved_at_utc \
                     from issues i \
                     join shipments s on s.shipment_id = i.shipment_id \
                     where s.shipper_id = $1 or s.carrier_id = $1 \
                     order by i.created_at_utc desc",
                )
                .bind(uid)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| backend(e, "list_issues failed"))?;

        rows.iter()
            .map(|r| map_issue(r).map_err(StoreError::from))
            .collect()
    }

    async fn resolve_issue(&self, id: Uuid) -> StoreResult<Issue> {
        let row = sqlx::query(
            "update issues set resolved = true, resolved_at_utc = now() \
             where issue_id = $1 and resolved = false \
             returning issue_id, shipment_id, reported_by, description, resolved, \
                       created_at_utc, resolved_at_utc",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "resolve_issue failed"))?;

        match row {
            Some(r) => Ok(map_issue(&r)?),
            None => {
                let exists: Option<Uuid> =
                    sqlx::query_scalar("select issue_id from issues where issue_id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| backend(e, "resolve_issue lookup failed"))?;
                match exists {
                    Some(_) => Err(StoreError::Conflict("issue is already resolved".to_string())),
                    None => Err(StoreError::NotFound("issue")),
                }
            }
        }
    }

    // -- proof of delivery -------------------------------------------------

    async fn create_pod(&self, new: NewProofOfDelivery) -> StoreResult<ProofOfDelivery> {
        let row = sqlx::query(
            "insert into proof_of_delivery (pod_id, shipment_id, signed_by, photo_url, notes) \
             values ($1, $2, $3, $4, $5) \
             returning pod_id, shipment_id, signed_by, photo_url, notes, created_at_utc",
        )
        .bind(Uuid::new_v4())
        .bind(new.shipment_id)
        .bind(&new.signed_by)
        .bind(&new.photo_url)
        .bind(&new.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend(e, "create_pod failed"))?;

        Ok(map_pod(&row)?)
    }

    async fn list_pods(&self, shipment_id: Uuid) -> StoreResult<Vec<ProofOfDelivery>> {
        let rows = sqlx::query(
            "select pod_id, shipment_id, signed_by, photo_url, notes, created_at_utc \
             from proof_of_delivery where shipment_id = $1 order by created_at_utc asc",
        )
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend(e, "list_pods failed"))?;

        rows.iter()
            .map(|r| map_pod(r).map_err(StoreError::from))
            .collect()
    }

    async fn update_pod(
        &self,
        id: Uuid,
        update: ProofOfDeliveryUpdate,
    ) -> StoreResult<ProofOfDelivery> {
        let row = sqlx::query(
            "update proof_of_delivery set \
               signed_by = coalesce($2, signed_by), \
               notes = coalesce($3, notes) \
             where pod_id = $1 \
             returning pod_id, shipment_id, signed_by, photo_url, notes, created_at_utc",
        )
        .bind(id)
        .bind(update.signed_by)
        .bind(update.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(e, "update_pod failed"))?;

        match row {
            Some(r) => Ok(map_pod(&r)?),
            None => Err(StoreError::NotFound("pod")),
        }
    }
}
