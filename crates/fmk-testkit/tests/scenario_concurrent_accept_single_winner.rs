//! The §4.2 race, exercised for real: two tasks accept two different bids on
//! the same shipment concurrently. Exactly one must win; the loser gets a
//! conflict and the winner's `accepted_bid_id` is never overwritten.

use std::sync::Arc;

use fmk_db::{MarketStore, StoreError};
use fmk_schemas::{BidStatus, ShipmentStatus};
use fmk_testkit::{posted_shipment, sample_bid, MemStore};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_exactly_one_wins() {
    // Run the race many times; a single lucky interleaving proves nothing.
    for _ in 0..50 {
        let store = Arc::new(MemStore::new());
        let shipper = Uuid::new_v4();

        let shipment = store
            .create_shipment(posted_shipment(shipper))
            .await
            .unwrap();
        let bid_a = store
            .create_bid(sample_bid(shipment.shipment_id, Uuid::new_v4(), 300_000))
            .await
            .unwrap();
        let bid_b = store
            .create_bid(sample_bid(shipment.shipment_id, Uuid::new_v4(), 290_000))
            .await
            .unwrap();

        let (sa, sb) = (Arc::clone(&store), Arc::clone(&store));
        let (sid, a_id, b_id) = (shipment.shipment_id, bid_a.bid_id, bid_b.bid_id);

        let ta = tokio::spawn(async move { sa.accept_bid(sid, a_id).await });
        let tb = tokio::spawn(async move { sb.accept_bid(sid, b_id).await });

        let ra = ta.await.unwrap();
        let rb = tb.await.unwrap();

        let winners = [ra.is_ok(), rb.is_ok()].iter().filter(|w| **w).count();
        assert_eq!(winners, 1, "exactly one accept must win");

        let loser_err = if ra.is_ok() {
            rb.unwrap_err()
        } else {
            ra.unwrap_err()
        };
        assert!(
            matches!(loser_err, StoreError::Conflict(_)),
            "loser must observe a conflict, got: {loser_err}"
        );

        let after = store
            .get_shipment(shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, ShipmentStatus::Assigned);

        let winning_bid = after.accepted_bid_id.expect("winner recorded");
        assert!(winning_bid == a_id || winning_bid == b_id);

        // The losing bid must be terminal (auto-rejected by the winner's
        // transaction), never accepted.
        let losing_id = if winning_bid == a_id { b_id } else { a_id };
        let losing_bid = store.get_bid(losing_id).await.unwrap().unwrap();
        assert_eq!(losing_bid.status, BidStatus::Rejected);
    }
}

#[tokio::test]
async fn accept_after_accept_is_a_conflict_not_an_overwrite() {
    let store = MemStore::new();
    let shipment = store
        .create_shipment(posted_shipment(Uuid::new_v4()))
        .await
        .unwrap();
    let bid_a = store
        .create_bid(sample_bid(shipment.shipment_id, Uuid::new_v4(), 310_000))
        .await
        .unwrap();
    let bid_b = store
        .create_bid(sample_bid(shipment.shipment_id, Uuid::new_v4(), 305_000))
        .await
        .unwrap();

    let outcome = store
        .accept_bid(shipment.shipment_id, bid_a.bid_id)
        .await
        .unwrap();
    assert_eq!(outcome.auto_rejected.len(), 1);

    let err = store
        .accept_bid(shipment.shipment_id, bid_b.bid_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let after = store
        .get_shipment(shipment.shipment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.accepted_bid_id, Some(bid_a.bid_id));
    assert_eq!(after.carrier_id, Some(bid_a.carrier_id));
}
