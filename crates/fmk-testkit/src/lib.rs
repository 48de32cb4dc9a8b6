//! Test support for the marketplace workspace: a deterministic in-memory
//! [`MarketStore`](fmk_db::MarketStore) and fixture builders for the domain
//! entities.

pub mod fixtures;
pub mod mem_store;

pub use fixtures::{posted_shipment, sample_bid, sample_driver, sample_vehicle};
pub use mem_store::MemStore;
