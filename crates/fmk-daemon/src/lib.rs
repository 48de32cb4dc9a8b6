//! HTTP API for the freight marketplace.
//!
//! The binary entry point lives in `main.rs`; everything else is a library so
//! scenario tests can build the router in-process.

pub mod api_types;
pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
