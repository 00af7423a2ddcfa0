//! Link-shared polls with one vote per participant and live tallies.
//!
//! The interesting parts are the vote ledger (dedup by fingerprint, enforced
//! by the store), the tally counters (only ever bumped by the store itself)
//! and the change feed that tells open views to reload.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod session;
pub mod voting;
