//! # Enshrined Consensus Metrics
//!
//! Enable with the `metrics` feature.
//!
//! ## Metrics Exported
//!
//! - `enshrined_votes_cached_total` - votes merged into the inject cache, by kind
//! - `enshrined_votes_confirmed_total` - pending votes removed by confirmation, by kind
//! - `enshrined_items_expired_total` - pending items dropped by the TTL pruner
//! - `enshrined_inject_txs_total` - inject transactions handed to proposals

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref VOTES_CACHED: IntCounterVec = register_int_counter_vec!(
        "enshrined_votes_cached_total",
        "Votes merged into the inject cache",
        &["kind"]
    )
    .expect("Failed to create VOTES_CACHED metric");

    pub static ref VOTES_CONFIRMED: IntCounterVec = register_int_counter_vec!(
        "enshrined_votes_confirmed_total",
        "Pending votes removed after ledger confirmation",
        &["kind"]
    )
    .expect("Failed to create VOTES_CONFIRMED metric");

    pub static ref ITEMS_EXPIRED: IntCounter = register_int_counter!(
        "enshrined_items_expired_total",
        "Pending quorum items dropped by the TTL pruner"
    )
    .expect("Failed to create ITEMS_EXPIRED metric");

    pub static ref INJECT_TXS: IntCounter = register_int_counter!(
        "enshrined_inject_txs_total",
        "Inject transactions handed to block proposals"
    )
    .expect("Failed to create INJECT_TXS metric");
}

#[cfg(feature = "metrics")]
pub fn record_votes_cached(kind: &str, count: usize) {
    VOTES_CACHED.with_label_values(&[kind]).inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn record_votes_confirmed(kind: &str, count: usize) {
    VOTES_CONFIRMED.with_label_values(&[kind]).inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn record_items_expired(count: usize) {
    ITEMS_EXPIRED.inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn record_inject_txs(count: usize) {
    INJECT_TXS.inc_by(count as u64);
}

#[cfg(not(feature = "metrics"))]
pub fn record_votes_cached(_kind: &str, _count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_votes_confirmed(_kind: &str, _count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_items_expired(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_inject_txs(_count: usize) {}
