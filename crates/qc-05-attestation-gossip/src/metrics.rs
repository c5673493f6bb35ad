//! # Gossip Metrics
//!
//! Prometheus counters for vote flow. Enable with the `metrics` feature:
//! ```toml
//! qc-05-attestation-gossip = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `gossip_attestations_accepted_total` - votes added to a fact's state, by kind
//! - `gossip_attestations_rejected_total` - votes refused, by reason
//! - `gossip_quorum_forwards_total` - vote sets delivered to consensus, by kind
//! - `gossip_peer_sends_dropped_total` - peer sends abandoned (busy / failed)
//! - `gossip_batches_flushed_total` - outbound batches serialized and fanned out
//! - `gossip_queued_votes_dropped_total` - local votes refused by a full outbound queue, by kind

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref ATTESTATIONS_ACCEPTED: IntCounterVec = register_int_counter_vec!(
        "gossip_attestations_accepted_total",
        "Votes added to a fact's attestation state",
        &["kind"]
    )
    .expect("Failed to create ATTESTATIONS_ACCEPTED metric");

    pub static ref ATTESTATIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "gossip_attestations_rejected_total",
        "Votes refused by the gossip layer",
        &["reason"]
    )
    .expect("Failed to create ATTESTATIONS_REJECTED metric");

    pub static ref QUORUM_FORWARDS: IntCounterVec = register_int_counter_vec!(
        "gossip_quorum_forwards_total",
        "Quorum vote sets delivered to the local consensus node",
        &["kind"]
    )
    .expect("Failed to create QUORUM_FORWARDS metric");

    pub static ref PEER_SENDS_DROPPED: IntCounter = register_int_counter!(
        "gossip_peer_sends_dropped_total",
        "Peer sends abandoned because the peer was busy or the send failed"
    )
    .expect("Failed to create PEER_SENDS_DROPPED metric");

    pub static ref BATCHES_FLUSHED: IntCounter = register_int_counter!(
        "gossip_batches_flushed_total",
        "Outbound vote batches fanned out to peers"
    )
    .expect("Failed to create BATCHES_FLUSHED metric");

    pub static ref QUEUED_VOTES_DROPPED: IntCounterVec = register_int_counter_vec!(
        "gossip_queued_votes_dropped_total",
        "Local votes dropped because the outbound queue was full",
        &["kind"]
    )
    .expect("Failed to create QUEUED_VOTES_DROPPED metric");
}

#[cfg(feature = "metrics")]
pub fn record_attestation_accepted(kind: &str) {
    ATTESTATIONS_ACCEPTED.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_attestation_rejected(reason: &str) {
    ATTESTATIONS_REJECTED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_quorum_forward(kind: &str) {
    QUORUM_FORWARDS.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_peer_send_dropped() {
    PEER_SENDS_DROPPED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_batch_flushed() {
    BATCHES_FLUSHED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_queued_vote_dropped(kind: &str) {
    QUEUED_VOTES_DROPPED.with_label_values(&[kind]).inc();
}

#[cfg(not(feature = "metrics"))]
pub fn record_attestation_accepted(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_attestation_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_quorum_forward(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_peer_send_dropped() {}

#[cfg(not(feature = "metrics"))]
pub fn record_batch_flushed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_queued_vote_dropped(_kind: &str) {}
