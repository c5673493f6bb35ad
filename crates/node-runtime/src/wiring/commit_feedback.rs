//! # Commit Feedback
//!
//! Closes the loop from consensus back to gossip: every committed quorum
//! event marks the matching votes as committed in the gossip state, which
//! lets the reconcile loop expire them early.
//!
//! Two sources are supported. An in-process node reads the event bus
//! directly; a gossip-only node subscribes over the loopback RPC and
//! resubscribes after a connection failure.

use qc_05_attestation_gossip::AttestationGossip;
use qc_08_enshrined_consensus::RpcClient;
use shared_bus::{ConsensusEvent, EventType, Subscription};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Delay before resubscribing after an RPC failure.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Applies one commit event. Returns the votes marked committed.
pub async fn apply_commit(gossip: &AttestationGossip, event: &ConsensusEvent) -> usize {
    match event.decode_fact() {
        Ok(fact) => {
            let marked = gossip.handle_commit(&fact).await;
            debug!(height = event.height, kind = ?fact.kind(), marked, "Applied commit to gossip");
            marked
        }
        Err(e) => {
            warn!(event_type = ?event.event_type, error = %e, "Undecodable commit event");
            0
        }
    }
}

/// Forwards commits from the in-process event bus until shutdown.
pub async fn forward_local_commits(
    gossip: Arc<AttestationGossip>,
    mut events: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => {
                    apply_commit(&gossip, &event).await;
                }
                None => {
                    warn!("Event bus closed; commit feedback stopped");
                    break;
                }
            }
        }
    }
    info!("Commit feedback stopped");
}

/// Forwards commits from the loopback RPC until shutdown.
pub async fn forward_rpc_commits(
    gossip: Arc<AttestationGossip>,
    rpc: RpcClient,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut subscription = tokio::select! {
            _ = shutdown.changed() => break,
            subscribed = rpc.subscribe(EventType::ALL.to_vec()) => match subscribed {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(addr = %rpc.addr(), error = %e, "Commit subscription failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            }
        };
        info!(addr = %rpc.addr(), "Subscribed to commit events");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Commit feedback stopped");
                    return;
                }
                event = subscription.next() => match event {
                    Ok(event) => {
                        apply_commit(&gossip, &event).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Commit subscription dropped");
                        break;
                    }
                }
            }
        }
    }
    info!("Commit feedback stopped");
}
