//! Local block production.
//!
//! Stands in for the consensus engine on a node running without one: each
//! tick prepares a proposal from the inject cache and delivers it through
//! admission control at the next height.

use crate::admission::AdmissionControl;
use crate::ports::InjectSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one produced block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub txs: usize,
    pub bytes: usize,
    pub rejected: usize,
    /// Pending votes removed by confirmations.
    pub confirmed: usize,
}

pub struct LocalBlockProducer {
    source: Arc<dyn InjectSource>,
    admission: AdmissionControl,
    max_inject_bytes: usize,
    height: AtomicU64,
}

impl LocalBlockProducer {
    pub fn new(
        source: Arc<dyn InjectSource>,
        admission: AdmissionControl,
        max_inject_bytes: usize,
    ) -> Self {
        Self {
            source,
            admission,
            max_inject_bytes,
            height: AtomicU64::new(0),
        }
    }

    /// Height of the last produced block.
    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn produce_block(&self) -> BlockSummary {
        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        let (txs, bytes) = self.source.proposal_inject_txs(self.max_inject_bytes);

        let mut summary = BlockSummary {
            height,
            txs: txs.len(),
            bytes,
            ..Default::default()
        };
        for raw in &txs {
            match self.admission.deliver(raw, height) {
                Ok(confirmed) => summary.confirmed += confirmed,
                Err(e) => {
                    summary.rejected += 1;
                    warn!(height, error = %e, "Inject tx failed delivery");
                }
            }
        }
        summary
    }

    pub async fn run(self: Arc<Self>, block_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(block_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?block_interval, "Local block production started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(height = self.height(), "Local block production shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let block = self.produce_block();
                    if block.txs > 0 {
                        info!(
                            height = block.height,
                            txs = block.txs,
                            bytes = block.bytes,
                            confirmed = block.confirmed,
                            "Produced block"
                        );
                    } else {
                        debug!(height = block.height, "Produced empty block");
                    }
                }
            }
        }
    }
}
