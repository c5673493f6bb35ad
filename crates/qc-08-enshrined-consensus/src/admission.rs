//! # Admission Control
//!
//! Gates how quorum facts enter the ledger.
//!
//! - **Ante check**: an ordinary transaction may never carry a quorum message.
//!   An inject transaction is admitted only during block delivery, only when
//!   signed by the placeholder inject account, and only with exactly one
//!   quorum message.
//! - **Post-deliver hook**: each quorum message of a delivered inject
//!   transaction is confirmed against the inject cache.

use crate::domain::{AdmissionError, ConsensusError};
use crate::ports::ConfirmationSink;
use shared_types::{ExecMode, LedgerTx, TxKind, INJECT_SIGNER};
use std::sync::Arc;
use tracing::{debug, warn};

/// Validates a transaction before execution in `mode`.
pub fn ante_check(tx: &LedgerTx, mode: ExecMode) -> Result<(), AdmissionError> {
    let quorum_msgs = tx.quorum_facts().count();
    match tx.kind {
        TxKind::Standard => {
            if quorum_msgs > 0 {
                return Err(AdmissionError::quorum_outside_inject());
            }
        }
        TxKind::Inject => {
            if mode != ExecMode::Deliver {
                return Err(AdmissionError::inject_outside_deliver());
            }
            if tx.signer != INJECT_SIGNER {
                return Err(AdmissionError::inject_signer(tx.kind));
            }
            if tx.msgs.len() != 1 || quorum_msgs != 1 {
                return Err(AdmissionError::inject_shape(tx.msgs.len(), quorum_msgs));
            }
        }
    }
    Ok(())
}

/// Ante check plus confirmation feedback into the inject cache.
#[derive(Clone)]
pub struct AdmissionControl {
    sink: Arc<dyn ConfirmationSink>,
}

impl AdmissionControl {
    pub fn new(sink: Arc<dyn ConfirmationSink>) -> Self {
        Self { sink }
    }

    pub fn ante(&self, tx: &LedgerTx, mode: ExecMode) -> Result<(), AdmissionError> {
        ante_check(tx, mode)
    }

    /// Confirms every quorum message of a successfully delivered inject
    /// transaction. Returns the pending votes removed.
    pub fn post_deliver(&self, tx: &LedgerTx, height: u64) -> usize {
        if tx.kind != TxKind::Inject {
            return 0;
        }
        tx.quorum_facts()
            .map(|fact| self.sink.confirm(fact, height))
            .sum()
    }

    /// Decodes, checks and delivers one raw transaction at `height`.
    pub fn deliver(&self, raw: &[u8], height: u64) -> Result<usize, ConsensusError> {
        let tx = LedgerTx::decode(raw)?;
        if let Err(e) = self.ante(&tx, ExecMode::Deliver) {
            warn!(height, kind = ?tx.kind, error = %e, "Rejected transaction at delivery");
            return Err(e.into());
        }
        let confirmed = self.post_deliver(&tx, height);
        debug!(height, kind = ?tx.kind, confirmed, "Delivered transaction");
        Ok(confirmed)
    }
}
