//! Error types for the enshrined consensus subsystem.

use shared_types::{TxKind, TypesError};
use thiserror::Error;

/// Rejections at the ledger boundary.
///
/// Always authorization-class: the transaction is refused, never silently
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AdmissionError {
    pub(crate) fn quorum_outside_inject() -> Self {
        Self::Unauthorized("quorum messages are only valid inside inject transactions".into())
    }

    pub(crate) fn inject_outside_deliver() -> Self {
        Self::Unauthorized("inject transactions are only admitted during block delivery".into())
    }

    pub(crate) fn inject_shape(msgs: usize, quorum: usize) -> Self {
        Self::Unauthorized(format!(
            "inject transaction must carry exactly one quorum message (msgs: {msgs}, quorum: {quorum})"
        ))
    }

    pub(crate) fn inject_signer(kind: TxKind) -> Self {
        Self::Unauthorized(format!("{kind:?} transaction signed by the wrong account"))
    }
}

/// Consensus subsystem errors.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Codec error: {0}")]
    Codec(#[from] TypesError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The RPC peer answered with an error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The RPC peer sent a response that does not fit the request.
    #[error("Unexpected RPC response: {0}")]
    UnexpectedResponse(String),

    #[error("Connection closed")]
    Closed,
}
