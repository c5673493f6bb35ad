//! # Bulk State Sync
//!
//! Pull protocol for catching up on another validator's outstanding votes.
//! Every message is one length-prefixed frame whose first byte is an op code;
//! acknowledgments are plain string frames.
//!
//! ```text
//! Requester                                   Responder
//!    │ ── [0x01] send-state ───────────────────→ │  snapshot all four maps
//!    │ ←──────────────── [0x02][count: u32 LE] ─ │  begin
//!    │ ── "ack_begin" (or "done" if count = 0) → │
//!    │ ←─── [0x03][batch: u32 LE][len: u32 LE] ─ │  header  ┐
//!    │ ── "ack_header" ────────────────────────→ │          │ per batch
//!    │ ←──────────────────── [0x04][payload] ─── │  data    │
//!    │ ── "ack_data" ──────────────────────────→ │          ┘
//!    │ ←────────────────────────────── [0x05] ── │  end
//!    │ ── "done" ──────────────────────────────→ │
//! ```
//!
//! Each step waits for its ack before the next is sent. The requester only
//! applies a batch once its data frame has been fully received, so an abort
//! at any point leaves nothing half-applied.

use crate::domain::GossipError;
use shared_types::wire::{expect_ack, read_frame, write_ack, write_frame};
use shared_types::QuorumState;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};

pub const OP_SEND_STATE: u8 = 0x01;
pub const OP_BATCH_BEGIN: u8 = 0x02;
pub const OP_BATCH_HEADER: u8 = 0x03;
pub const OP_BATCH_DATA: u8 = 0x04;
pub const OP_BATCH_END: u8 = 0x05;

pub const ACK_BEGIN: &str = "ack_begin";
pub const ACK_HEADER: &str = "ack_header";
pub const ACK_DATA: &str = "ack_data";
pub const ACK_DONE: &str = "done";

/// One op-code framed sync message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFrame {
    SendState,
    Begin { total_batches: u32 },
    Header { batch: u32, len: u32 },
    Data(Vec<u8>),
    End,
}

impl SyncFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncFrame::SendState => vec![OP_SEND_STATE],
            SyncFrame::Begin { total_batches } => {
                let mut out = vec![OP_BATCH_BEGIN];
                out.extend_from_slice(&total_batches.to_le_bytes());
                out
            }
            SyncFrame::Header { batch, len } => {
                let mut out = vec![OP_BATCH_HEADER];
                out.extend_from_slice(&batch.to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
                out
            }
            SyncFrame::Data(payload) => {
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.push(OP_BATCH_DATA);
                out.extend_from_slice(payload);
                out
            }
            SyncFrame::End => vec![OP_BATCH_END],
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, GossipError> {
        let (&op, body) = frame
            .split_first()
            .ok_or_else(|| GossipError::Protocol("empty sync frame".into()))?;
        match op {
            OP_SEND_STATE if body.is_empty() => Ok(SyncFrame::SendState),
            OP_BATCH_BEGIN => Ok(SyncFrame::Begin {
                total_batches: read_u32(body, 0)?,
            }),
            OP_BATCH_HEADER => Ok(SyncFrame::Header {
                batch: read_u32(body, 0)?,
                len: read_u32(body, 4)?,
            }),
            OP_BATCH_DATA => Ok(SyncFrame::Data(body.to_vec())),
            OP_BATCH_END if body.is_empty() => Ok(SyncFrame::End),
            other => Err(GossipError::Protocol(format!(
                "unexpected sync op 0x{other:02x} ({} byte body)",
                body.len()
            ))),
        }
    }
}

fn read_u32(body: &[u8], offset: usize) -> Result<u32, GossipError> {
    body.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| GossipError::Protocol("truncated sync frame".into()))
}

async fn step<F, T>(step_timeout: Duration, fut: F) -> Result<T, GossipError>
where
    F: Future<Output = Result<T, GossipError>>,
{
    timeout(step_timeout, fut)
        .await
        .map_err(|_| GossipError::Protocol("sync step timed out".into()))?
}

async fn send<S>(stream: &mut S, frame: SyncFrame, step_timeout: Duration) -> Result<(), GossipError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    step(step_timeout, async {
        write_frame(stream, &frame.encode()).await?;
        Ok::<(), GossipError>(())
    })
    .await
}

async fn recv<S>(stream: &mut S, step_timeout: Duration) -> Result<SyncFrame, GossipError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    step(step_timeout, async {
        let frame = read_frame(stream).await?;
        SyncFrame::decode(&frame)
    })
    .await
}

async fn ack<S>(stream: &mut S, reply: &str, step_timeout: Duration) -> Result<(), GossipError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    step(step_timeout, async {
        write_ack(stream, reply).await?;
        Ok::<(), GossipError>(())
    })
    .await
}

async fn await_ack<S>(stream: &mut S, expected: &str, step_timeout: Duration) -> Result<(), GossipError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    step(step_timeout, async {
        expect_ack(stream, expected).await?;
        Ok::<(), GossipError>(())
    })
    .await
}

/// Number of batches needed to ship `state` at `per_batch` items per kind.
pub fn total_batches(state: &QuorumState, per_batch: usize) -> usize {
    state.max_kind_len().div_ceil(per_batch.max(1))
}

/// Responder side, entered after the `send-state` request has been read.
///
/// Returns the number of batches delivered.
pub async fn serve_state<S>(
    stream: &mut S,
    state: &QuorumState,
    per_batch: usize,
    step_timeout: Duration,
) -> Result<usize, GossipError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let per_batch = per_batch.max(1);
    let total = total_batches(state, per_batch);
    let total_u32 = u32::try_from(total)
        .map_err(|_| GossipError::Protocol(format!("too many sync batches: {total}")))?;

    send(stream, SyncFrame::Begin { total_batches: total_u32 }, step_timeout).await?;
    if total == 0 {
        await_ack(stream, ACK_DONE, step_timeout).await?;
        return Ok(0);
    }
    await_ack(stream, ACK_BEGIN, step_timeout).await?;

    for index in 0..total {
        let payload = bincode::serialize(&state.chunk(index, per_batch))
            .map_err(|e| GossipError::Wire(e.into()))?;
        let header = SyncFrame::Header {
            batch: index as u32,
            len: payload.len() as u32,
        };
        send(stream, header, step_timeout).await?;
        await_ack(stream, ACK_HEADER, step_timeout).await?;
        send(stream, SyncFrame::Data(payload), step_timeout).await?;
        await_ack(stream, ACK_DATA, step_timeout).await?;
    }

    send(stream, SyncFrame::End, step_timeout).await?;
    await_ack(stream, ACK_DONE, step_timeout).await?;
    Ok(total)
}

/// Requester side: asks for the peer's state and hands every fully received
/// batch to `apply`, in order.
///
/// Returns the number of batches received.
pub async fn request_state<S, F, Fut>(
    stream: &mut S,
    step_timeout: Duration,
    mut apply: F,
) -> Result<usize, GossipError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    F: FnMut(QuorumState) -> Fut,
    Fut: Future<Output = ()>,
{
    send(stream, SyncFrame::SendState, step_timeout).await?;

    let total = match recv(stream, step_timeout).await? {
        SyncFrame::Begin { total_batches } => total_batches,
        other => return Err(unexpected("begin", &other)),
    };
    if total == 0 {
        ack(stream, ACK_DONE, step_timeout).await?;
        return Ok(0);
    }
    ack(stream, ACK_BEGIN, step_timeout).await?;

    for expected in 0..total {
        let len = match recv(stream, step_timeout).await? {
            SyncFrame::Header { batch, len } if batch == expected => len,
            other => return Err(unexpected("header", &other)),
        };
        ack(stream, ACK_HEADER, step_timeout).await?;

        let payload = match recv(stream, step_timeout).await? {
            SyncFrame::Data(payload) if payload.len() == len as usize => payload,
            other => return Err(unexpected("data", &other)),
        };
        let batch: QuorumState =
            bincode::deserialize(&payload).map_err(|e| GossipError::Wire(e.into()))?;
        ack(stream, ACK_DATA, step_timeout).await?;

        apply(batch).await;
    }

    match recv(stream, step_timeout).await? {
        SyncFrame::End => {}
        other => return Err(unexpected("end", &other)),
    }
    ack(stream, ACK_DONE, step_timeout).await?;
    Ok(total as usize)
}

fn unexpected(expected: &str, got: &SyncFrame) -> GossipError {
    let got = match got {
        SyncFrame::SendState => "send-state".to_string(),
        SyncFrame::Begin { total_batches } => format!("begin({total_batches})"),
        SyncFrame::Header { batch, len } => format!("header({batch}, {len})"),
        SyncFrame::Data(payload) => format!("data({} bytes)", payload.len()),
        SyncFrame::End => "end".to_string(),
    };
    GossipError::Protocol(format!("expected {expected}, got {got}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Attestation, ErrataTx, NetworkFee, Quorum};
    use std::sync::{Arc, Mutex};

    const STEP: Duration = Duration::from_secs(5);

    fn state(fees: u64, errata: usize) -> QuorumState {
        QuorumState {
            network_fees: (0..fees)
                .map(|h| {
                    Quorum::new(
                        NetworkFee {
                            chain: "ETH".into(),
                            height: h,
                            transaction_size: 1,
                            transaction_rate: 1,
                        },
                        vec![Attestation::new([1; 32], [h as u8; 64])],
                    )
                })
                .collect(),
            errata: (0..errata)
                .map(|i| {
                    Quorum::new(
                        ErrataTx {
                            chain: "BTC".into(),
                            tx_id: format!("{i}"),
                        },
                        vec![],
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(
            SyncFrame::Begin { total_batches: 2 }.encode(),
            vec![OP_BATCH_BEGIN, 2, 0, 0, 0]
        );
        assert_eq!(
            SyncFrame::Header { batch: 1, len: 258 }.encode(),
            vec![OP_BATCH_HEADER, 1, 0, 0, 0, 2, 1, 0, 0]
        );
        assert_eq!(
            SyncFrame::decode(&[OP_BATCH_HEADER, 1, 0, 0, 0, 2, 1, 0, 0]).unwrap(),
            SyncFrame::Header { batch: 1, len: 258 }
        );
        assert!(SyncFrame::decode(&[OP_BATCH_BEGIN, 1]).is_err());
        assert!(SyncFrame::decode(&[0x7F]).is_err());
        assert!(SyncFrame::decode(&[]).is_err());
    }

    #[test]
    fn test_total_batches_uses_longest_kind() {
        assert_eq!(total_batches(&state(0, 0), 10), 0);
        assert_eq!(total_batches(&state(10, 3), 10), 1);
        assert_eq!(total_batches(&state(11, 3), 10), 2);
        assert_eq!(total_batches(&state(5, 21), 10), 3);
    }

    #[tokio::test]
    async fn test_full_exchange_delivers_every_item() {
        let (mut requester, mut responder) = tokio::io::duplex(1 << 16);
        let source = state(5, 2);
        let expected = source.clone();

        let server = tokio::spawn(async move {
            let request = SyncFrame::decode(&read_frame(&mut responder).await.unwrap()).unwrap();
            assert_eq!(request, SyncFrame::SendState);
            serve_state(&mut responder, &source, 2, STEP).await
        });

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let batches = request_state(&mut requester, STEP, |batch| {
            sink.lock().unwrap().push(batch);
            async {}
        })
        .await
        .unwrap();

        assert_eq!(batches, 3);
        assert_eq!(server.await.unwrap().unwrap(), 3);

        let received = received.lock().unwrap();
        let fees: Vec<_> = received.iter().flat_map(|b| b.network_fees.clone()).collect();
        let errata: Vec<_> = received.iter().flat_map(|b| b.errata.clone()).collect();
        assert_eq!(fees, expected.network_fees);
        assert_eq!(errata, expected.errata);
    }

    #[tokio::test]
    async fn test_empty_state_finishes_with_done() {
        let (mut requester, mut responder) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            read_frame(&mut responder).await.unwrap();
            serve_state(&mut responder, &QuorumState::default(), 10, STEP).await
        });

        let batches = request_state(&mut requester, STEP, |_| async {}).await.unwrap();
        assert_eq!(batches, 0);
        assert_eq!(server.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_ack_aborts_responder() {
        let (mut requester, mut responder) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_state(&mut responder, &state(3, 0), 10, STEP).await
        });

        // Reply to begin with the wrong ack.
        let begin = SyncFrame::decode(&read_frame(&mut requester).await.unwrap()).unwrap();
        assert_eq!(begin, SyncFrame::Begin { total_batches: 1 });
        write_ack(&mut requester, ACK_HEADER).await.unwrap();

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, GossipError::Wire(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_header_aborts_requester_before_apply() {
        let (mut requester, mut responder) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            read_frame(&mut responder).await.unwrap();
            write_frame(&mut responder, &SyncFrame::Begin { total_batches: 2 }.encode())
                .await
                .unwrap();
            expect_ack(&mut responder, ACK_BEGIN).await.unwrap();
            let bad = SyncFrame::Header { batch: 1, len: 4 }.encode();
            write_frame(&mut responder, &bad).await.unwrap();
        });

        let applied = Arc::new(Mutex::new(0));
        let counter = applied.clone();
        let err = request_state(&mut requester, STEP, |_| {
            *counter.lock().unwrap() += 1;
            async {}
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GossipError::Protocol(_)));
        assert_eq!(*applied.lock().unwrap(), 0);
        server.await.unwrap();
    }
}
