//! Loopback RPC client.

use super::{RpcRequest, RpcResponse};
use crate::domain::ConsensusError;
use shared_bus::{ConsensusEvent, EventType};
use shared_types::wire::{read_message, write_message};
use shared_types::QuorumFact;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Submission client holding one reusable connection.
///
/// A failed call drops the connection; the next call reconnects.
pub struct RpcClient {
    addr: SocketAddr,
    request_timeout: Duration,
    connection: Mutex<Option<TcpStream>>,
}

impl RpcClient {
    pub fn new(addr: SocketAddr, request_timeout: Duration) -> Self {
        Self {
            addr,
            request_timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Submits a vote set. Returns the number of votes new to the cache.
    pub async fn submit(&self, fact: QuorumFact) -> Result<usize, ConsensusError> {
        let mut connection = self.connection.lock().await;
        let result = timeout(self.request_timeout, async {
            if connection.is_none() {
                *connection = Some(TcpStream::connect(self.addr).await?);
                debug!(addr = %self.addr, "Connected to consensus RPC");
            }
            let Some(stream) = connection.as_mut() else {
                return Err(ConsensusError::Closed);
            };
            write_message(stream, &RpcRequest::Submit(fact)).await?;
            let response: RpcResponse = read_message(stream).await?;
            Ok::<_, ConsensusError>(response)
        })
        .await
        .unwrap_or_else(|_| {
            Err(ConsensusError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "consensus RPC timed out",
            )))
        });

        match result {
            Ok(RpcResponse::Ack { added }) => Ok(added),
            Ok(RpcResponse::Error(message)) => Err(ConsensusError::Rpc(message)),
            Ok(other) => {
                *connection = None;
                Err(ConsensusError::UnexpectedResponse(format!("{other:?}")))
            }
            Err(e) => {
                *connection = None;
                Err(e)
            }
        }
    }

    /// Opens a dedicated connection streaming commit events of `types`.
    pub async fn subscribe(&self, types: Vec<EventType>) -> Result<RpcSubscription, ConsensusError> {
        let mut stream = TcpStream::connect(self.addr).await?;
        write_message(&mut stream, &RpcRequest::Subscribe(types)).await?;
        match timeout(self.request_timeout, read_message(&mut stream)).await {
            Ok(Ok(RpcResponse::Subscribed)) => Ok(RpcSubscription { stream }),
            Ok(Ok(RpcResponse::Error(message))) => Err(ConsensusError::Rpc(message)),
            Ok(Ok(other)) => Err(ConsensusError::UnexpectedResponse(format!("{other:?}"))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ConsensusError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "subscription handshake timed out",
            ))),
        }
    }
}

/// A live commit-event stream.
pub struct RpcSubscription {
    stream: TcpStream,
}

impl RpcSubscription {
    /// Waits for the next event. Fails once the server closes the stream.
    pub async fn next(&mut self) -> Result<ConsensusEvent, ConsensusError> {
        match read_message(&mut self.stream).await? {
            RpcResponse::Event(event) => Ok(event),
            RpcResponse::Error(message) => Err(ConsensusError::Rpc(message)),
            other => Err(ConsensusError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}
