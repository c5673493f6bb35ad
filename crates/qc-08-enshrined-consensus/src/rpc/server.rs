//! Loopback RPC server.

use super::{RpcRequest, RpcResponse};
use crate::domain::ConsensusError;
use crate::service::EnshrinedBifrost;
use shared_bus::{EventFilter, InMemoryEventBus};
use shared_types::wire::{read_message, write_message};
use shared_types::TypesError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct LocalRpcServer {
    listener: TcpListener,
    bifrost: Arc<EnshrinedBifrost>,
    bus: Arc<InMemoryEventBus>,
}

impl LocalRpcServer {
    pub async fn bind(
        addr: SocketAddr,
        bifrost: Arc<EnshrinedBifrost>,
        bus: Arc<InMemoryEventBus>,
    ) -> Result<Self, ConsensusError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            bifrost,
            bus,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConsensusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Loopback RPC server listening"),
            Err(e) => warn!(error = %e, "Loopback RPC server address unavailable"),
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Loopback RPC server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let connection = Connection {
                            stream,
                            remote,
                            bifrost: self.bifrost.clone(),
                            bus: self.bus.clone(),
                        };
                        tokio::spawn(connection.serve(shutdown.clone()));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept RPC connection"),
                },
            }
        }
    }
}

struct Connection {
    stream: TcpStream,
    remote: SocketAddr,
    bifrost: Arc<EnshrinedBifrost>,
    bus: Arc<InMemoryEventBus>,
}

impl Connection {
    async fn serve(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(remote = %self.remote, "RPC connection opened");
        loop {
            let request = tokio::select! {
                _ = shutdown.changed() => break,
                request = read_message::<_, RpcRequest>(&mut self.stream) => request,
            };

            let result = match request {
                Ok(RpcRequest::Submit(fact)) => {
                    let added = self.bifrost.add_quorum(fact);
                    write_message(&mut self.stream, &RpcResponse::Ack { added }).await
                }
                Ok(RpcRequest::Subscribe(types)) => {
                    self.stream_events(types, shutdown.clone()).await;
                    break;
                }
                Err(TypesError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!(remote = %self.remote, error = %e, "Malformed RPC request");
                    let _ = write_message(&mut self.stream, &RpcResponse::Error(e.to_string())).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!(remote = %self.remote, error = %e, "Failed to write RPC response");
                break;
            }
        }
        debug!(remote = %self.remote, "RPC connection closed");
    }

    async fn stream_events(&mut self, types: Vec<shared_bus::EventType>, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = self.bus.subscribe(EventFilter::types(types));
        if let Err(e) = write_message(&mut self.stream, &RpcResponse::Subscribed).await {
            debug!(remote = %self.remote, error = %e, "Failed to confirm subscription");
            return;
        }
        debug!(remote = %self.remote, filter = ?subscription.filter(), "Event subscriber attached");

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => return,
                event = subscription.recv() => event,
            };
            let Some(event) = event else {
                return;
            };
            if let Err(e) = write_message(&mut self.stream, &RpcResponse::Event(event)).await {
                debug!(remote = %self.remote, error = %e, "Event subscriber went away");
                return;
            }
        }
    }
}
