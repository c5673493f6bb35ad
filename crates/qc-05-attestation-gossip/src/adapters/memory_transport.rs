//! In-process transport over `tokio::io::duplex` pipes.
//!
//! Every node joined to a [`MemoryNetwork`] can open streams to every other
//! registered node. Used by tests and single-process simulations.

use crate::domain::GossipError;
use crate::ports::outbound::{BoxedStream, PeerTransport, StreamHandler};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::PeerId;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Per-stream pipe buffer.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Shared registry of in-memory nodes.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    handlers: Arc<RwLock<BTreeMap<PeerId, Weak<dyn StreamHandler>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that dials from `local`.
    pub fn transport(&self, local: PeerId) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }

    /// Makes `peer` reachable; inbound streams go to `handler`.
    ///
    /// Only a weak reference is kept, so dropping the handler disconnects it.
    pub fn register(&self, peer: PeerId, handler: &Arc<dyn StreamHandler>) {
        self.handlers.write().insert(peer, Arc::downgrade(handler));
    }

    pub fn disconnect(&self, peer: &PeerId) {
        self.handlers.write().remove(peer);
    }

    fn handler(&self, peer: &PeerId) -> Option<Arc<dyn StreamHandler>> {
        self.handlers.read().get(peer).and_then(Weak::upgrade)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.handlers
            .read()
            .iter()
            .filter(|(_, handler)| handler.strong_count() > 0)
            .map(|(peer, _)| *peer)
            .collect()
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerId,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.network
            .peers()
            .into_iter()
            .filter(|peer| *peer != self.local)
            .collect()
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxedStream, GossipError> {
        let handler = self
            .network
            .handler(&peer)
            .ok_or(GossipError::UnknownPeer(peer))?;

        let (local_end, remote_end) = tokio::io::duplex(PIPE_CAPACITY);
        let protocol = protocol.to_string();
        let from = self.local;
        trace!(from = %from, to = %peer, protocol = %protocol, "Opening in-memory stream");
        tokio::spawn(async move {
            handler
                .handle_stream(&protocol, from, Box::new(remote_end))
                .await;
        });
        Ok(Box::new(local_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::wire::{read_frame, write_frame};
    use tokio::sync::mpsc;

    struct Echo {
        seen: mpsc::UnboundedSender<(String, PeerId)>,
    }

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle_stream(&self, protocol: &str, peer: PeerId, mut stream: BoxedStream) {
            let _ = self.seen.send((protocol.to_string(), peer));
            let frame = read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, &frame).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stream_reaches_registered_handler() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_public_key(&[1; 32]);
        let b = PeerId::from_public_key(&[2; 32]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn StreamHandler> = Arc::new(Echo { seen: tx });
        network.register(b, &handler);

        let transport = network.transport(a);
        assert_eq!(transport.connected_peers(), vec![b]);

        let mut stream = transport.open_stream(b, "/test/1").await.unwrap();
        write_frame(&mut stream, b"ping").await.unwrap();
        assert_eq!(read_frame(&mut stream).await.unwrap(), b"ping");
        assert_eq!(rx.recv().await.unwrap(), ("/test/1".to_string(), a));
    }

    #[tokio::test]
    async fn test_dropped_handler_is_unreachable() {
        let network = MemoryNetwork::new();
        let a = PeerId::from_public_key(&[1; 32]);
        let b = PeerId::from_public_key(&[2; 32]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn StreamHandler> = Arc::new(Echo { seen: tx });
        network.register(b, &handler);
        drop(handler);

        let transport = network.transport(a);
        assert!(transport.connected_peers().is_empty());
        assert!(matches!(
            transport.open_stream(b, "/test/1").await,
            Err(GossipError::UnknownPeer(_))
        ));
    }
}
