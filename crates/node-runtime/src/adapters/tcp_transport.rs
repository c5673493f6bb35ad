//! # TCP Peer Transport
//!
//! One TCP connection per stream. The dialer opens with a framed
//! [`StreamHello`] naming the protocol and its own peer id; the listener
//! reads it and hands the rest of the connection to the gossip
//! [`StreamHandler`].
//!
//! Peers come from the static peer book in the node config.

use async_trait::async_trait;
use qc_05_attestation_gossip::{BoxedStream, GossipError, PeerTransport, StreamHandler};
use serde::{Deserialize, Serialize};
use shared_types::wire::{read_message, write_message};
use shared_types::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// First frame on every peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHello {
    pub protocol: String,
    pub peer: PeerId,
}

/// Dials peers from a static address book.
pub struct TcpPeerTransport {
    local: PeerId,
    peers: HashMap<PeerId, SocketAddr>,
    dial_timeout: Duration,
}

impl TcpPeerTransport {
    pub fn new(local: PeerId, peers: HashMap<PeerId, SocketAddr>, dial_timeout: Duration) -> Self {
        Self {
            local,
            peers,
            dial_timeout,
        }
    }
}

#[async_trait]
impl PeerTransport for TcpPeerTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .keys()
            .filter(|peer| **peer != self.local)
            .copied()
            .collect()
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxedStream, GossipError> {
        let addr = *self.peers.get(&peer).ok_or(GossipError::UnknownPeer(peer))?;
        let mut stream = timeout(self.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GossipError::Timeout(peer))??;
        stream.set_nodelay(true)?;

        let hello = StreamHello {
            protocol: protocol.to_string(),
            peer: self.local,
        };
        write_message(&mut stream, &hello).await?;
        debug!(peer = %peer, addr = %addr, protocol, "Opened peer stream");
        Ok(Box::new(stream))
    }
}

/// Accepts peer connections and dispatches them by protocol.
pub struct TcpPeerListener {
    listener: TcpListener,
    handler: Arc<dyn StreamHandler>,
    hello_timeout: Duration,
}

impl TcpPeerListener {
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn StreamHandler>,
        hello_timeout: Duration,
    ) -> std::io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            handler,
            hello_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Peer listener started");
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Peer listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tokio::spawn(dispatch(
                            stream,
                            remote,
                            self.handler.clone(),
                            self.hello_timeout,
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept peer connection"),
                }
            }
        }
    }
}

async fn dispatch(
    mut stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn StreamHandler>,
    hello_timeout: Duration,
) {
    let hello: StreamHello = match timeout(hello_timeout, read_message(&mut stream)).await {
        Ok(Ok(hello)) => hello,
        Ok(Err(e)) => {
            warn!(remote = %remote, error = %e, "Malformed stream hello");
            return;
        }
        Err(_) => {
            warn!(remote = %remote, "Timed out waiting for stream hello");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(remote = %remote, error = %e, "Failed to set TCP_NODELAY");
    }
    debug!(remote = %remote, peer = %hello.peer, protocol = %hello.protocol, "Accepted peer stream");
    handler
        .handle_stream(&hello.protocol, hello.peer, Box::new(stream))
        .await;
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

    fn peer(n: u8) -> PeerId {
        PeerId::from_public_key(&[n; 32])
    }

    #[tokio::test]
    async fn test_stream_round_trips_through_listener() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = TcpPeerListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(Echo { seen: tx }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(listener.run(shutdown_rx));

        let transport = TcpPeerTransport::new(
            peer(1),
            [(peer(1), addr), (peer(2), addr)].into_iter().collect(),
            Duration::from_secs(1),
        );
        assert_eq!(transport.connected_peers(), vec![peer(2)]);

        let mut stream = transport.open_stream(peer(2), "/test/1").await.unwrap();
        write_frame(&mut stream, b"ping").await.unwrap();
        assert_eq!(read_frame(&mut stream).await.unwrap(), b"ping");
        assert_eq!(rx.recv().await.unwrap(), ("/test/1".to_string(), peer(1)));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_peer_rejected() {
        let transport = TcpPeerTransport::new(peer(1), HashMap::new(), Duration::from_secs(1));
        assert!(matches!(
            transport.open_stream(peer(2), "/test/1").await,
            Err(GossipError::UnknownPeer(_))
        ));
    }
}
