//! Transport abstraction for protocol messages.
//!
//! The transport delivers signed envelopes between identities. Whatever
//! carries them (pubsub, relays, direct links) lives behind [`Transport`].

use async_trait::async_trait;

use crate::envelope::SignedEnvelope;
use crate::error::SyncError;
use crate::messages::NodeId;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Transport trait for sending and receiving envelopes.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an envelope to a specific peer.
    async fn send(&self, peer: &NodeId, envelope: SignedEnvelope) -> Result<()>;

    /// Receive the next envelope from any peer.
    ///
    /// The sender is carried in [`SignedEnvelope::sender`].
    async fn recv(&self) -> Result<SignedEnvelope>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before an envelope arrives.
    async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<SignedEnvelope>>;

    /// Broadcast an envelope to all connected peers.
    async fn broadcast(&self, envelope: SignedEnvelope) -> Result<()>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;

    /// Check if a specific peer is connected.
    async fn is_connected(&self, peer: &NodeId) -> bool;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate message passing between identities.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Sender channels for each node.
        senders: RwLock<HashMap<NodeId, mpsc::Sender<SignedEnvelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);

            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: RwLock::new(rx),
            }
        }

        /// Take a node offline. Envelopes sent to it fail until it reconnects.
        pub async fn disconnect(&self, node_id: &NodeId) -> bool {
            self.senders.write().await.remove(node_id).is_some()
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: RwLock<mpsc::Receiver<SignedEnvelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, envelope: SignedEnvelope) -> Result<()> {
            let senders = self.network.senders.read().await;
            let sender = senders
                .get(peer)
                .ok_or_else(|| SyncError::PeerNotConnected(peer.to_hex()))?;
            sender
                .send(envelope)
                .await
                .map_err(|_| SyncError::TransportError("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<SignedEnvelope> {
            let mut rx = self.receiver.write().await;
            rx.recv()
                .await
                .ok_or_else(|| SyncError::TransportError("channel closed".into()))
        }

        async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<SignedEnvelope>> {
            let mut rx = self.receiver.write().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some(envelope)),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        async fn broadcast(&self, envelope: SignedEnvelope) -> Result<()> {
            let senders = self.network.senders.read().await;
            for (peer_id, sender) in senders.iter() {
                if peer_id != &self.node_id {
                    // Peers that went away miss the broadcast.
                    let _ = sender.send(envelope.clone()).await;
                }
            }
            Ok(())
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let senders = self.network.senders.read().await;
            Ok(senders
                .keys()
                .filter(|id| *id != &self.node_id)
                .copied()
                .collect())
        }

        async fn is_connected(&self, peer: &NodeId) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}
