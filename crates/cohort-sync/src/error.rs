//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur while exchanging protocol messages.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A privileged sync payload contradicts what the receiver can validate.
    #[error("malformed privileged sync: {0}")]
    MalformedSync(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] cohort_store::StoreError),

    /// Signature, encoding or decoding failure.
    #[error("core error: {0}")]
    CoreError(#[from] cohort_core::CoreError),

    /// No matching event arrived in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The event stream a waiter was attached to was closed.
    #[error("subscription closed")]
    SubscriptionClosed,

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
