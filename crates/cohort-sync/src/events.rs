//! Community event stream.
//!
//! Callers that need to wait for something (a peer's answer, a key, a
//! description update) subscribe to the [`EventBus`] and wait for a matching
//! event with a bounded timeout instead of blocking on community state.
//!
//! Each subscriber owns a bounded channel. A subscriber that stops draining
//! its channel misses events; publishers never block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cohort_core::{CommunityId, DescriptionChanges, KeyId, PublicKey, RequestId, RequestState};
use cohort_perms::{EncryptionKeyActions, KeyScope};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// How long a single wait step lasts unless the caller says otherwise.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default capacity of each subscriber channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Something that happened to a community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityEvent {
    /// A new description was applied.
    DescriptionChanged {
        community_id: CommunityId,
        clock: u64,
        changes: Arc<DescriptionChanges>,
    },
    /// Key actions were computed after a membership change.
    KeyActionsComputed {
        community_id: CommunityId,
        actions: Arc<EncryptionKeyActions>,
    },
    /// A member was removed by reevaluation, a kick or a ban.
    MemberKicked {
        community_id: CommunityId,
        member: PublicKey,
    },
    /// A request to join changed state.
    RequestStateChanged {
        community_id: CommunityId,
        request_id: RequestId,
        requester: PublicKey,
        state: RequestState,
    },
    /// A key wrapped for the local identity was stored.
    KeyReceived {
        community_id: CommunityId,
        scope: KeyScope,
        key_id: KeyId,
    },
    /// The control node told us to reveal accounts again.
    RejoinRequested { community_id: CommunityId },
}

impl CommunityEvent {
    pub fn community_id(&self) -> CommunityId {
        match self {
            CommunityEvent::DescriptionChanged { community_id, .. }
            | CommunityEvent::KeyActionsComputed { community_id, .. }
            | CommunityEvent::MemberKicked { community_id, .. }
            | CommunityEvent::RequestStateChanged { community_id, .. }
            | CommunityEvent::KeyReceived { community_id, .. }
            | CommunityEvent::RejoinRequested { community_id } => *community_id,
        }
    }
}

/// Handle of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    /// `None` receives events of every community.
    community: Option<CommunityId>,
    sender: mpsc::Sender<CommunityEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out of community events to registered subscribers.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Receive events of one community.
    pub fn subscribe(&self, community: CommunityId) -> Subscription {
        self.register(Some(community))
    }

    /// Receive events of every community.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    fn register(&self, community: Option<CommunityId>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut registry = lock(&self.registry);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.subscribers.insert(id, Subscriber { community, sender });
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deregister a subscriber. Its waiters see [`SyncError::SubscriptionClosed`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.registry).subscribers.remove(&id).is_some()
    }

    /// Close every subscription scoped to `community`.
    pub fn close_community(&self, community: &CommunityId) -> usize {
        let mut registry = lock(&self.registry);
        let before = registry.subscribers.len();
        registry
            .subscribers
            .retain(|_, s| s.community.as_ref() != Some(community));
        before - registry.subscribers.len()
    }

    /// Deliver `event` to matching subscribers. Returns how many received it.
    pub fn publish(&self, event: CommunityEvent) -> usize {
        let community = event.community_id();
        let mut registry = lock(&self.registry);
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, subscriber) in &registry.subscribers {
            if subscriber.community.is_some_and(|c| c != community) {
                continue;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(community = %community, subscription = id.0, "subscriber channel full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            debug!(subscription = id.0, "dropping closed subscriber");
            registry.subscribers.remove(&id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

/// The receiving side of a subscription. Dropping it deregisters.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<CommunityEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or an error once the bus closed this subscription.
    pub async fn recv(&mut self) -> Result<CommunityEvent> {
        self.receiver.recv().await.ok_or(SyncError::SubscriptionClosed)
    }

    /// An already queued event, if any.
    pub fn try_recv(&mut self) -> Option<CommunityEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the first event matching `predicate`.
    ///
    /// Events that do not match are consumed and discarded.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut predicate: F) -> Result<CommunityEvent>
    where
        F: FnMut(&CommunityEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(SyncError::SubscriptionClosed),
                Err(_) => {
                    return Err(SyncError::Timeout(format!(
                        "no matching event within {timeout:?}"
                    )))
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
    }
}
