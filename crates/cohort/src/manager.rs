//! The community manager.
//!
//! `Manager` owns every community the local identity knows about and runs
//! the operations of the control node, privileged members and requesters
//! on top of a [`Store`] and a [`Transport`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use cohort_core::{
    validate_description, Address, ChainId, CommunityId, Description, DescriptionChanges, Keypair,
    Privilege, PublicKey, SignedDescription,
};
use cohort_perms::{
    compute_key_actions, contracts_of, BalanceProvider, BalanceSnapshot, EncryptionKeyActions,
    MembershipView, PermissionEvaluator,
};
use cohort_store::{InsertResult, Store, StoreExt};
use cohort_sync::{CommunityEvent, EventBus, ProtocolMessage, SignedEnvelope, Subscription, Transport};
use tracing::{debug, info, warn};

use crate::community::{Community, CommunityState, Registry};
use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::scheduler::SchedulerHandle;

/// Current time in unix seconds.
pub(crate) fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// The main manager struct.
///
/// Provides:
/// - Community creation and structural edits (control node)
/// - Requests to join, from both ends
/// - Member removal, bans and role grants
/// - Members reevaluation and key distribution
/// - Control node handover
/// - Inbound message dispatch
pub struct Manager<S: Store, T: Transport> {
    /// The identity of the local node.
    pub(crate) identity: Keypair,
    pub(crate) store: Arc<S>,
    pub(crate) transport: Arc<T>,
    pub(crate) balances: Arc<dyn BalanceProvider>,
    pub(crate) evaluator: PermissionEvaluator,
    pub(crate) config: ManagerConfig,
    pub(crate) registry: Registry,
    pub(crate) events: EventBus,
    pub(crate) schedulers: Mutex<HashMap<CommunityId, SchedulerHandle>>,
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Create a new manager.
    pub fn new(
        identity: Keypair,
        store: S,
        transport: T,
        balances: Arc<dyn BalanceProvider>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            identity,
            store: Arc::new(store),
            transport: Arc::new(transport),
            balances,
            evaluator: PermissionEvaluator::new(config.evaluator.clone()),
            events: EventBus::new(config.event_channel_capacity),
            config,
            registry: Registry::default(),
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the manager's identity key.
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Load every stored community into memory.
    pub async fn load_communities(&self) -> Result<usize> {
        let ids = self.store.list_communities().await?;
        let mut loaded = 0;
        for id in ids {
            if let Some(record) = self.store.get_community(&id).await? {
                self.registry.insert(Community::from_record(record)?);
                loaded += 1;
            }
        }
        info!(count = loaded, "loaded communities");
        Ok(loaded)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn state(&self, id: &CommunityId) -> Result<Arc<CommunityState>> {
        self.registry.get(id).ok_or(ManagerError::CommunityNotFound(*id))
    }

    /// The latest snapshot of a community.
    pub fn community(&self, id: &CommunityId) -> Result<Arc<Community>> {
        Ok(self.state(id)?.snapshot())
    }

    /// Snapshots of every known community.
    pub fn communities(&self) -> Vec<Arc<Community>> {
        self.registry.snapshots()
    }

    /// Capability of `identity` in a community.
    pub fn privilege_of(&self, id: &CommunityId, identity: &PublicKey) -> Result<Privilege> {
        Ok(self.community(id)?.privilege_of(identity))
    }

    pub(crate) fn require_control_node(&self, community: &Community) -> Result<Keypair> {
        if community.control_node() != self.public_key() {
            return Err(ManagerError::Unauthorized(format!(
                "{} is not the control node of {}",
                self.public_key(),
                community.id()
            )));
        }
        community.community_key.clone().ok_or_else(|| {
            ManagerError::Unauthorized(format!("community key of {} not held", community.id()))
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Edit the description as control node and commit the result.
    ///
    /// Nothing is committed when `edit` leaves the description unchanged.
    pub(crate) async fn edit_description<R, F>(&self, id: &CommunityId, edit: F) -> Result<R>
    where
        F: FnOnce(&mut Description) -> Result<R> + Send,
        R: Send,
    {
        let state = self.state(id)?;
        let _guard = state.lock.lock().await;
        let current = state.snapshot();
        let key = self.require_control_node(&current)?;

        let mut next = current.description.clone();
        let value = edit(&mut next)?;
        if next != current.description {
            self.commit(&state, &current, next, key).await?;
        }
        Ok(value)
    }

    /// Sign and publish `next` as the successor of `previous`.
    ///
    /// The caller holds the community lock. Emits events, broadcasts the
    /// description and carries out the resulting key actions.
    pub(crate) async fn commit(
        &self,
        state: &CommunityState,
        previous: &Community,
        mut next: Description,
        key: Keypair,
    ) -> Result<Arc<DescriptionChanges>> {
        if next.control_node != self.public_key() {
            return Err(ManagerError::Unauthorized("only the control node commits".into()));
        }
        next.increase_clock();
        validate_description(&next)?;
        let signed = SignedDescription::sign(&next, &key)?;

        let community = Community {
            description: next,
            signed,
            joined: true,
            community_key: Some(key),
        };
        if let InsertResult::Conflict { existing } = self.store.commit_community(&community.to_record()).await? {
            return Err(ManagerError::InvalidOperation(format!(
                "a different description {existing:?} is stored at clock {}",
                community.clock()
            )));
        }

        let changes = Arc::new(DescriptionChanges::between(&previous.description, &community.description));
        let actions = Arc::new(compute_key_actions(
            &MembershipView::of(&previous.description),
            &MembershipView::of(&community.description),
        ));
        let community = state.publish(community);
        info!(community = %community.id(), clock = community.clock(), "description committed");

        self.emit_description_events(&community, &changes, Some(&actions));
        self.broadcast_description(&community).await?;
        self.execute_key_actions(&community, &actions).await?;
        Ok(changes)
    }

    pub(crate) fn emit_description_events(
        &self,
        community: &Community,
        changes: &Arc<DescriptionChanges>,
        actions: Option<&Arc<EncryptionKeyActions>>,
    ) {
        let community_id = community.id();
        self.events.publish(CommunityEvent::DescriptionChanged {
            community_id,
            clock: community.clock(),
            changes: Arc::clone(changes),
        });
        for member in &changes.members_removed {
            self.events.publish(CommunityEvent::MemberKicked {
                community_id,
                member: *member,
            });
        }
        if let Some(actions) = actions.filter(|a| !a.is_empty()) {
            self.events.publish(CommunityEvent::KeyActionsComputed {
                community_id,
                actions: Arc::clone(actions),
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a message to one peer. Returns whether the transport took it.
    pub(crate) async fn deliver(&self, peer: &PublicKey, message: &ProtocolMessage) -> Result<bool> {
        if *peer == self.public_key() {
            return Ok(false);
        }
        let envelope = SignedEnvelope::seal(message, &self.identity)?;
        match self.transport.send(peer, envelope).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(peer = %peer, kind = message.kind(), error = %e, "send failed");
                Ok(false)
            }
        }
    }

    /// Send a message to every identity that can act on requests to join.
    pub(crate) async fn deliver_to_managers(&self, community: &Community, message: &ProtocolMessage) -> Result<()> {
        let mut recipients: BTreeSet<PublicKey> = community
            .description
            .members
            .keys()
            .filter(|member| community.privilege_of(member).can_manage_requests())
            .copied()
            .collect();
        recipients.insert(community.control_node());
        for recipient in recipients {
            self.deliver(&recipient, message).await?;
        }
        Ok(())
    }

    pub(crate) async fn broadcast_description(&self, community: &Community) -> Result<()> {
        let message = ProtocolMessage::Description {
            community_id: community.id(),
            description: community.signed.clone(),
        };
        let envelope = SignedEnvelope::seal(&message, &self.identity)?;
        if let Err(e) = self.transport.broadcast(envelope).await {
            warn!(community = %community.id(), error = %e, "description broadcast failed");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Balances
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch holdings of `wallets` for every contract the description uses.
    ///
    /// Never called with a community lock held.
    pub(crate) async fn fetch_balances(
        &self,
        description: &Description,
        wallets: impl IntoIterator<Item = Address>,
    ) -> Result<BalanceSnapshot> {
        let wallets: Vec<Address> = wallets.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if wallets.is_empty() {
            return Ok(BalanceSnapshot::new());
        }
        let contracts = contracts_of(description.token_permissions.values());
        let supported = self.balances.supported_chains();
        let chains: BTreeSet<ChainId> = contracts.keys().filter(|c| supported.contains(c)).copied().collect();
        debug!(
            community = %description.community_id,
            wallets = wallets.len(),
            chains = chains.len(),
            "fetching balances"
        );
        Ok(self.balances.get_balances(&wallets, &contracts, &chains).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Receive events of one community.
    pub fn subscribe(&self, id: CommunityId) -> Subscription {
        self.events.subscribe(id)
    }

    /// Receive events of every community.
    pub fn subscribe_all(&self) -> Subscription {
        self.events.subscribe_all()
    }

    /// Wait on `subscription` for a matching event, bounded by the configured wait timeout.
    pub async fn wait_for<F>(&self, subscription: &mut Subscription, predicate: F) -> Result<CommunityEvent>
    where
        F: FnMut(&CommunityEvent) -> bool,
    {
        Ok(subscription.wait_for(self.config.event_wait_timeout, predicate).await?)
    }
}
