//! Test fixtures and helpers.
//!
//! A [`TestNetwork`] wires managers together over one in-memory network and
//! one balance provider.

use std::sync::Arc;
use std::time::Duration;

use cohort::{Manager, ManagerConfig};
use cohort_core::{
    Address, ChainId, CommunityId, Keypair, PermissionType, PublicKey, RevealedAccount,
    TokenCriteria, TokenPermission,
};
use cohort_perms::StaticBalances;
use cohort_store::MemoryStore;
use cohort_sync::{MemoryNetwork, MemoryTransport};

/// Chain every test wallet and contract lives on.
pub const TEST_CHAIN: ChainId = 1;

/// Decimals of the test token.
pub const DECIMALS: u8 = 18;

/// How long a node waits for more envelopes in one pump round.
const PUMP_TIMEOUT: Duration = Duration::from_millis(20);

/// Contract of the TEST token.
pub fn test_contract() -> Address {
    Address::from_bytes([0x7e; 20])
}

/// `n` whole TEST tokens in base units.
pub fn tokens(n: u128) -> u128 {
    n * 10u128.pow(DECIMALS as u32)
}

/// A permission requiring `amount` whole TEST tokens.
pub fn member_permission(permission_type: PermissionType, amount: u128) -> TokenPermission {
    TokenPermission::new(
        permission_type,
        vec![TokenCriteria::erc20(TEST_CHAIN, test_contract(), "TEST", amount, DECIMALS)],
    )
}

/// A wallet that can reveal itself to communities.
pub struct Wallet {
    pub keypair: Keypair,
}

impl Wallet {
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
        }
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.keypair.public_key())
    }

    /// Reveal this wallet to `community` on behalf of `requester`.
    pub fn reveal(&self, requester: &PublicKey, community: &CommunityId) -> RevealedAccount {
        RevealedAccount::sign(&self.keypair, requester, community, vec![TEST_CHAIN])
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

pub type TestManager = Manager<MemoryStore, MemoryTransport>;

/// One manager and the wallet its identity reveals.
pub struct TestNode {
    pub manager: Arc<TestManager>,
    pub identity: Keypair,
    pub wallet: Wallet,
}

impl TestNode {
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Reveal the node's wallet to `community`.
    pub fn reveal(&self, community: &CommunityId) -> RevealedAccount {
        self.wallet.reveal(&self.public_key(), community)
    }
}

/// Managers on one in-memory network.
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    pub balances: Arc<StaticBalances>,
    config: ManagerConfig,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig {
            event_wait_timeout: Duration::from_secs(2),
            ..ManagerConfig::default()
        })
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            balances: Arc::new(StaticBalances::new([TEST_CHAIN])),
            config,
        }
    }

    /// Add a node with a fresh identity.
    pub async fn node(&self) -> TestNode {
        self.node_with(Keypair::generate()).await
    }

    pub async fn node_with(&self, identity: Keypair) -> TestNode {
        let transport = self.network.create_transport(identity.public_key()).await;
        let manager = Manager::new(
            identity.clone(),
            MemoryStore::new(),
            transport,
            self.balances.clone(),
            self.config.clone(),
        );
        TestNode {
            manager: Arc::new(manager),
            identity,
            wallet: Wallet::new(),
        }
    }

    /// Give a node's wallet `amount` base units of TEST.
    pub fn fund(&self, node: &TestNode, amount: u128) {
        self.balances
            .set_balance(TEST_CHAIN, node.wallet.address(), test_contract(), amount);
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the inbound loop of every node until a full round delivers nothing.
///
/// Returns how many envelopes were handled.
pub async fn pump(nodes: &[&TestNode]) -> usize {
    let mut total = 0;
    loop {
        let mut round = 0;
        for node in nodes {
            round += node.manager.process_inbound(PUMP_TIMEOUT).await.unwrap_or(0);
        }
        if round == 0 {
            return total;
        }
        total += round;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_scale_by_decimals() {
        assert_eq!(tokens(100), 100 * 10u128.pow(18));
        let permission = member_permission(PermissionType::BecomeMember, 100);
        assert_eq!(permission.criteria[0].amount_in_wei, tokens(100));
    }

    #[test]
    fn test_revealed_account_verifies() {
        let wallet = Wallet::new();
        let requester = Keypair::generate().public_key();
        let community = CommunityId::from_key(&Keypair::generate().public_key());

        let account = wallet.reveal(&requester, &community);
        assert_eq!(account.address, wallet.address());
        assert!(account.verify(&requester, &community).is_ok());
        assert!(account.verify(&Keypair::generate().public_key(), &community).is_err());
    }

    #[tokio::test]
    async fn test_pump_on_idle_network() {
        let network = TestNetwork::new();
        let a = network.node().await;
        let b = network.node().await;
        assert_eq!(pump(&[&a, &b]).await, 0);
    }
}
