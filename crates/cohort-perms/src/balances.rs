//! Balance snapshots and the provider that supplies them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use cohort_core::{Address, ChainId, TokenPermission, TokenType};
use serde::{Deserialize, Serialize};

use crate::error::{PermsError, Result};

/// Point-in-time holdings of a set of wallets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// `(chain, wallet, contract) -> balance` in the token's smallest unit.
    pub balances: BTreeMap<(ChainId, Address, Address), u128>,
    /// ERC721 token ids held per `(chain, wallet, contract)`.
    pub owned_tokens: BTreeMap<(ChainId, Address, Address), BTreeSet<u128>>,
    /// ENS names resolving to a wallet.
    pub ens_names: BTreeMap<Address, BTreeSet<String>>,
}

impl BalanceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, chain_id: ChainId, wallet: &Address, contract: &Address) -> u128 {
        self.balances
            .get(&(chain_id, *wallet, *contract))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_balance(&mut self, chain_id: ChainId, wallet: Address, contract: Address, amount: u128) {
        self.balances.insert((chain_id, wallet, contract), amount);
    }

    /// Record ownership of an ERC721 token. Also counts toward the balance.
    pub fn add_token(&mut self, chain_id: ChainId, wallet: Address, contract: Address, token_id: u128) {
        if self
            .owned_tokens
            .entry((chain_id, wallet, contract))
            .or_default()
            .insert(token_id)
        {
            *self.balances.entry((chain_id, wallet, contract)).or_default() += 1;
        }
    }

    pub fn tokens(&self, chain_id: ChainId, wallet: &Address, contract: &Address) -> Option<&BTreeSet<u128>> {
        self.owned_tokens.get(&(chain_id, *wallet, *contract))
    }

    pub fn add_ens_name(&mut self, wallet: Address, name: &str) {
        self.ens_names.entry(wallet).or_default().insert(name.to_string());
    }

    pub fn ens_names(&self, wallet: &Address) -> impl Iterator<Item = &String> {
        self.ens_names.get(wallet).into_iter().flatten()
    }

    /// Restrict to the given wallets.
    pub fn for_wallets(&self, wallets: &[Address]) -> Self {
        let keep: BTreeSet<&Address> = wallets.iter().collect();
        Self {
            balances: self
                .balances
                .iter()
                .filter(|((_, wallet, _), _)| keep.contains(wallet))
                .map(|(k, v)| (*k, *v))
                .collect(),
            owned_tokens: self
                .owned_tokens
                .iter()
                .filter(|((_, wallet, _), _)| keep.contains(wallet))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            ens_names: self
                .ens_names
                .iter()
                .filter(|(wallet, _)| keep.contains(wallet))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }
}

/// Contracts referenced by a set of permissions, grouped by chain.
pub fn contracts_of<'a>(
    permissions: impl IntoIterator<Item = &'a TokenPermission>,
) -> BTreeMap<ChainId, BTreeSet<Address>> {
    let mut contracts: BTreeMap<ChainId, BTreeSet<Address>> = BTreeMap::new();
    for permission in permissions {
        for criteria in &permission.criteria {
            if criteria.token_type == TokenType::Ens {
                continue;
            }
            for (chain, contract) in &criteria.contract_addresses {
                contracts.entry(*chain).or_default().insert(*contract);
            }
        }
    }
    contracts
}

/// Source of on-chain holdings.
///
/// Lookups are I/O bound; callers must not hold a community lock across them.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Fetch holdings of `wallets` in `contracts` on `chain_ids`.
    async fn get_balances(
        &self,
        wallets: &[Address],
        contracts: &BTreeMap<ChainId, BTreeSet<Address>>,
        chain_ids: &BTreeSet<ChainId>,
    ) -> Result<BalanceSnapshot>;

    /// Every chain the provider can answer for.
    fn supported_chains(&self) -> BTreeSet<ChainId>;
}

/// In-memory provider backed by a mutable snapshot.
#[derive(Debug, Default)]
pub struct StaticBalances {
    snapshot: RwLock<BalanceSnapshot>,
    chains: RwLock<BTreeSet<ChainId>>,
}

impl StaticBalances {
    pub fn new(chains: impl IntoIterator<Item = ChainId>) -> Self {
        Self {
            snapshot: RwLock::new(BalanceSnapshot::new()),
            chains: RwLock::new(chains.into_iter().collect()),
        }
    }

    /// Apply an edit to the backing snapshot.
    pub fn update(&self, edit: impl FnOnce(&mut BalanceSnapshot)) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            edit(&mut snapshot);
        }
    }

    pub fn set_balance(&self, chain_id: ChainId, wallet: Address, contract: Address, amount: u128) {
        self.update(|s| s.set_balance(chain_id, wallet, contract, amount));
    }
}

#[async_trait]
impl BalanceProvider for StaticBalances {
    async fn get_balances(
        &self,
        wallets: &[Address],
        contracts: &BTreeMap<ChainId, BTreeSet<Address>>,
        chain_ids: &BTreeSet<ChainId>,
    ) -> Result<BalanceSnapshot> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|_| PermsError::BalanceUnavailable("snapshot lock poisoned".into()))?;
        let mut result = snapshot.for_wallets(wallets);
        result.balances.retain(|(chain, _, contract), _| {
            chain_ids.contains(chain) && contracts.get(chain).is_some_and(|c| c.contains(contract))
        });
        result.owned_tokens.retain(|(chain, _, contract), _| {
            chain_ids.contains(chain) && contracts.get(chain).is_some_and(|c| c.contains(contract))
        });
        Ok(result)
    }

    fn supported_chains(&self) -> BTreeSet<ChainId> {
        self.chains.read().map(|c| c.clone()).unwrap_or_default()
    }
}
