//! Bridge Scenarios
//!
//! A [`BridgeScenario`] is a devnet with L2 tokens already deployed to a
//! holder account, plus shortcuts for complete bridging flows.

use std::sync::Arc;

use crate::address_codec::{Felt, L1Address};
use crate::config::DevnetConfig;
use crate::devnet::Devnet;
use crate::error::Result;
use crate::messaging::PendingMessage;
use crate::store::{MemoryStore, StateStore};
use crate::types::{Settlement, TokenMetadata};

pub const TEST_TOKEN_NAME: &str = "TEST";
pub const TEST_TOKEN_SYMBOL: &str = "TST";
pub const TEST_TOKEN_DECIMALS: u8 = 18;
/// 1 token with 18 decimals
pub const TEST_INITIAL_SUPPLY: u128 = 1_000_000_000_000_000_000;

/// Deterministic L1 account `n`
pub fn l1_account(n: u8) -> L1Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xa0;
    bytes[19] = n;
    L1Address(bytes)
}

/// Deterministic L2 account `n`
pub fn l2_account(n: u8) -> Felt {
    let mut bytes = [0u8; 32];
    bytes[1] = 0xac;
    bytes[31] = n;
    Felt(bytes)
}

pub fn test_metadata() -> Result<TokenMetadata> {
    TokenMetadata::new(TEST_TOKEN_NAME, TEST_TOKEN_SYMBOL, TEST_TOKEN_DECIMALS)
}

/// Devnet plus the L2 tokens deployed for a test
pub struct BridgeScenario {
    pub devnet: Devnet,
    pub holder: Felt,
    pub tokens: Vec<Felt>,
}

impl BridgeScenario {
    /// First deployed token
    pub fn token(&self) -> Felt {
        self.tokens[0]
    }

    /// Lock on L2, flush, consume on L1
    pub fn bridge_to_l1(&mut self, token: Felt, amount: u128, recipient: L1Address) -> Result<Settlement> {
        let message = self
            .devnet
            .lock_and_notify(token, self.holder, amount, recipient)?;
        self.devnet.flush()?;
        self.devnet.submit_consume(&message)
    }

    /// Burn on L1, flush, consume on L2 unless the flush already did
    pub fn bridge_to_l2(
        &mut self,
        token: Felt,
        caller: L1Address,
        amount: u128,
        recipient: Felt,
    ) -> Result<PendingMessage> {
        let message = self
            .devnet
            .burn_and_notify(caller, token, recipient, amount)?;
        self.devnet.flush()?;
        if !self.devnet.transfer_state(&message).is_settled() {
            self.devnet.submit_consume(&message)?;
        }
        Ok(message)
    }

    /// Clone balance of `account` for `token`, zero before registration
    pub fn l1_balance(&self, token: &Felt, account: &L1Address) -> u128 {
        self.devnet
            .l1()
            .lookup(token)
            .map(|clone| self.devnet.l1().balance_of(&clone, account))
            .unwrap_or(0)
    }

    pub fn l2_balance(&self, token: &Felt, account: &Felt) -> u128 {
        self.devnet.l2().balance_of(token, account)
    }
}

/// Builder for [`BridgeScenario`]
pub struct BridgeScenarioBuilder {
    config: DevnetConfig,
    store: Option<Arc<dyn StateStore>>,
    holder: Felt,
    tokens: Vec<(TokenMetadata, u128)>,
}

impl Default for BridgeScenarioBuilder {
    fn default() -> Self {
        Self {
            config: DevnetConfig::default(),
            store: None,
            holder: l2_account(1),
            tokens: Vec::new(),
        }
    }
}

impl BridgeScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: DevnetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn auto_settle(mut self, enabled: bool) -> Self {
        self.config.auto_settle_l1_to_l2 = enabled;
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn holder(mut self, holder: Felt) -> Self {
        self.holder = holder;
        self
    }

    /// Deploy a token with the given metadata and supply
    pub fn token(mut self, metadata: TokenMetadata, initial_supply: u128) -> Self {
        self.tokens.push((metadata, initial_supply));
        self
    }

    /// Build the devnet. Deploys the `TEST`/`TST` token when no token was
    /// added. Token `i` uses salt `i + 1`.
    pub fn build(self) -> Result<BridgeScenario> {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut devnet = Devnet::open(self.config, store)?;

        let specs = if self.tokens.is_empty() {
            vec![(test_metadata()?, TEST_INITIAL_SUPPLY)]
        } else {
            self.tokens
        };

        let mut tokens = Vec::with_capacity(specs.len());
        for (i, (metadata, supply)) in specs.into_iter().enumerate() {
            let salt = Felt::from_u64(i as u64 + 1);
            tokens.push(devnet.deploy_l2_token(salt, metadata, supply, self.holder)?);
        }

        Ok(BridgeScenario {
            devnet,
            holder: self.holder,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario() {
        let scenario = BridgeScenarioBuilder::new().build().unwrap();
        assert_eq!(scenario.tokens.len(), 1);
        assert_eq!(
            scenario.l2_balance(&scenario.token(), &scenario.holder),
            TEST_INITIAL_SUPPLY
        );
    }

    #[test]
    fn test_accounts_are_distinct() {
        assert_ne!(l1_account(1), l1_account(2));
        assert_ne!(l2_account(1), l2_account(2));
        assert!(!l1_account(0).is_zero());
        assert!(!l2_account(0).is_zero());
    }

    #[test]
    fn test_bridge_to_l1_shortcut() {
        let mut scenario = BridgeScenarioBuilder::new().build().unwrap();
        let token = scenario.token();
        scenario.bridge_to_l1(token, 10, l1_account(1)).unwrap();
        assert_eq!(scenario.l1_balance(&token, &l1_account(1)), 10);
    }
}
