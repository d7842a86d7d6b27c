//! L2 Network
//!
//! The Starknet side: bridgeable tokens deployed at Starknet-derived
//! addresses. Each token is its own bridge endpoint. Locking moves balance
//! into the token's escrow and emits a DEPOSIT to the L1 bridge; a WITHDRAW
//! from that bridge releases escrow back to a holder.
//!
//! Like [`crate::l1::L1Bridge`], operations mutate in place; run them through
//! [`crate::chain::Chain::execute`] for all-or-nothing semantics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::address_codec::{Felt, L1Address};
use crate::config::DevnetConfig;
use crate::error::{BridgeError, Result};
use crate::factory::{AddressScheme, ClassDeployment, StarknetAddress};
use crate::messaging::{Mailbox, PendingMessage};
use crate::payload::BridgePayload;
use crate::token::FungibleLedger;
use crate::types::{split_uint256, Layer, Settlement, TokenMetadata};

// ============================================================================
// L2 Token
// ============================================================================

/// A bridgeable token on L2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Token {
    pub address: Felt,
    pub metadata: TokenMetadata,
    /// The only L1 sender allowed to release escrow
    pub l1_bridge: L1Address,
    /// Circulating balances on L2
    pub ledger: FungibleLedger<Felt>,
    /// Locked while the L1 representation exists or is in flight
    pub escrow: u128,
    pub outbound_nonce: u64,
}

impl L2Token {
    pub fn balance_of(&self, account: &Felt) -> u128 {
        self.ledger.balance_of(account)
    }

    /// Circulating plus escrowed
    pub fn total_supply(&self) -> u128 {
        self.ledger.total_supply() + self.escrow
    }

    fn next_nonce(&mut self) -> u64 {
        let nonce = self.outbound_nonce;
        self.outbound_nonce += 1;
        nonce
    }
}

// ============================================================================
// L2 Network
// ============================================================================

/// State of the L2 chain relevant to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Network {
    deployer_address: Felt,
    token_class_hash: Felt,
    l1_bridge: L1Address,
    tokens: BTreeMap<Felt, L2Token>,
    mailbox: Mailbox,
}

impl L2Network {
    pub fn new(config: &DevnetConfig) -> Self {
        Self {
            deployer_address: config.l2_deployer_address,
            token_class_hash: config.l2_token_class_hash,
            l1_bridge: config.l1_bridge_address,
            tokens: BTreeMap::new(),
            mailbox: Mailbox::new(Layer::L2),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    pub fn token(&self, address: &Felt) -> Option<&L2Token> {
        self.tokens.get(address)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &L2Token> {
        self.tokens.values()
    }

    pub fn balance_of(&self, token: &Felt, account: &Felt) -> u128 {
        self.token(token)
            .map(|token| token.balance_of(account))
            .unwrap_or(0)
    }

    fn token_mut(&mut self, address: &Felt) -> Result<&mut L2Token> {
        self.tokens
            .get_mut(address)
            .ok_or_else(|| BridgeError::TokenNotFound {
                token: address.to_hex(),
            })
    }

    // ========================================================================
    // Deployment
    // ========================================================================

    /// Constructor calldata of a bridgeable token:
    /// `[name, symbol, decimals, supply.low, supply.high, recipient, bridge]`
    fn constructor_calldata(
        &self,
        metadata: &TokenMetadata,
        initial_supply: u128,
        recipient: &Felt,
    ) -> Result<Vec<Felt>> {
        let (low, high) = split_uint256(initial_supply);
        let mut calldata = metadata.to_felts()?.to_vec();
        calldata.extend([low, high, *recipient, Felt::from(self.l1_bridge)]);
        Ok(calldata)
    }

    /// Address `deploy_token` will use for these arguments
    pub fn compute_token_address(
        &self,
        salt: &Felt,
        metadata: &TokenMetadata,
        initial_supply: u128,
        recipient: &Felt,
    ) -> Result<Felt> {
        let code = ClassDeployment {
            class_hash: self.token_class_hash,
            constructor_calldata: self.constructor_calldata(metadata, initial_supply, recipient)?,
        };
        StarknetAddress::derive_address(&self.deployer_address, salt, &code)
    }

    /// Deploy a bridgeable token minting `initial_supply` to `recipient`
    pub fn deploy_token(
        &mut self,
        salt: Felt,
        metadata: TokenMetadata,
        initial_supply: u128,
        recipient: Felt,
    ) -> Result<Felt> {
        if recipient.is_zero() {
            return Err(BridgeError::InvalidAddress {
                reason: "initial supply recipient cannot be zero".to_string(),
            });
        }
        let address = self.compute_token_address(&salt, &metadata, initial_supply, &recipient)?;
        if self.tokens.contains_key(&address) {
            return Err(BridgeError::AlreadyDeployed {
                address: address.to_hex(),
            });
        }

        let mut ledger = FungibleLedger::new();
        ledger.mint(recipient, initial_supply)?;
        info!(
            token = %address,
            symbol = %metadata.symbol,
            initial_supply = initial_supply,
            "Deployed L2 token"
        );
        self.tokens.insert(
            address,
            L2Token {
                address,
                metadata,
                l1_bridge: self.l1_bridge,
                ledger,
                escrow: 0,
                outbound_nonce: 0,
            },
        );
        Ok(address)
    }

    // ========================================================================
    // Bridge Operations
    // ========================================================================

    /// Lock `amount` of `caller`'s balance and emit a DEPOSIT for L1
    pub fn lock_and_notify(
        &mut self,
        token: Felt,
        caller: Felt,
        amount: u128,
        l1_recipient: L1Address,
    ) -> Result<PendingMessage> {
        if amount == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "amount must be greater than zero".to_string(),
            });
        }
        if l1_recipient.is_zero() {
            return Err(BridgeError::InvalidAddress {
                reason: "L1 recipient cannot be zero".to_string(),
            });
        }

        let entry = self.token_mut(&token)?;
        entry.ledger.burn(caller, amount)?;
        entry.escrow = entry
            .escrow
            .checked_add(amount)
            .ok_or_else(|| BridgeError::AmountOverflow {
                reason: format!("escrow of {} + {}", token, amount),
            })?;
        let nonce = entry.next_nonce();
        let payload = BridgePayload::Deposit {
            l1_recipient,
            amount,
            nonce,
            metadata: entry.metadata.clone(),
        }
        .encode()?;
        let to = Felt::from(entry.l1_bridge);

        let message = self.mailbox.enqueue(token, to, payload);
        info!(
            hash = %message.hash(),
            token = %token,
            caller = %caller,
            l1_recipient = %l1_recipient,
            amount = amount,
            nonce = nonce,
            "Locked tokens on L2"
        );
        Ok(message)
    }

    /// Emit a REGISTER asking L1 to create the clone ahead of any deposit
    pub fn request_l1_instance(&mut self, token: Felt) -> Result<PendingMessage> {
        let entry = self.token_mut(&token)?;
        let payload = BridgePayload::Register {
            metadata: entry.metadata.clone(),
        }
        .encode()?;
        let to = Felt::from(entry.l1_bridge);

        let message = self.mailbox.enqueue(token, to, payload);
        info!(hash = %message.hash(), token = %token, "Requested L1 instance");
        Ok(message)
    }

    /// Consume a WITHDRAW from the L1 bridge and release escrow
    pub fn consume_and_release(&mut self, message: &PendingMessage) -> Result<Settlement> {
        if message.origin != Layer::L1 {
            return Err(BridgeError::InvalidPayload {
                reason: format!("L2 token cannot consume a message from {}", message.origin),
            });
        }
        let token = message.to_address;
        let l1_bridge = self.token_mut(&token)?.l1_bridge;
        if message.from_address != Felt::from(l1_bridge) {
            warn!(
                token = %token,
                from = %message.from_address,
                "Rejected message from unknown L1 sender"
            );
            return Err(BridgeError::Unauthorized {
                reason: format!("{} is not the L1 bridge of {}", message.from_address, token),
            });
        }

        let (l2_recipient, amount, nonce) = match BridgePayload::decode(&message.payload)? {
            BridgePayload::Withdraw {
                l2_recipient,
                amount,
                nonce,
            } => (l2_recipient, amount, nonce),
            other => {
                return Err(BridgeError::InvalidPayload {
                    reason: format!("expected a withdraw message, got {}", other.kind()),
                })
            }
        };

        let hash = self
            .mailbox
            .consume(&message.from_address, &message.to_address, &message.payload)?;

        let entry = self.token_mut(&token)?;
        if entry.escrow < amount {
            error!(
                token = %token,
                escrow = entry.escrow,
                amount = amount,
                "Release exceeds escrow"
            );
            return Err(BridgeError::SupplyInvariantViolated {
                token: token.to_hex(),
                reason: format!("release of {} exceeds escrow {}", amount, entry.escrow),
            });
        }
        entry.escrow -= amount;
        entry.ledger.mint(l2_recipient, amount)?;

        info!(
            hash = %hash,
            token = %token,
            recipient = %l2_recipient,
            amount = amount,
            nonce = nonce,
            "Released tokens on L2"
        );
        Ok(Settlement::Released {
            message: hash,
            l2_token: token,
            recipient: l2_recipient,
            amount,
        })
    }

    /// Plain ERC-20 transfer
    pub fn transfer(&mut self, token: Felt, from: Felt, to: Felt, amount: u128) -> Result<()> {
        self.token_mut(&token)?.ledger.transfer(from, to, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder() -> Felt {
        Felt::from_u128(0xa11ce)
    }

    fn network_with_token() -> (L2Network, Felt) {
        let mut network = L2Network::new(&DevnetConfig::default());
        let token = network
            .deploy_token(
                Felt::from_u128(1),
                TokenMetadata::new("TEST", "TST", 18).unwrap(),
                1_000,
                holder(),
            )
            .unwrap();
        (network, token)
    }

    fn withdraw(network: &L2Network, token: Felt, amount: u128, nonce: u64) -> PendingMessage {
        let payload = BridgePayload::Withdraw {
            l2_recipient: holder(),
            amount,
            nonce,
        }
        .encode()
        .unwrap();
        let bridge = network.token(&token).unwrap().l1_bridge;
        PendingMessage::new(Layer::L1, Felt::from(bridge), token, payload)
    }

    #[test]
    fn test_deploy_token_address_is_predictable() {
        let mut network = L2Network::new(&DevnetConfig::default());
        let metadata = TokenMetadata::new("TEST", "TST", 18).unwrap();
        let expected = network
            .compute_token_address(&Felt::from_u128(9), &metadata, 1_000, &holder())
            .unwrap();
        let deployed = network
            .deploy_token(Felt::from_u128(9), metadata.clone(), 1_000, holder())
            .unwrap();
        assert_eq!(deployed, expected);
        assert_eq!(network.balance_of(&deployed, &holder()), 1_000);

        assert!(matches!(
            network.deploy_token(Felt::from_u128(9), metadata, 1_000, holder()),
            Err(BridgeError::AlreadyDeployed { .. })
        ));
    }

    #[test]
    fn test_lock_and_notify() {
        let (mut network, token) = network_with_token();
        let l1_recipient = L1Address([0x22; 20]);

        let message = network
            .lock_and_notify(token, holder(), 400, l1_recipient)
            .unwrap();
        assert_eq!(message.from_address, token);
        assert_eq!(message.origin, Layer::L2);

        let state = network.token(&token).unwrap();
        assert_eq!(state.balance_of(&holder()), 600);
        assert_eq!(state.escrow, 400);
        assert_eq!(state.total_supply(), 1_000);
        assert!(matches!(
            BridgePayload::decode(&message.payload).unwrap(),
            BridgePayload::Deposit { amount: 400, nonce: 0, .. }
        ));
    }

    #[test]
    fn test_lock_insufficient_balance() {
        let (mut network, token) = network_with_token();
        let err = network
            .lock_and_notify(token, holder(), 1_001, L1Address([0x22; 20]))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientBalance { .. }));
        assert_eq!(network.token(&token).unwrap().escrow, 0);
        assert!(network.mailbox().outbox().is_empty());
    }

    #[test]
    fn test_consume_and_release() {
        let (mut network, token) = network_with_token();
        network
            .lock_and_notify(token, holder(), 500, L1Address([0x22; 20]))
            .unwrap();

        let message = withdraw(&network, token, 200, 0);
        network.mailbox_mut().deliver(message.clone()).unwrap();
        let settlement = network.consume_and_release(&message).unwrap();
        assert!(matches!(settlement, Settlement::Released { amount: 200, .. }));
        assert_eq!(network.balance_of(&token, &holder()), 700);
        assert_eq!(network.token(&token).unwrap().escrow, 300);

        assert!(network
            .consume_and_release(&message)
            .unwrap_err()
            .is_duplicate_delivery());
    }

    #[test]
    fn test_release_from_unknown_sender_rejected() {
        let (mut network, token) = network_with_token();
        let mut message = withdraw(&network, token, 1, 0);
        message.from_address = Felt::from_u128(0xbad);
        network.mailbox_mut().deliver(message.clone()).unwrap();

        assert!(matches!(
            network.consume_and_release(&message),
            Err(BridgeError::Unauthorized { .. })
        ));
        assert!(network.mailbox().is_consumable(&message.hash()));
    }

    #[test]
    fn test_release_beyond_escrow_is_fatal() {
        let (mut network, token) = network_with_token();
        let message = withdraw(&network, token, 1, 0);
        network.mailbox_mut().deliver(message.clone()).unwrap();
        let err = network.consume_and_release(&message).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_request_l1_instance() {
        let (mut network, token) = network_with_token();
        let message = network.request_l1_instance(token).unwrap();
        assert_eq!(
            BridgePayload::decode(&message.payload).unwrap(),
            BridgePayload::Register {
                metadata: TokenMetadata::new("TEST", "TST", 18).unwrap()
            }
        );
        assert!(matches!(
            network.request_l1_instance(Felt::from_u128(404)),
            Err(BridgeError::TokenNotFound { .. })
        ));
    }
}
