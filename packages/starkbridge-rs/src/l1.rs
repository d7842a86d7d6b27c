//! L1 Bridge
//!
//! The EVM side: one contract that is at once the clone factory, the
//! registry of bridged tokens and the minter of every clone.
//!
//! ## Flows
//!
//! - **consume_and_mint**: consume a DEPOSIT from an L2 token, get-or-create
//!   its clone, mint to the recipient
//! - **create_l1_instance**: consume a REGISTER and get-or-create the clone
//! - **burn_and_notify**: burn clone balance and emit a WITHDRAW to the L2
//!   token
//!
//! Operations mutate in place and may leave partial changes on error. Run
//! them through [`crate::chain::Chain::execute`] for all-or-nothing
//! semantics.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address_codec::{Felt, L1Address};
use crate::config::DevnetConfig;
use crate::error::{BridgeError, Result};
use crate::factory::CloneFactory;
use crate::hash::{keccak256, MessageHash};
use crate::messaging::{Mailbox, PendingMessage};
use crate::payload::BridgePayload;
use crate::registry::{BridgeRegistry, BridgeRegistryEntry};
use crate::token::BridgedToken;
use crate::types::{Layer, Settlement, TokenMetadata};

/// State of the L1 chain relevant to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Bridge {
    factory: CloneFactory,
    registry: BridgeRegistry,
    mailbox: Mailbox,
    outbound_nonce: u64,
}

impl L1Bridge {
    pub fn new(config: &DevnetConfig) -> Self {
        Self {
            factory: CloneFactory::new(config.l1_bridge_address, config.l1_base_token),
            registry: BridgeRegistry::new(),
            mailbox: Mailbox::new(Layer::L1),
            outbound_nonce: 0,
        }
    }

    pub fn address(&self) -> L1Address {
        self.factory.address()
    }

    pub fn factory(&self) -> &CloneFactory {
        &self.factory
    }

    pub fn registry(&self) -> &BridgeRegistry {
        &self.registry
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    // ========================================================================
    // Factory
    // ========================================================================

    /// Clone address for a raw factory salt. Registry clones use the L2
    /// token address as salt.
    pub fn compute_address(&self, salt: &[u8; 32]) -> L1Address {
        self.factory.compute_address(salt)
    }

    /// Address [`L1Bridge::create_erc20`] deploys to for `owner` and `salt`
    pub fn compute_erc20_address(&self, owner: &L1Address, salt: &[u8; 32]) -> L1Address {
        self.factory.compute_address(&erc20_salt(owner, salt))
    }

    /// Deploy a clone directly, outside the registry. `owner` is the minter.
    ///
    /// The factory salt is `keccak256(owner ++ salt)`, so direct deployments
    /// can never occupy the address reserved for an L2 token's clone.
    pub fn create_erc20(
        &mut self,
        owner: L1Address,
        salt: &[u8; 32],
        metadata: TokenMetadata,
    ) -> Result<L1Address> {
        self.factory.create(owner, &erc20_salt(&owner, salt), metadata)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Clone address bridged for `l2_token`
    pub fn lookup(&self, l2_token: &Felt) -> Option<L1Address> {
        self.registry.lookup(l2_token)
    }

    pub fn registry_entry(&self, l2_token: &Felt) -> Option<&BridgeRegistryEntry> {
        self.registry.entry(l2_token)
    }

    pub fn token(&self, address: &L1Address) -> Option<&BridgedToken> {
        self.factory.token(address)
    }

    pub fn balance_of(&self, token: &L1Address, account: &L1Address) -> u128 {
        self.token(token)
            .map(|token| token.balance_of(account))
            .unwrap_or(0)
    }

    /// Total supply of the clone bridged for `l2_token`, zero if none exists
    pub fn bridged_supply(&self, l2_token: &Felt) -> u128 {
        self.lookup(l2_token)
            .and_then(|address| self.token(&address))
            .map(|token| token.total_supply())
            .unwrap_or(0)
    }

    // ========================================================================
    // Bridge Operations
    // ========================================================================

    /// Consume a DEPOSIT and mint the clone to its recipient, deploying the
    /// clone on first use.
    pub fn consume_and_mint(&mut self, message: &PendingMessage) -> Result<Settlement> {
        let payload = self.decode_inbound(message)?;
        let (l1_recipient, amount, nonce, metadata) = match payload {
            BridgePayload::Deposit {
                l1_recipient,
                amount,
                nonce,
                metadata,
            } => (l1_recipient, amount, nonce, metadata),
            other => return Err(unexpected_kind("deposit", &other)),
        };

        let hash = self.consume(message)?;
        let l2_token = message.from_address;
        let minter = self.address();
        let clone =
            self.registry
                .register_or_create(&mut self.factory, minter, l2_token, &metadata)?;

        self.factory
            .token_mut(&clone)
            .ok_or_else(|| BridgeError::TokenNotFound {
                token: clone.to_string(),
            })?
            .mint(minter, l1_recipient, amount)?;

        info!(
            hash = %hash,
            l2_token = %l2_token,
            clone = %clone,
            recipient = %l1_recipient,
            amount = amount,
            nonce = nonce,
            "Minted bridged tokens on L1"
        );

        Ok(Settlement::Minted {
            message: hash,
            l2_token,
            l1_token: clone,
            recipient: l1_recipient,
            amount,
        })
    }

    /// Consume a REGISTER and make sure the clone exists
    pub fn create_l1_instance(&mut self, message: &PendingMessage) -> Result<Settlement> {
        let payload = self.decode_inbound(message)?;
        let metadata = match payload {
            BridgePayload::Register { metadata } => metadata,
            other => return Err(unexpected_kind("register", &other)),
        };

        let hash = self.consume(message)?;
        let l2_token = message.from_address;
        let minter = self.address();
        let clone =
            self.registry
                .register_or_create(&mut self.factory, minter, l2_token, &metadata)?;

        info!(hash = %hash, l2_token = %l2_token, clone = %clone, "L1 instance ready");
        Ok(Settlement::Registered {
            message: hash,
            l2_token,
            l1_token: clone,
        })
    }

    /// Burn `amount` of the clone for `l2_token` from `caller` and notify L2.
    pub fn burn_and_notify(
        &mut self,
        caller: L1Address,
        l2_token: Felt,
        l2_recipient: Felt,
        amount: u128,
    ) -> Result<PendingMessage> {
        if amount == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "amount must be greater than zero".to_string(),
            });
        }
        if l2_recipient.is_zero() {
            return Err(BridgeError::InvalidAddress {
                reason: "L2 recipient cannot be zero".to_string(),
            });
        }

        let clone = self
            .lookup(&l2_token)
            .ok_or_else(|| BridgeError::TokenNotRegistered {
                remote_token: l2_token.to_hex(),
            })?;
        let minter = self.address();
        self.factory
            .token_mut(&clone)
            .ok_or_else(|| BridgeError::TokenNotFound {
                token: clone.to_string(),
            })?
            .burn(minter, caller, amount)?;

        let nonce = self.outbound_nonce;
        self.outbound_nonce += 1;
        let payload = BridgePayload::Withdraw {
            l2_recipient,
            amount,
            nonce,
        }
        .encode()?;
        let message = self
            .mailbox
            .enqueue(Felt::from(self.address()), l2_token, payload);

        info!(
            hash = %message.hash(),
            l2_token = %l2_token,
            clone = %clone,
            caller = %caller,
            l2_recipient = %l2_recipient,
            amount = amount,
            nonce = nonce,
            "Burned bridged tokens on L1"
        );
        Ok(message)
    }

    /// Plain ERC-20 transfer of a clone
    pub fn transfer(
        &mut self,
        token: L1Address,
        from: L1Address,
        to: L1Address,
        amount: u128,
    ) -> Result<()> {
        self.factory
            .token_mut(&token)
            .ok_or_else(|| BridgeError::TokenNotFound {
                token: token.to_string(),
            })?
            .transfer(from, to, amount)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn decode_inbound(&self, message: &PendingMessage) -> Result<BridgePayload> {
        if message.origin != Layer::L2 {
            return Err(BridgeError::InvalidPayload {
                reason: format!("L1 bridge cannot consume a message from {}", message.origin),
            });
        }
        if message.to_address != Felt::from(self.address()) {
            warn!(
                to = %message.to_address,
                bridge = %self.address(),
                "Rejected message addressed elsewhere"
            );
            return Err(BridgeError::Unauthorized {
                reason: format!("message is addressed to {}", message.to_address),
            });
        }
        BridgePayload::decode(&message.payload)
    }

    fn consume(&mut self, message: &PendingMessage) -> Result<MessageHash> {
        self.mailbox
            .consume(&message.from_address, &message.to_address, &message.payload)
    }
}

fn erc20_salt(owner: &L1Address, salt: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0u8; 52];
    preimage[..20].copy_from_slice(&owner.0);
    preimage[20..].copy_from_slice(salt);
    keccak256(&preimage)
}

fn unexpected_kind(expected: &str, payload: &BridgePayload) -> BridgeError {
    BridgeError::InvalidPayload {
        reason: format!("expected a {} message, got {}", expected, payload.kind()),
    }
}
