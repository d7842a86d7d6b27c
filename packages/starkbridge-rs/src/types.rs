//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address_codec::{decode_short_string, encode_short_string, Felt, L1Address};
use crate::error::{BridgeError, Result};
use crate::hash::MessageHash;

// ============================================================================
// Layer
// ============================================================================

/// One side of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// EVM chain hosting the clones
    L1,
    /// Starknet chain hosting the origin tokens
    L2,
}

impl Layer {
    pub fn counterpart(&self) -> Layer {
        match self {
            Layer::L1 => Layer::L2,
            Layer::L2 => Layer::L1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::L1 => "l1",
            Layer::L2 => "l2",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Metadata
// ============================================================================

/// Name, symbol and decimals of a bridged token.
///
/// Name and symbol must be Cairo short strings so they can travel inside a
/// single payload word each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Result<Self> {
        let metadata = TokenMetadata {
            name: name.into(),
            symbol: symbol.into(),
            decimals,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<()> {
        encode_short_string(&self.name)?;
        encode_short_string(&self.symbol)?;
        Ok(())
    }

    /// `[name, symbol, decimals]` as payload words
    pub fn to_felts(&self) -> Result<[Felt; 3]> {
        Ok([
            encode_short_string(&self.name)?,
            encode_short_string(&self.symbol)?,
            Felt::from_u64(self.decimals as u64),
        ])
    }

    pub fn from_felts(words: &[Felt]) -> Result<Self> {
        let [name, symbol, decimals] = words else {
            return Err(BridgeError::InvalidPayload {
                reason: format!("token metadata needs 3 words, got {}", words.len()),
            });
        };
        let decimals = u8::try_from(decimals.to_u64()?).map_err(|_| BridgeError::InvalidPayload {
            reason: format!("decimals {} out of range", decimals),
        })?;
        Ok(TokenMetadata {
            name: decode_short_string(name)?,
            symbol: decode_short_string(symbol)?,
            decimals,
        })
    }
}

// ============================================================================
// Uint256
// ============================================================================

/// Split an amount into Cairo `Uint256` words `(low, high)`
pub fn split_uint256(amount: u128) -> (Felt, Felt) {
    (Felt::from_u128(amount), Felt::ZERO)
}

/// Join Cairo `Uint256` words, rejecting amounts wider than 128 bits
pub fn join_uint256(low: &Felt, high: &Felt) -> Result<u128> {
    if !high.is_zero() {
        return Err(BridgeError::InvalidPayload {
            reason: format!("amount high word {} is non-zero", high),
        });
    }
    low.to_u128()
}

// ============================================================================
// Settlement
// ============================================================================

/// Effect of a successfully consumed bridge message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Settlement {
    /// DEPOSIT consumed on L1, clone minted to recipient
    Minted {
        message: MessageHash,
        l2_token: Felt,
        l1_token: L1Address,
        recipient: L1Address,
        amount: u128,
    },
    /// REGISTER consumed on L1, clone exists
    Registered {
        message: MessageHash,
        l2_token: Felt,
        l1_token: L1Address,
    },
    /// WITHDRAW consumed on L2, escrow released to recipient
    Released {
        message: MessageHash,
        l2_token: Felt,
        recipient: Felt,
        amount: u128,
    },
}

impl Settlement {
    pub fn message(&self) -> MessageHash {
        match self {
            Settlement::Minted { message, .. }
            | Settlement::Registered { message, .. }
            | Settlement::Released { message, .. } => *message,
        }
    }

    pub fn l2_token(&self) -> Felt {
        match self {
            Settlement::Minted { l2_token, .. }
            | Settlement::Registered { l2_token, .. }
            | Settlement::Released { l2_token, .. } => *l2_token,
        }
    }
}

// ============================================================================
// Transfer State
// ============================================================================

/// Where a bridging message is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Not emitted by either chain
    Idle,
    /// DEPOSIT emitted on L2, not yet consumed on L1
    LockedPendingMint { delivered: bool },
    /// REGISTER emitted on L2, not yet consumed on L1
    PendingRegistration { delivered: bool },
    /// WITHDRAW emitted on L1, not yet consumed on L2
    BurnedPendingRelease { delivered: bool },
    /// Consumed on the destination chain
    Settled,
}

impl TransferState {
    pub fn is_settled(&self) -> bool {
        matches!(self, TransferState::Settled)
    }
}
