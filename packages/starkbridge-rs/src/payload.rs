//! Bridge message payloads
//!
//! | kind | direction | layout |
//! |------|-----------|--------|
//! | 0 | L2 -> L1 | `[0, l1_recipient, amount.low, amount.high, nonce, name, symbol, decimals]` |
//! | 1 | L2 -> L1 | `[1, name, symbol, decimals]` |
//! | 2 | L1 -> L2 | `[2, l2_recipient, amount.low, amount.high, nonce]` |

use crate::address_codec::{Felt, L1Address};
use crate::error::{BridgeError, Result};
use crate::types::{join_uint256, split_uint256, TokenMetadata};

pub const MESSAGE_DEPOSIT: u64 = 0;
pub const MESSAGE_REGISTER: u64 = 1;
pub const MESSAGE_WITHDRAW: u64 = 2;

/// Decoded bridge payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgePayload {
    /// Tokens locked on L2, to be minted on L1
    Deposit {
        l1_recipient: L1Address,
        amount: u128,
        nonce: u64,
        metadata: TokenMetadata,
    },
    /// Request to create the L1 clone without moving funds
    Register { metadata: TokenMetadata },
    /// Tokens burned on L1, to be released on L2
    Withdraw {
        l2_recipient: Felt,
        amount: u128,
        nonce: u64,
    },
}

impl BridgePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgePayload::Deposit { .. } => "deposit",
            BridgePayload::Register { .. } => "register",
            BridgePayload::Withdraw { .. } => "withdraw",
        }
    }

    /// Amount moved by this message, zero for registrations
    pub fn amount(&self) -> u128 {
        match self {
            BridgePayload::Deposit { amount, .. } | BridgePayload::Withdraw { amount, .. } => *amount,
            BridgePayload::Register { .. } => 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<Felt>> {
        let words = match self {
            BridgePayload::Deposit {
                l1_recipient,
                amount,
                nonce,
                metadata,
            } => {
                let (low, high) = split_uint256(*amount);
                let mut words = vec![
                    Felt::from_u64(MESSAGE_DEPOSIT),
                    Felt::from(*l1_recipient),
                    low,
                    high,
                    Felt::from_u64(*nonce),
                ];
                words.extend(metadata.to_felts()?);
                words
            }
            BridgePayload::Register { metadata } => {
                let mut words = vec![Felt::from_u64(MESSAGE_REGISTER)];
                words.extend(metadata.to_felts()?);
                words
            }
            BridgePayload::Withdraw {
                l2_recipient,
                amount,
                nonce,
            } => {
                let (low, high) = split_uint256(*amount);
                vec![
                    Felt::from_u64(MESSAGE_WITHDRAW),
                    *l2_recipient,
                    low,
                    high,
                    Felt::from_u64(*nonce),
                ]
            }
        };
        Ok(words)
    }

    pub fn decode(words: &[Felt]) -> Result<Self> {
        let (kind, body) = words.split_first().ok_or_else(|| BridgeError::InvalidPayload {
            reason: "empty payload".to_string(),
        })?;

        match kind.to_u64()? {
            MESSAGE_DEPOSIT => {
                expect_len("deposit", body, 7)?;
                Ok(BridgePayload::Deposit {
                    l1_recipient: L1Address::from_felt(&body[0])?,
                    amount: join_uint256(&body[1], &body[2])?,
                    nonce: body[3].to_u64()?,
                    metadata: TokenMetadata::from_felts(&body[4..7])?,
                })
            }
            MESSAGE_REGISTER => {
                expect_len("register", body, 3)?;
                Ok(BridgePayload::Register {
                    metadata: TokenMetadata::from_felts(body)?,
                })
            }
            MESSAGE_WITHDRAW => {
                expect_len("withdraw", body, 4)?;
                Ok(BridgePayload::Withdraw {
                    l2_recipient: body[0],
                    amount: join_uint256(&body[1], &body[2])?,
                    nonce: body[3].to_u64()?,
                })
            }
            other => Err(BridgeError::InvalidPayload {
                reason: format!("unknown message kind {}", other),
            }),
        }
    }
}

fn expect_len(kind: &str, body: &[Felt], expected: usize) -> Result<()> {
    if body.len() != expected {
        return Err(BridgeError::InvalidPayload {
            reason: format!(
                "{} payload needs {} words after the kind, got {}",
                kind,
                expected,
                body.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> TokenMetadata {
        TokenMetadata::new("TEST", "TST", 18).unwrap()
    }

    #[test]
    fn test_deposit_layout() {
        let recipient = L1Address([0xab; 20]);
        let payload = BridgePayload::Deposit {
            l1_recipient: recipient,
            amount: 1_000,
            nonce: 3,
            metadata: metadata(),
        };
        let words = payload.encode().unwrap();
        assert_eq!(words.len(), 8);
        assert_eq!(words[0], Felt::ZERO);
        assert_eq!(words[1], Felt::from(recipient));
        assert_eq!(words[2], Felt::from_u128(1_000));
        assert_eq!(words[3], Felt::ZERO);
        assert_eq!(words[4], Felt::from_u64(3));
        assert_eq!(words[5], Felt::from_u128(0x54455354));
        assert_eq!(BridgePayload::decode(&words).unwrap(), payload);
    }

    #[test]
    fn test_withdraw_layout() {
        let payload = BridgePayload::Withdraw {
            l2_recipient: Felt::from_u128(0xbeef),
            amount: 5,
            nonce: 0,
        };
        let words = payload.encode().unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], Felt::from_u64(MESSAGE_WITHDRAW));
        assert_eq!(payload.kind(), "withdraw");
        assert_eq!(payload.amount(), 5);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(BridgePayload::decode(&[]).is_err());
        assert!(BridgePayload::decode(&[Felt::from_u64(9)]).is_err());
        assert!(BridgePayload::decode(&[Felt::from_u64(MESSAGE_WITHDRAW), Felt::ZERO]).is_err());

        // amount wider than 128 bits
        let words = [
            Felt::from_u64(MESSAGE_WITHDRAW),
            Felt::from_u128(1),
            Felt::from_u128(1),
            Felt::from_u128(1),
            Felt::ZERO,
        ];
        assert!(matches!(
            BridgePayload::decode(&words),
            Err(BridgeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_register_has_no_amount() {
        let payload = BridgePayload::Register {
            metadata: metadata(),
        };
        assert_eq!(payload.amount(), 0);
        let words = payload.encode().unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(BridgePayload::decode(&words).unwrap(), payload);
    }
}
