//! Address and Word Encoding for both layers
//!
//! Everything that crosses the L1 <-> L2 boundary is a 32-byte big-endian
//! word (a Starknet "felt"). EVM addresses are embedded left-padded, matching
//! `uint256(uint160(addr))` on L1 and `felt` on L2.
//!
//! ## Short Strings
//!
//! Token names and symbols are packed into a single felt using the Cairo
//! short-string convention: ASCII bytes interpreted as a big-endian integer,
//! at most 31 bytes. [`short_string_to_uint`] is the 4-byte variant used for
//! compact identifiers on L1. It fills the word from the most significant
//! byte and zero-pads on the right, so numeric order is lexicographic order
//! for any mix of lengths.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Maximum length of a Cairo short string (must fit below the field prime)
pub const MAX_SHORT_STRING_LEN: usize = 31;

/// Maximum length accepted by [`short_string_to_uint`]
pub const MAX_UINT32_STRING_LEN: usize = 4;

// ============================================================================
// Hex Helpers
// ============================================================================

fn decode_hex_bytes(value: &str) -> Result<Vec<u8>> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);
    // Allow odd-length input like "0x1"
    let padded = if hex_str.len() % 2 == 1 {
        format!("0{}", hex_str)
    } else {
        hex_str.to_string()
    };
    hex::decode(&padded).map_err(|e| BridgeError::InvalidAddress {
        reason: format!("invalid hex {:?}: {}", value, e),
    })
}

// ============================================================================
// Felt (32-byte word)
// ============================================================================

/// A 32-byte big-endian word: L2 addresses, message endpoints and payload
/// elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Felt(pub [u8; 32]);

impl Felt {
    pub const ZERO: Felt = Felt([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Felt(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Felt(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_u128(value as u128)
    }

    /// Interpret the word as a u128, failing if the upper half is non-zero.
    pub fn to_u128(&self) -> Result<u128> {
        if self.0[..16].iter().any(|&b| b != 0) {
            return Err(BridgeError::InvalidPayload {
                reason: format!("word {} does not fit in 128 bits", self),
            });
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Ok(u128::from_be_bytes(low))
    }

    pub fn to_u64(&self) -> Result<u64> {
        let value = self.to_u128()?;
        u64::try_from(value).map_err(|_| BridgeError::InvalidPayload {
            reason: format!("word {} does not fit in 64 bits", self),
        })
    }

    /// Parse from hex (with or without 0x prefix, at most 32 bytes)
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = decode_hex_bytes(value)?;
        if bytes.len() > 32 {
            return Err(BridgeError::InvalidAddress {
                reason: format!("word must be at most 32 bytes, got {}", bytes.len()),
            });
        }
        let mut result = [0u8; 32];
        result[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Felt(result))
    }

    /// Full-width hex with 0x prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Felt {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Felt::from_hex(s)
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Felt::from_u128(value)
    }
}

impl From<L1Address> for Felt {
    fn from(addr: L1Address) -> Self {
        Felt(addr.as_bytes32())
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Felt::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// L1 Address (20-byte EVM address)
// ============================================================================

/// EVM address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct L1Address(pub [u8; 20]);

impl L1Address {
    pub const ZERO: L1Address = L1Address([0u8; 20]);

    /// Create from hex string (with or without 0x prefix)
    ///
    /// Accepts 20-byte addresses and 32-byte words whose first 12 bytes are
    /// zero.
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = decode_hex_bytes(value)?;
        match bytes.len() {
            20 => {
                let mut result = [0u8; 20];
                result.copy_from_slice(&bytes);
                Ok(L1Address(result))
            }
            32 => {
                let mut word = [0u8; 32];
                word.copy_from_slice(&bytes);
                L1Address::from_felt(&Felt(word))
            }
            len => Err(BridgeError::InvalidAddress {
                reason: format!("L1 address must be 20 or 32 bytes, got {} bytes", len),
            }),
        }
    }

    /// Extract an L1 address from a word, rejecting non-zero padding
    pub fn from_felt(word: &Felt) -> Result<Self> {
        if word.0[..12].iter().any(|&b| b != 0) {
            return Err(BridgeError::InvalidAddress {
                reason: format!("{} has non-zero padding for an L1 address", word),
            });
        }
        let mut result = [0u8; 20];
        result.copy_from_slice(&word.0[12..]);
        Ok(L1Address(result))
    }

    /// Convert to bytes32 (left-padded with zeros)
    pub fn as_bytes32(&self) -> [u8; 32] {
        let mut result = [0u8; 32];
        result[12..].copy_from_slice(&self.0);
        result
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string with 0x prefix
    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for L1Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl FromStr for L1Address {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        L1Address::from_hex(s)
    }
}

impl From<[u8; 20]> for L1Address {
    fn from(bytes: [u8; 20]) -> Self {
        L1Address(bytes)
    }
}

impl Serialize for L1Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for L1Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        L1Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Short Strings
// ============================================================================

fn validate_short_string(value: &str, max_len: usize) -> Result<()> {
    if value.len() > max_len {
        return Err(BridgeError::InvalidShortString {
            value: value.to_string(),
            reason: format!("longer than {} bytes", max_len),
        });
    }
    // NUL bytes would collide with the zero padding and break reversibility
    if let Some(c) = value.chars().find(|c| !c.is_ascii() || *c == '\0') {
        return Err(BridgeError::InvalidShortString {
            value: value.to_string(),
            reason: format!("invalid character {:?}", c),
        });
    }
    Ok(())
}

/// Pack a string of at most 4 ASCII bytes into a u32, big-endian and
/// right-padded with zeros.
///
/// `"TEST"` packs to `0x54455354 = 1413829460`, `"A"` to `0x41000000`.
pub fn short_string_to_uint(value: &str) -> Result<u32> {
    validate_short_string(value, MAX_UINT32_STRING_LEN)?;
    let mut word = [0u8; MAX_UINT32_STRING_LEN];
    word[..value.len()].copy_from_slice(value.as_bytes());
    Ok(u32::from_be_bytes(word))
}

/// Inverse of [`short_string_to_uint`]
pub fn uint_to_short_string(value: u32) -> Result<String> {
    let bytes = value.to_be_bytes();
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    decode_packed(&bytes, &bytes[..end])
}

/// Encode a Cairo short string (at most 31 ASCII bytes) into a felt
pub fn encode_short_string(value: &str) -> Result<Felt> {
    validate_short_string(value, MAX_SHORT_STRING_LEN)?;
    let bytes = value.as_bytes();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(Felt(word))
}

/// Decode a Cairo short string from a felt
pub fn decode_short_string(word: &Felt) -> Result<String> {
    if word.0[0] != 0 {
        return Err(BridgeError::InvalidShortString {
            value: word.to_hex(),
            reason: "more than 31 bytes".to_string(),
        });
    }
    let start = word.0.iter().position(|&b| b != 0).unwrap_or(word.0.len());
    decode_packed(&word.0, &word.0[start..])
}

/// `packed` is `word` without its padding
fn decode_packed(word: &[u8], packed: &[u8]) -> Result<String> {
    if packed.iter().any(|&b| b == 0 || !b.is_ascii()) {
        return Err(BridgeError::InvalidShortString {
            value: format!("0x{}", hex::encode(word)),
            reason: "not a packed ASCII string".to_string(),
        });
    }
    // ASCII-only was checked above
    Ok(packed.iter().map(|&b| b as char).collect())
}
