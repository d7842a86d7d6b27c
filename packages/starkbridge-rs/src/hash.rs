//! Hash computation shared by both layers
//!
//! - keccak256 (EVM)
//! - EIP-1014 CREATE2 address derivation
//! - EIP-1167 minimal proxy creation code
//! - L2 <-> L1 message hashes (Starknet core contract layout)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

use crate::address_codec::{Felt, L1Address};

/// EIP-1167 creation code preceding the implementation address
pub const MINIMAL_PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];

/// EIP-1167 creation code following the implementation address
pub const MINIMAL_PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Creation code of a minimal proxy delegating to `implementation`
pub fn minimal_proxy_init_code(implementation: &L1Address) -> Vec<u8> {
    let mut code = Vec::with_capacity(55);
    code.extend_from_slice(&MINIMAL_PROXY_PREFIX);
    code.extend_from_slice(implementation.as_bytes());
    code.extend_from_slice(&MINIMAL_PROXY_SUFFIX);
    code
}

/// keccak256 of the minimal proxy creation code
///
/// ```solidity
/// keccak256(abi.encodePacked(hex"3d602d80600a3d3981f3363d3d373d3d3d363d73", implementation, hex"5af43d82803e903d91602b57fd5bf3"))
/// ```
pub fn minimal_proxy_init_code_hash(implementation: &L1Address) -> [u8; 32] {
    keccak256(&minimal_proxy_init_code(implementation))
}

/// EIP-1014 address: `keccak256(0xff ++ deployer ++ salt ++ init_code_hash)[12..]`
pub fn compute_create2_address(
    deployer: &L1Address,
    salt: &[u8; 32],
    init_code_hash: &[u8; 32],
) -> L1Address {
    // 1 + 20 + 32 + 32 = 85 bytes
    let mut data = [0u8; 85];
    data[0] = 0xff;
    data[1..21].copy_from_slice(deployer.as_bytes());
    data[21..53].copy_from_slice(salt);
    data[53..85].copy_from_slice(init_code_hash);

    let hash = keccak256(&data);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    L1Address(address)
}

/// Hash identifying a message between the layers
///
/// ```solidity
/// keccak256(abi.encodePacked(fromAddress, toAddress, payload.length, payload))
/// ```
pub fn compute_message_hash(from_address: &Felt, to_address: &Felt, payload: &[Felt]) -> MessageHash {
    let mut data = Vec::with_capacity(32 * (3 + payload.len()));
    data.extend_from_slice(from_address.as_bytes());
    data.extend_from_slice(to_address.as_bytes());
    data.extend_from_slice(Felt::from_u64(payload.len() as u64).as_bytes());
    for word in payload {
        data.extend_from_slice(word.as_bytes());
    }
    MessageHash(keccak256(&data))
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================================================
// Message Hash
// ============================================================================

/// Identity of a message crossing the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageHash(pub [u8; 32]);

impl MessageHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        bytes32_to_hex(&self.0)
    }

    pub fn from_hex(value: &str) -> crate::error::Result<Self> {
        Ok(MessageHash(Felt::from_hex(value)?.0))
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for MessageHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MessageHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MessageHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
