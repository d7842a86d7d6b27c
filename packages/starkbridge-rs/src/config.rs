//! Devnet configuration
//!
//! Defaults mirror a fresh local deployment: the base token is the first
//! contract deployed by the default Hardhat account, the bridge the second.

use serde::{Deserialize, Serialize};

use crate::address_codec::{Felt, L1Address};

/// `0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512`
pub const DEFAULT_L1_BRIDGE: L1Address = L1Address([
    0xe7, 0xf1, 0x72, 0x5e, 0x77, 0x34, 0xce, 0x28, 0x8f, 0x83, 0x67, 0xe1, 0xbb, 0x14, 0x3e, 0x90,
    0xbb, 0x3f, 0x05, 0x12,
]);

/// `0x5FbDB2315678afecb367f032d93F642f64180aa3`
pub const DEFAULT_L1_BASE_TOKEN: L1Address = L1Address([
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f,
    0x64, 0x18, 0x0a, 0xa3,
]);

/// Universal deployer on starknet-devnet
pub const DEFAULT_L2_DEPLOYER: Felt = Felt([
    0x04, 0x1a, 0x78, 0xe7, 0x41, 0xe5, 0xaf, 0x2f, 0xec, 0x34, 0xb6, 0x95, 0x67, 0x9b, 0xc6, 0x89,
    0x17, 0x42, 0x43, 0x9f, 0x7a, 0xfb, 0x84, 0x84, 0xec, 0xd7, 0x76, 0x66, 0x61, 0xad, 0x02, 0xbf,
]);

/// Class hash of the bridgeable L2 token
pub const DEFAULT_L2_TOKEN_CLASS_HASH: Felt = Felt([
    0x02, 0xa8, 0x84, 0x68, 0x78, 0xb6, 0xad, 0x1f, 0x54, 0xf6, 0xba, 0x46, 0xf5, 0xf4, 0x0e, 0x11,
    0xce, 0xe7, 0x55, 0xc6, 0x77, 0xf1, 0x30, 0xb2, 0xc4, 0xb6, 0x05, 0x66, 0xc9, 0x00, 0x3f, 0x1f,
]);

/// Addresses and behaviour of the in-process chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevnetConfig {
    /// L1 bridge, also the clone factory and every clone's minter
    pub l1_bridge_address: L1Address,
    /// Implementation all clones delegate to
    pub l1_base_token: L1Address,
    pub l2_deployer_address: Felt,
    pub l2_token_class_hash: Felt,
    /// Run the L2 handler for L1 -> L2 messages during flush
    pub auto_settle_l1_to_l2: bool,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            l1_bridge_address: DEFAULT_L1_BRIDGE,
            l1_base_token: DEFAULT_L1_BASE_TOKEN,
            l2_deployer_address: DEFAULT_L2_DEPLOYER,
            l2_token_class_hash: DEFAULT_L2_TOKEN_CLASS_HASH,
            auto_settle_l1_to_l2: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let config = DevnetConfig::default();
        assert_eq!(
            config.l1_bridge_address,
            L1Address::from_hex("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512").unwrap()
        );
        assert_eq!(
            config.l1_base_token,
            L1Address::from_hex("0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap()
        );
        assert!(config.auto_settle_l1_to_l2);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DevnetConfig =
            serde_json::from_str(r#"{ "auto_settle_l1_to_l2": false }"#).unwrap();
        assert!(!config.auto_settle_l1_to_l2);
        assert_eq!(config.l1_bridge_address, DEFAULT_L1_BRIDGE);
    }
}
