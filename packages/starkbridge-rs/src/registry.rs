//! Bridge Registry
//!
//! Maps each L2 token to its L1 clone. Entries are created once by
//! [`BridgeRegistry::register_or_create`], never mutated and never removed.
//! The clone address is the CREATE2 address for `salt = l2_token`, so any
//! creator racing for the same token lands on the same address.
//!
//! Racing creators are serialized by the chain: every commit runs against
//! the latest stored state, so the second creator's lookup already sees the
//! first one's entry and returns it. An occupied clone address with no entry
//! behind it is therefore never a lost race; it is a `RegistryConflict`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::address_codec::{Felt, L1Address};
use crate::error::{BridgeError, Result};
use crate::factory::CloneFactory;
use crate::types::TokenMetadata;

/// One L2 token <-> L1 clone relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRegistryEntry {
    pub remote_token_id: Felt,
    pub local_clone_address: L1Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Bijective L2 token -> L1 clone map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRegistry {
    by_remote: BTreeMap<Felt, BridgeRegistryEntry>,
    by_local: BTreeMap<L1Address, Felt>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, remote_token_id: &Felt) -> Option<L1Address> {
        self.by_remote
            .get(remote_token_id)
            .map(|entry| entry.local_clone_address)
    }

    pub fn entry(&self, remote_token_id: &Felt) -> Option<&BridgeRegistryEntry> {
        self.by_remote.get(remote_token_id)
    }

    pub fn remote_of(&self, local_clone_address: &L1Address) -> Option<Felt> {
        self.by_local.get(local_clone_address).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = &BridgeRegistryEntry> {
        self.by_remote.values()
    }

    pub fn len(&self) -> usize {
        self.by_remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_remote.is_empty()
    }

    /// Return the clone for `remote_token_id`, deploying it through `factory`
    /// on first use. `owner` becomes the clone's minter.
    ///
    /// Metadata of an existing entry is never updated.
    pub fn register_or_create(
        &mut self,
        factory: &mut CloneFactory,
        owner: L1Address,
        remote_token_id: Felt,
        metadata: &TokenMetadata,
    ) -> Result<L1Address> {
        if let Some(address) = self.lookup(&remote_token_id) {
            debug!(remote_token = %remote_token_id, clone = %address, "Clone already registered");
            return Ok(address);
        }

        let salt = *remote_token_id.as_bytes();
        let expected = factory.compute_address(&salt);

        if let Some(other) = self.remote_of(&expected) {
            return Err(conflict(
                remote_token_id,
                format!("clone address {} already serves {}", expected, other),
            ));
        }

        let address = match factory.create(owner, &salt, metadata.clone()) {
            Ok(address) => address,
            Err(BridgeError::AlreadyDeployed { address }) => {
                // the lookup above ran on the latest state, so this is not a racing creator
                return Err(conflict(
                    remote_token_id,
                    format!("clone address {} occupied by an unregistered deployment", address),
                ));
            }
            Err(e) => return Err(e),
        };

        if address != expected {
            return Err(conflict(
                remote_token_id,
                format!("factory deployed {} but {} was derived", address, expected),
            ));
        }

        self.by_remote.insert(
            remote_token_id,
            BridgeRegistryEntry {
                remote_token_id,
                local_clone_address: address,
                name: metadata.name.clone(),
                symbol: metadata.symbol.clone(),
                decimals: metadata.decimals,
            },
        );
        self.by_local.insert(address, remote_token_id);

        info!(
            remote_token = %remote_token_id,
            clone = %address,
            symbol = %metadata.symbol,
            "Registered bridged token"
        );
        Ok(address)
    }
}

fn conflict(remote_token_id: Felt, reason: String) -> BridgeError {
    error!(remote_token = %remote_token_id, reason = %reason, "Registry conflict");
    BridgeError::RegistryConflict {
        remote_token: remote_token_id.to_hex(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> CloneFactory {
        CloneFactory::new(L1Address([0xe7; 20]), L1Address([0x5f; 20]))
    }

    fn metadata(symbol: &str) -> TokenMetadata {
        TokenMetadata::new("Token", symbol, 18).unwrap()
    }

    #[test]
    fn test_register_or_create_is_idempotent() {
        let mut factory = factory();
        let mut registry = BridgeRegistry::new();
        let owner = factory.address();
        let remote = Felt::from_u128(0x1111);

        let first = registry
            .register_or_create(&mut factory, owner, remote, &metadata("TST"))
            .unwrap();
        assert_eq!(first, factory.compute_address(remote.as_bytes()));

        // second call with different metadata returns the same clone unchanged
        let second = registry
            .register_or_create(&mut factory, owner, remote, &metadata("XXX"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.clones().count(), 1);
        assert_eq!(registry.entry(&remote).unwrap().symbol, "TST");
    }

    #[test]
    fn test_registry_is_bijective() {
        let mut factory = factory();
        let mut registry = BridgeRegistry::new();
        let owner = factory.address();

        let a = registry
            .register_or_create(&mut factory, owner, Felt::from_u128(1), &metadata("A"))
            .unwrap();
        let b = registry
            .register_or_create(&mut factory, owner, Felt::from_u128(2), &metadata("B"))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.remote_of(&a), Some(Felt::from_u128(1)));
        assert_eq!(registry.remote_of(&b), Some(Felt::from_u128(2)));
        assert_eq!(registry.lookup(&Felt::from_u128(3)), None);
    }

    #[test]
    fn test_unregistered_deployment_is_conflict() {
        let mut factory = factory();
        let mut registry = BridgeRegistry::new();
        let remote = Felt::from_u128(0x2222);

        // someone deploys directly at the token's salt
        factory
            .create(L1Address([0x99; 20]), remote.as_bytes(), metadata("EVIL"))
            .unwrap();
        let before = registry.clone();
        let owner = factory.address();

        let err = registry
            .register_or_create(&mut factory, owner, remote, &metadata("TST"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, BridgeError::RegistryConflict { .. }));
        assert_eq!(registry, before);
    }

    #[test]
    fn test_invalid_metadata_registers_nothing() {
        let mut factory = factory();
        let mut registry = BridgeRegistry::new();
        let bad = TokenMetadata {
            name: "N".repeat(40),
            symbol: "TST".to_string(),
            decimals: 18,
        };
        let owner = factory.address();
        assert!(registry
            .register_or_create(&mut factory, owner, Felt::from_u128(5), &bad)
            .is_err());
        assert!(registry.is_empty());
    }
}
