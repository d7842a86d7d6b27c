//! Deterministic Factory
//!
//! Contract addresses on both layers are computable before deployment:
//!
//! | Layer | Scheme | Rule |
//! |-------|--------|------|
//! | L1 | [`Create2`] | `keccak256(0xff ++ deployer ++ salt ++ keccak256(init_code))[12..]` |
//! | L2 | [`StarknetAddress`] | `pedersen_on(PREFIX, deployer, salt, class_hash, pedersen_on(calldata)) mod (2^251 - 256)` |
//!
//! [`CloneFactory`] deploys EIP-1167 minimal proxies of a fixed base token on
//! L1. A salt can be used once; the second `create` fails with
//! `AlreadyDeployed` and leaves the factory untouched.

use serde::{Deserialize, Serialize};
use starknet_crypto::{pedersen_hash, FieldElement};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::address_codec::{encode_short_string, Felt, L1Address};
use crate::error::{BridgeError, Result};
use crate::hash::{compute_create2_address, minimal_proxy_init_code_hash};
use crate::token::BridgedToken;
use crate::types::TokenMetadata;

pub use crate::address_codec::{short_string_to_uint, uint_to_short_string};

/// Short string prefixed to every Starknet contract address preimage
pub const CONTRACT_ADDRESS_PREFIX: &str = "STARKNET_CONTRACT_ADDRESS";

/// `2^251 - 256`, the upper bound of Starknet contract addresses
const L2_ADDRESS_BOUND: [u8; 32] = [
    0x07, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
];

// ============================================================================
// Address Schemes
// ============================================================================

/// A deterministic address derivation for one execution environment
pub trait AddressScheme {
    type Address;
    type Salt;
    /// What identifies the deployed code (init code hash, class + calldata)
    type CodeIdentity;

    fn derive_address(
        deployer: &Self::Address,
        salt: &Self::Salt,
        code: &Self::CodeIdentity,
    ) -> Result<Self::Address>;
}

/// EIP-1014 CREATE2
#[derive(Debug, Clone, Copy)]
pub struct Create2;

impl AddressScheme for Create2 {
    type Address = L1Address;
    type Salt = [u8; 32];
    type CodeIdentity = [u8; 32];

    fn derive_address(
        deployer: &L1Address,
        salt: &[u8; 32],
        init_code_hash: &[u8; 32],
    ) -> Result<L1Address> {
        Ok(compute_create2_address(deployer, salt, init_code_hash))
    }
}

/// Class hash and constructor calldata of a Starknet deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDeployment {
    pub class_hash: Felt,
    pub constructor_calldata: Vec<Felt>,
}

/// Starknet `deploy` syscall address rule
#[derive(Debug, Clone, Copy)]
pub struct StarknetAddress;

impl AddressScheme for StarknetAddress {
    type Address = Felt;
    type Salt = Felt;
    type CodeIdentity = ClassDeployment;

    fn derive_address(deployer: &Felt, salt: &Felt, code: &ClassDeployment) -> Result<Felt> {
        let calldata = code
            .constructor_calldata
            .iter()
            .map(to_field_element)
            .collect::<Result<Vec<_>>>()?;

        let preimage = [
            to_field_element(&encode_short_string(CONTRACT_ADDRESS_PREFIX)?)?,
            to_field_element(deployer)?,
            to_field_element(salt)?,
            to_field_element(&code.class_hash)?,
            pedersen_on(&calldata)?,
        ];
        let raw = pedersen_on(&preimage)?.to_bytes_be();
        Ok(Felt(reduce_below_bound(raw)))
    }
}

fn to_field_element(value: &Felt) -> Result<FieldElement> {
    FieldElement::from_bytes_be(value.as_bytes()).map_err(|_| BridgeError::InvalidFelt {
        value: value.to_hex(),
    })
}

/// Pedersen chain `h(h(h(0, a), b), len)` as computed by `compute_hash_on_elements`
fn pedersen_on(elements: &[FieldElement]) -> Result<FieldElement> {
    let acc = elements
        .iter()
        .fold(FieldElement::ZERO, |acc, element| pedersen_hash(&acc, element));
    let len = to_field_element(&Felt::from_u64(elements.len() as u64))?;
    Ok(pedersen_hash(&acc, &len))
}

/// `value mod (2^251 - 256)` for a value below the field prime
fn reduce_below_bound(value: [u8; 32]) -> [u8; 32] {
    // The prime is below 2 * bound, one subtraction suffices
    if value < L2_ADDRESS_BOUND {
        return value;
    }
    let mut result = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut diff = value[i] as i16 - L2_ADDRESS_BOUND[i] as i16 - borrow;
        borrow = if diff < 0 {
            diff += 256;
            1
        } else {
            0
        };
        result[i] = diff as u8;
    }
    result
}

// ============================================================================
// Clone Factory (L1)
// ============================================================================

/// CREATE2 address of a minimal-proxy clone of `implementation` deployed by
/// `factory` with `salt`.
pub fn compute_address(factory: &L1Address, implementation: &L1Address, salt: &[u8; 32]) -> L1Address {
    compute_create2_address(factory, salt, &minimal_proxy_init_code_hash(implementation))
}

/// Deploys minimal-proxy clones of one base token at CREATE2 addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFactory {
    address: L1Address,
    implementation: L1Address,
    clones: BTreeMap<L1Address, BridgedToken>,
}

impl CloneFactory {
    pub fn new(address: L1Address, implementation: L1Address) -> Self {
        Self {
            address,
            implementation,
            clones: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> L1Address {
        self.address
    }

    pub fn implementation(&self) -> L1Address {
        self.implementation
    }

    pub fn init_code_hash(&self) -> [u8; 32] {
        minimal_proxy_init_code_hash(&self.implementation)
    }

    /// Address `create` will use for `salt`. Pure.
    pub fn compute_address(&self, salt: &[u8; 32]) -> L1Address {
        compute_address(&self.address, &self.implementation, salt)
    }

    /// Deploy a clone initialised with `metadata`, minter = `caller`.
    pub fn create(
        &mut self,
        caller: L1Address,
        salt: &[u8; 32],
        metadata: TokenMetadata,
    ) -> Result<L1Address> {
        metadata.validate()?;
        let address = Create2::derive_address(&self.address, salt, &self.init_code_hash())?;

        if self.clones.contains_key(&address) {
            debug!(address = %address, "Clone address already occupied");
            return Err(BridgeError::AlreadyDeployed {
                address: address.to_string(),
            });
        }

        info!(
            address = %address,
            symbol = %metadata.symbol,
            minter = %caller,
            "Deployed token clone"
        );
        self.clones.insert(
            address,
            BridgedToken::new(address, self.implementation, metadata, caller),
        );
        Ok(address)
    }

    pub fn is_deployed(&self, address: &L1Address) -> bool {
        self.clones.contains_key(address)
    }

    pub fn token(&self, address: &L1Address) -> Option<&BridgedToken> {
        self.clones.get(address)
    }

    pub fn token_mut(&mut self, address: &L1Address) -> Option<&mut BridgedToken> {
        self.clones.get_mut(address)
    }

    pub fn clones(&self) -> impl Iterator<Item = &BridgedToken> {
        self.clones.values()
    }
}
