//! StarkBridge-RS: L1 (EVM) <-> L2 (Starknet) Token Bridge Core
//!
//! Tokens deployed on L2 are represented on L1 by minimal-proxy clones at
//! deterministic addresses. Messages cross through per-chain outboxes and
//! inboxes, and each one is consumed at most once.
//!
//! - **Address Codec** - Felt and EVM address types, short-string packing
//! - **Hash Computation** - keccak256, CREATE2, message hashes
//! - **Factory** - Deterministic address schemes and the L1 clone factory
//! - **Messaging** - Outbox, inbox and exactly-once consumption
//! - **Registry** - Idempotent L2 token -> L1 clone mapping
//! - **L1 / L2** - Lock, mint, burn and release state machines
//! - **Devnet** - Both chains in-process with persisted state and flush
//! - **Relay** - Driver interface for moving messages between chains
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! starkbridge-rs = { path = "../starkbridge-rs" }
//! ```
//!
//! ## Feature Flags
//!
//! - `testing` - Scenario builders and assertions for tests

pub mod address_codec;
pub mod chain;
pub mod config;
pub mod devnet;
pub mod error;
pub mod factory;
pub mod hash;
pub mod l1;
pub mod l2;
pub mod messaging;
pub mod payload;
pub mod registry;
pub mod relay;
pub mod store;
pub mod token;
pub mod types;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address_codec::{
    decode_short_string, encode_short_string, short_string_to_uint, uint_to_short_string, Felt,
    L1Address,
};
pub use chain::Chain;
pub use config::DevnetConfig;
pub use devnet::{Devnet, FlushReport, InFlight, SupplyReport};
pub use error::{BridgeError, Result};
pub use factory::{AddressScheme, ClassDeployment, CloneFactory, Create2, StarknetAddress};
pub use hash::{compute_create2_address, compute_message_hash, keccak256, MessageHash};
pub use l1::L1Bridge;
pub use l2::{L2Network, L2Token};
pub use messaging::{Mailbox, PendingMessage};
pub use payload::BridgePayload;
pub use registry::{BridgeRegistry, BridgeRegistryEntry};
pub use relay::{DevnetRelay, RelayDriver};
pub use store::{JsonFileStore, MemoryStore, SnapshotUpdate, StateStore};
pub use token::{BridgedToken, FungibleLedger};
pub use types::{Layer, Settlement, TokenMetadata, TransferState};
