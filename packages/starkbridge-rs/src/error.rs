//! Error types for the bridge core
//!
//! `UnknownMessage` is the expected outcome of a duplicate relay attempt and is
//! not fatal. `RegistryConflict` and `SupplyInvariantViolated` are invariant
//! violations and must never be silently resolved.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // ========================================================================
    // Factory Errors
    // ========================================================================
    #[error("Contract already deployed at {address}")]
    AlreadyDeployed { address: String },

    // ========================================================================
    // Ledger Errors
    // ========================================================================
    #[error("Insufficient balance for {account}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        account: String,
        balance: u128,
        requested: u128,
    },

    #[error("Amount overflow: {reason}")]
    AmountOverflow { reason: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    #[error("Unknown message {hash}: never delivered or already consumed")]
    UnknownMessage { hash: String },

    #[error("Invalid message payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    #[error("Registry conflict for remote token {remote_token}: {reason}")]
    RegistryConflict { remote_token: String, reason: String },

    #[error("Token not registered on L1: {remote_token}")]
    TokenNotRegistered { remote_token: String },

    #[error("Token not found: {token}")]
    TokenNotFound { token: String },

    #[error("Supply invariant violated for {token}: {reason}")]
    SupplyInvariantViolated { token: String, reason: String },

    // ========================================================================
    // Encoding Errors
    // ========================================================================
    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Invalid short string {value:?}: {reason}")]
    InvalidShortString { value: String, reason: String },

    #[error("Value is not a valid field element: {value}")]
    InvalidFelt { value: String },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    #[error("State storage error: {reason}")]
    Storage { reason: String },
}

impl BridgeError {
    /// True for invariant violations that indicate a protocol bug.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::RegistryConflict { .. } | BridgeError::SupplyInvariantViolated { .. }
        )
    }

    /// True when a consume attempt hit a message that is not (or no longer)
    /// consumable, which is what a resubmitted relay produces.
    pub fn is_duplicate_delivery(&self) -> bool {
        matches!(self, BridgeError::UnknownMessage { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Storage {
            reason: err.to_string(),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unknown = BridgeError::UnknownMessage {
            hash: "0x01".to_string(),
        };
        assert!(unknown.is_duplicate_delivery());
        assert!(!unknown.is_fatal());

        let conflict = BridgeError::RegistryConflict {
            remote_token: "0x02".to_string(),
            reason: "address occupied".to_string(),
        };
        assert!(conflict.is_fatal());
        assert!(!conflict.is_duplicate_delivery());

        let balance = BridgeError::InsufficientBalance {
            account: "0x03".to_string(),
            balance: 1,
            requested: 2,
        };
        assert!(!balance.is_fatal());
        assert!(!balance.is_duplicate_delivery());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::AlreadyDeployed {
            address: "0xabc".to_string(),
        };
        assert_eq!(err.to_string(), "Contract already deployed at 0xabc");
    }
}
