//! Fungible token ledgers
//!
//! [`FungibleLedger`] is the balance book shared by both layers. [`BridgedToken`]
//! is the L1 clone: a ledger plus the minter allowed to mint and burn it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::address_codec::L1Address;
use crate::error::{BridgeError, Result};
use crate::types::TokenMetadata;

// ============================================================================
// Fungible Ledger
// ============================================================================

/// Balances and total supply, keyed by account address.
///
/// Zero balances are removed so the stored map only lists holders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "A: Ord + Serialize",
    deserialize = "A: Ord + Deserialize<'de>"
))]
pub struct FungibleLedger<A> {
    balances: BTreeMap<A, u128>,
    total_supply: u128,
}

impl<A: Ord + Copy + Display> FungibleLedger<A> {
    pub fn new() -> Self {
        Self {
            balances: BTreeMap::new(),
            total_supply: 0,
        }
    }

    pub fn balance_of(&self, account: &A) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn holders(&self) -> impl Iterator<Item = (&A, &u128)> {
        self.balances.iter()
    }

    pub fn mint(&mut self, to: A, amount: u128) -> Result<()> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| BridgeError::AmountOverflow {
                reason: format!("total supply {} + {}", self.total_supply, amount),
            })?;
        // balance <= supply, so this cannot overflow once supply did not
        let balance = self.balance_of(&to) + amount;
        self.total_supply = supply;
        self.set_balance(to, balance);
        Ok(())
    }

    pub fn burn(&mut self, from: A, amount: u128) -> Result<()> {
        let balance = self.debit_amount(&from, amount)?;
        self.total_supply -= amount;
        self.set_balance(from, balance);
        Ok(())
    }

    pub fn transfer(&mut self, from: A, to: A, amount: u128) -> Result<()> {
        let remaining = self.debit_amount(&from, amount)?;
        self.set_balance(from, remaining);
        let credited = self.balance_of(&to) + amount;
        self.set_balance(to, credited);
        Ok(())
    }

    /// Balance left after debiting `amount`, without applying it
    fn debit_amount(&self, from: &A, amount: u128) -> Result<u128> {
        let balance = self.balance_of(from);
        balance
            .checked_sub(amount)
            .ok_or_else(|| BridgeError::InsufficientBalance {
                account: from.to_string(),
                balance,
                requested: amount,
            })
    }

    fn set_balance(&mut self, account: A, balance: u128) {
        if balance == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }
}

// ============================================================================
// Bridged Token (L1 clone)
// ============================================================================

/// Minimal-proxy clone of the L1 base token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgedToken {
    pub address: L1Address,
    pub implementation: L1Address,
    pub metadata: TokenMetadata,
    /// Only this account may mint or burn
    pub minter: L1Address,
    pub ledger: FungibleLedger<L1Address>,
}

impl BridgedToken {
    pub fn new(
        address: L1Address,
        implementation: L1Address,
        metadata: TokenMetadata,
        minter: L1Address,
    ) -> Self {
        Self {
            address,
            implementation,
            metadata,
            minter,
            ledger: FungibleLedger::new(),
        }
    }

    pub fn balance_of(&self, account: &L1Address) -> u128 {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> u128 {
        self.ledger.total_supply()
    }

    pub fn mint(&mut self, caller: L1Address, to: L1Address, amount: u128) -> Result<()> {
        self.ensure_minter(&caller)?;
        self.ledger.mint(to, amount)
    }

    pub fn burn(&mut self, caller: L1Address, from: L1Address, amount: u128) -> Result<()> {
        self.ensure_minter(&caller)?;
        self.ledger.burn(from, amount)
    }

    pub fn transfer(&mut self, from: L1Address, to: L1Address, amount: u128) -> Result<()> {
        self.ledger.transfer(from, to, amount)
    }

    fn ensure_minter(&self, caller: &L1Address) -> Result<()> {
        if *caller != self.minter {
            return Err(BridgeError::Unauthorized {
                reason: format!("{} is not the minter of {}", caller, self.address),
            });
        }
        Ok(())
    }
}
