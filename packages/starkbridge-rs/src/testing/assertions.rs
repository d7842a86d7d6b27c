//! Common Bridge Assertions

use eyre::{eyre, Result};

use crate::address_codec::Felt;
use crate::devnet::{Devnet, SupplyReport};
use crate::error::BridgeError;
use crate::messaging::PendingMessage;
use crate::types::{Settlement, TransferState};

/// Assert that a consume attempt was rejected as a duplicate
pub fn assert_duplicate_delivery<T: std::fmt::Debug>(result: &Result<T, BridgeError>) -> Result<()> {
    match result {
        Err(e) if e.is_duplicate_delivery() => Ok(()),
        Err(e) => Err(eyre!("Expected UnknownMessage, got error: {}", e)),
        Ok(value) => Err(eyre!("Expected UnknownMessage, got success: {:?}", value)),
    }
}

/// Assert that a message has been consumed on its destination
pub fn assert_settled(devnet: &Devnet, message: &PendingMessage) -> Result<()> {
    match devnet.transfer_state(message) {
        TransferState::Settled => Ok(()),
        other => Err(eyre!(
            "Message {} not settled: {:?}",
            message.hash(),
            other
        )),
    }
}

/// Assert the supply invariant for `l2_token` and return the report
pub fn assert_supply_invariant(devnet: &Devnet, l2_token: &Felt) -> Result<SupplyReport> {
    devnet
        .check_supply_invariant(l2_token)
        .map_err(|e| eyre!("Supply invariant check failed: {}", e))
}

/// Assert that nothing is in flight for `l2_token`
pub fn assert_quiescent(devnet: &Devnet, l2_token: &Felt) -> Result<()> {
    let report = assert_supply_invariant(devnet, l2_token)?;
    if report.in_flight.to_l1 != 0 || report.in_flight.to_l2 != 0 {
        return Err(eyre!(
            "Expected no messages in flight for {}, got to_l1={} to_l2={}",
            l2_token,
            report.in_flight.to_l1,
            report.in_flight.to_l2
        ));
    }
    if report.escrow != report.l1_supply {
        return Err(eyre!(
            "Escrow {} does not match L1 supply {}",
            report.escrow,
            report.l1_supply
        ));
    }
    Ok(())
}

/// Assert that a settlement minted exactly `amount`
pub fn assert_minted(settlement: &Settlement, expected: u128) -> Result<()> {
    match settlement {
        Settlement::Minted { amount, .. } if *amount == expected => Ok(()),
        other => Err(eyre!("Expected mint of {}, got {:?}", expected, other)),
    }
}

/// Assert that a balance changed by exactly `delta` in the given direction
pub fn assert_balance_delta(before: u128, after: u128, delta: u128, increased: bool) -> Result<()> {
    let actual = if increased {
        after.checked_sub(before)
    } else {
        before.checked_sub(after)
    };
    if actual != Some(delta) {
        return Err(eyre!(
            "Balance {} mismatch: expected {}, before {}, after {}",
            if increased { "increase" } else { "decrease" },
            delta,
            before,
            after
        ));
    }
    Ok(())
}
