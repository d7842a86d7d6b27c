//! Devnet
//!
//! Both chains in one process plus the relay hook that moves messages
//! between them. Each chain is an independent [`Chain`]; nothing here spans
//! both atomically. Delivery writes the destination inbox before removing
//! the origin outbox entries, so an interruption can only duplicate a
//! delivery, which consumption absorbs.
//!
//! Other processes may write the same store. Writes always build on the
//! latest stored state; reads see this handle's last commit until
//! [`Devnet::refresh`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::address_codec::{Felt, L1Address};
use crate::chain::Chain;
use crate::config::DevnetConfig;
use crate::error::{BridgeError, Result};
use crate::hash::MessageHash;
use crate::l1::L1Bridge;
use crate::l2::L2Network;
use crate::messaging::PendingMessage;
use crate::payload::BridgePayload;
use crate::store::{MemoryStore, StateStore};
use crate::types::{Layer, Settlement, TokenMetadata, TransferState};

/// Messages delivered by one flush, by direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub from_l1: Vec<PendingMessage>,
    pub from_l2: Vec<PendingMessage>,
    /// L1 -> L2 messages executed on L2 during the flush
    pub settled: Vec<Settlement>,
    /// L1 -> L2 messages whose L2 handler failed, left consumable
    pub failed: Vec<(MessageHash, String)>,
}

/// Amounts emitted but not yet consumed for one L2 token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub to_l1: u128,
    pub to_l2: u128,
}

/// Both sides of the supply equation for one L2 token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReport {
    pub escrow: u128,
    pub l1_supply: u128,
    pub in_flight: InFlight,
}

pub struct Devnet {
    config: DevnetConfig,
    l1: Chain<L1Bridge>,
    l2: Chain<L2Network>,
}

impl Devnet {
    /// Fresh devnet backed by memory
    pub fn new(config: DevnetConfig) -> Result<Self> {
        Self::open(config, Arc::new(MemoryStore::new()))
    }

    /// Restore both chains from `store`, creating them on first use
    pub fn open(config: DevnetConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        let l1 = Chain::open(Layer::L1, store.clone(), || L1Bridge::new(&config))?;
        let l2 = Chain::open(Layer::L2, store, || L2Network::new(&config))?;
        info!(
            l1_bridge = %l1.state().address(),
            l1_height = l1.height(),
            l2_height = l2.height(),
            "Devnet ready"
        );
        Ok(Self { config, l1, l2 })
    }

    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    pub fn l1(&self) -> &L1Bridge {
        self.l1.state()
    }

    pub fn l2(&self) -> &L2Network {
        self.l2.state()
    }

    pub fn heights(&self) -> (u64, u64) {
        (self.l1.height(), self.l2.height())
    }

    /// Pick up commits made to the store by other handles
    pub fn refresh(&mut self) -> Result<()> {
        let l1 = self.l1.refresh()?;
        let l2 = self.l2.refresh()?;
        if l1 || l2 {
            debug!(l1_height = self.l1.height(), l2_height = self.l2.height(), "Devnet refreshed");
        }
        Ok(())
    }

    // ========================================================================
    // L2 Operations
    // ========================================================================

    pub fn deploy_l2_token(
        &mut self,
        salt: Felt,
        metadata: TokenMetadata,
        initial_supply: u128,
        recipient: Felt,
    ) -> Result<Felt> {
        self.l2
            .execute(|l2| l2.deploy_token(salt, metadata, initial_supply, recipient))
    }

    pub fn lock_and_notify(
        &mut self,
        token: Felt,
        caller: Felt,
        amount: u128,
        l1_recipient: L1Address,
    ) -> Result<PendingMessage> {
        self.l2
            .execute(|l2| l2.lock_and_notify(token, caller, amount, l1_recipient))
    }

    pub fn request_l1_instance(&mut self, token: Felt) -> Result<PendingMessage> {
        self.l2.execute(|l2| l2.request_l1_instance(token))
    }

    pub fn consume_and_release(&mut self, message: &PendingMessage) -> Result<Settlement> {
        self.l2.execute(|l2| l2.consume_and_release(message))
    }

    pub fn l2_transfer(&mut self, token: Felt, from: Felt, to: Felt, amount: u128) -> Result<()> {
        self.l2.execute(|l2| l2.transfer(token, from, to, amount))
    }

    // ========================================================================
    // L1 Operations
    // ========================================================================

    pub fn consume_and_mint(&mut self, message: &PendingMessage) -> Result<Settlement> {
        self.l1.execute(|l1| l1.consume_and_mint(message))
    }

    pub fn create_l1_instance(&mut self, message: &PendingMessage) -> Result<Settlement> {
        self.l1.execute(|l1| l1.create_l1_instance(message))
    }

    pub fn burn_and_notify(
        &mut self,
        caller: L1Address,
        l2_token: Felt,
        l2_recipient: Felt,
        amount: u128,
    ) -> Result<PendingMessage> {
        self.l1
            .execute(|l1| l1.burn_and_notify(caller, l2_token, l2_recipient, amount))
    }

    pub fn create_erc20(
        &mut self,
        owner: L1Address,
        salt: &[u8; 32],
        metadata: TokenMetadata,
    ) -> Result<L1Address> {
        self.l1.execute(|l1| l1.create_erc20(owner, salt, metadata))
    }

    pub fn l1_transfer(
        &mut self,
        token: L1Address,
        from: L1Address,
        to: L1Address,
        amount: u128,
    ) -> Result<()> {
        self.l1.execute(|l1| l1.transfer(token, from, to, amount))
    }

    // ========================================================================
    // Relay
    // ========================================================================

    /// Run the handler matching a delivered message on its destination chain
    pub fn submit_consume(&mut self, message: &PendingMessage) -> Result<Settlement> {
        match message.destination() {
            Layer::L2 => self.consume_and_release(message),
            Layer::L1 => match BridgePayload::decode(&message.payload)? {
                BridgePayload::Register { .. } => self.create_l1_instance(message),
                _ => self.consume_and_mint(message),
            },
        }
    }

    /// Deliver every outbox message of `origin` to the other chain
    pub fn deliver_outbox(&mut self, origin: Layer) -> Result<Vec<PendingMessage>> {
        self.refresh()?;
        let messages = match origin {
            Layer::L1 => self.l1().mailbox().outbox().to_vec(),
            Layer::L2 => self.l2().mailbox().outbox().to_vec(),
        };
        if messages.is_empty() {
            return Ok(messages);
        }

        let batch = messages.clone();
        match origin.counterpart() {
            Layer::L1 => self.l1.execute(|l1| deliver_all(l1.mailbox_mut(), batch))?,
            Layer::L2 => self.l2.execute(|l2| deliver_all(l2.mailbox_mut(), batch))?,
        }

        let removed = match origin {
            Layer::L1 => self.l1.execute(|l1| Ok(l1.mailbox_mut().acknowledge(&messages)))?,
            Layer::L2 => self.l2.execute(|l2| Ok(l2.mailbox_mut().acknowledge(&messages)))?,
        };

        debug!(origin = %origin, count = messages.len(), removed = removed, "Delivered outbox");
        Ok(messages)
    }

    /// Delivered, unconsumed messages waiting on `destination`
    pub fn pending_inbox(&mut self, destination: Layer) -> Result<Vec<PendingMessage>> {
        self.refresh()?;
        let mailbox = match destination {
            Layer::L1 => self.l1().mailbox(),
            Layer::L2 => self.l2().mailbox(),
        };
        Ok(mailbox.inbox().cloned().collect())
    }

    /// Deliver both outboxes. With `auto_settle_l1_to_l2`, L1 -> L2 messages
    /// are also executed on L2. L2 -> L1 messages always wait for an
    /// explicit consume on L1.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let from_l1 = self.deliver_outbox(Layer::L1)?;
        let from_l2 = self.deliver_outbox(Layer::L2)?;
        let mut report = FlushReport {
            from_l1,
            from_l2,
            ..Default::default()
        };

        if self.config.auto_settle_l1_to_l2 {
            for message in report.from_l1.clone() {
                match self.consume_and_release(&message) {
                    Ok(settlement) => report.settled.push(settlement),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(hash = %message.hash(), error = %e, "L2 handler failed during flush");
                        report.failed.push((message.hash(), e.to_string()));
                    }
                }
            }
        }

        info!(
            from_l1 = report.from_l1.len(),
            from_l2 = report.from_l2.len(),
            settled = report.settled.len(),
            failed = report.failed.len(),
            "Flushed messages"
        );
        Ok(report)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Lifecycle position of a bridging message
    pub fn transfer_state(&self, message: &PendingMessage) -> TransferState {
        let hash = message.hash();
        let (origin, destination) = match message.origin {
            Layer::L1 => (self.l1().mailbox(), self.l2().mailbox()),
            Layer::L2 => (self.l2().mailbox(), self.l1().mailbox()),
        };

        if destination.is_consumed(&hash) {
            return TransferState::Settled;
        }
        let delivered = destination.is_consumable(&hash);
        let emitted = delivered || origin.outbox().iter().any(|m| m.hash() == hash);
        if !emitted {
            return TransferState::Idle;
        }

        match (message.origin, BridgePayload::decode(&message.payload)) {
            (Layer::L1, _) => TransferState::BurnedPendingRelease { delivered },
            (Layer::L2, Ok(BridgePayload::Register { .. })) => {
                TransferState::PendingRegistration { delivered }
            }
            (Layer::L2, _) => TransferState::LockedPendingMint { delivered },
        }
    }

    /// Emitted-but-unconsumed amounts for `l2_token` in both directions
    pub fn in_flight(&self, l2_token: &Felt) -> Result<InFlight> {
        let to_l1 = self
            .l2()
            .mailbox()
            .outbox()
            .iter()
            .chain(self.l1().mailbox().inbox())
            .filter(|m| m.from_address == *l2_token);
        let to_l2 = self
            .l1()
            .mailbox()
            .outbox()
            .iter()
            .chain(self.l2().mailbox().inbox())
            .filter(|m| m.to_address == *l2_token);

        Ok(InFlight {
            to_l1: sum_amounts(to_l1)?,
            to_l2: sum_amounts(to_l2)?,
        })
    }

    /// Check `escrow == l1_supply + in_flight.to_l1 + in_flight.to_l2` for
    /// `l2_token`.
    pub fn check_supply_invariant(&self, l2_token: &Felt) -> Result<SupplyReport> {
        let token = self
            .l2()
            .token(l2_token)
            .ok_or_else(|| BridgeError::TokenNotFound {
                token: l2_token.to_hex(),
            })?;
        let report = SupplyReport {
            escrow: token.escrow,
            l1_supply: self.l1().bridged_supply(l2_token),
            in_flight: self.in_flight(l2_token)?,
        };

        let accounted = report
            .l1_supply
            .checked_add(report.in_flight.to_l1)
            .and_then(|sum| sum.checked_add(report.in_flight.to_l2));
        if accounted != Some(report.escrow) {
            error!(
                token = %l2_token,
                escrow = report.escrow,
                l1_supply = report.l1_supply,
                to_l1 = report.in_flight.to_l1,
                to_l2 = report.in_flight.to_l2,
                "Supply invariant violated"
            );
            return Err(BridgeError::SupplyInvariantViolated {
                token: l2_token.to_hex(),
                reason: format!(
                    "escrow {} != L1 supply {} + in flight {} + {}",
                    report.escrow,
                    report.l1_supply,
                    report.in_flight.to_l1,
                    report.in_flight.to_l2
                ),
            });
        }
        Ok(report)
    }
}

fn deliver_all(mailbox: &mut crate::messaging::Mailbox, messages: Vec<PendingMessage>) -> Result<()> {
    for message in messages {
        mailbox.deliver(message)?;
    }
    Ok(())
}

/// Sum of DEPOSIT / WITHDRAW amounts, ignoring other kinds
fn sum_amounts<'a>(messages: impl Iterator<Item = &'a PendingMessage>) -> Result<u128> {
    messages
        .filter_map(|m| BridgePayload::decode(&m.payload).ok())
        .try_fold(0u128, |acc, payload| {
            acc.checked_add(payload.amount())
                .ok_or_else(|| BridgeError::AmountOverflow {
                    reason: "in-flight total".to_string(),
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder() -> Felt {
        Felt::from_u128(0xa11ce)
    }

    fn l1_user() -> L1Address {
        L1Address([0x33; 20])
    }

    fn setup(auto_settle: bool) -> (Devnet, Felt) {
        let config = DevnetConfig {
            auto_settle_l1_to_l2: auto_settle,
            ..Default::default()
        };
        let mut devnet = Devnet::new(config).unwrap();
        let token = devnet
            .deploy_l2_token(
                Felt::from_u128(1),
                TokenMetadata::new("TEST", "TST", 18).unwrap(),
                1_000,
                holder(),
            )
            .unwrap();
        (devnet, token)
    }

    #[test]
    fn test_flush_partitions_by_direction() {
        let (mut devnet, token) = setup(true);
        devnet.request_l1_instance(token).unwrap();

        let report = devnet.flush().unwrap();
        assert!(report.from_l1.is_empty());
        assert_eq!(report.from_l2.len(), 1);
        assert_eq!(report.from_l2[0].from_address, token);
        assert_eq!(
            report.from_l2[0].to_address,
            Felt::from(devnet.l1().address())
        );
        assert!(devnet.l2().mailbox().outbox().is_empty());

        // nothing left to deliver
        let report = devnet.flush().unwrap();
        assert_eq!(report, FlushReport::default());
    }

    #[test]
    fn test_transfer_state_lifecycle() {
        let (mut devnet, token) = setup(true);
        let message = devnet
            .lock_and_notify(token, holder(), 100, l1_user())
            .unwrap();
        assert_eq!(
            devnet.transfer_state(&message),
            TransferState::LockedPendingMint { delivered: false }
        );

        devnet.flush().unwrap();
        assert_eq!(
            devnet.transfer_state(&message),
            TransferState::LockedPendingMint { delivered: true }
        );

        devnet.submit_consume(&message).unwrap();
        assert_eq!(devnet.transfer_state(&message), TransferState::Settled);

        let unknown = PendingMessage::new(Layer::L2, token, Felt::ZERO, vec![]);
        assert_eq!(devnet.transfer_state(&unknown), TransferState::Idle);
    }

    #[test]
    fn test_flush_auto_settles_l1_to_l2() {
        let (mut devnet, token) = setup(true);
        let deposit = devnet
            .lock_and_notify(token, holder(), 100, l1_user())
            .unwrap();
        devnet.flush().unwrap();
        devnet.consume_and_mint(&deposit).unwrap();

        let withdraw = devnet
            .burn_and_notify(l1_user(), token, holder(), 100)
            .unwrap();
        assert_eq!(
            devnet.transfer_state(&withdraw),
            TransferState::BurnedPendingRelease { delivered: false }
        );

        let report = devnet.flush().unwrap();
        assert_eq!(report.from_l1.len(), 1);
        assert_eq!(report.settled.len(), 1);
        assert_eq!(devnet.transfer_state(&withdraw), TransferState::Settled);
        assert_eq!(devnet.l2().balance_of(&token, &holder()), 1_000);
    }

    #[test]
    fn test_flush_without_auto_settle_waits_for_consume() {
        let (mut devnet, token) = setup(false);
        let deposit = devnet
            .lock_and_notify(token, holder(), 100, l1_user())
            .unwrap();
        devnet.flush().unwrap();
        devnet.consume_and_mint(&deposit).unwrap();
        let withdraw = devnet
            .burn_and_notify(l1_user(), token, holder(), 60)
            .unwrap();

        let report = devnet.flush().unwrap();
        assert!(report.settled.is_empty());
        assert_eq!(
            devnet.transfer_state(&withdraw),
            TransferState::BurnedPendingRelease { delivered: true }
        );
        devnet.check_supply_invariant(&token).unwrap();

        devnet.submit_consume(&withdraw).unwrap();
        assert_eq!(devnet.l2().balance_of(&token, &holder()), 960);
    }

    #[test]
    fn test_supply_invariant_with_messages_in_flight() {
        let (mut devnet, token) = setup(false);
        let a = devnet.lock_and_notify(token, holder(), 300, l1_user()).unwrap();
        let report = devnet.check_supply_invariant(&token).unwrap();
        assert_eq!(report.escrow, 300);
        assert_eq!(report.in_flight.to_l1, 300);

        devnet.flush().unwrap();
        devnet.consume_and_mint(&a).unwrap();
        devnet.burn_and_notify(l1_user(), token, holder(), 120).unwrap();
        devnet.lock_and_notify(token, holder(), 50, l1_user()).unwrap();

        let report = devnet.check_supply_invariant(&token).unwrap();
        assert_eq!(report.escrow, 350);
        assert_eq!(report.l1_supply, 180);
        assert_eq!(report.in_flight, InFlight { to_l1: 50, to_l2: 120 });

        devnet.flush().unwrap();
        devnet.check_supply_invariant(&token).unwrap();
    }

    #[test]
    fn test_failed_operation_does_not_advance_chain() {
        let (mut devnet, token) = setup(true);
        let heights = devnet.heights();
        assert!(devnet
            .lock_and_notify(token, holder(), 5_000, l1_user())
            .is_err());
        assert_eq!(devnet.heights(), heights);
        assert_eq!(devnet.l2().balance_of(&token, &holder()), 1_000);
    }
}
