//! Relayer loop
//!
//! Each poll drains the L2 outbox, then the L1 outbox, and submits the
//! matching consume for every message on its destination chain. It then
//! sweeps both inboxes for delivered messages nobody settled, which covers
//! deliveries made by a run that stopped before consuming them. A message
//! counts as settled only once its consume succeeded.
//!
//! Failure handling per message:
//! - `UnknownMessage`: already consumed elsewhere, recorded as a duplicate
//! - storage errors: retried in place with exponential backoff
//! - handler rejections: deferred to the next poll, dead-lettered after
//!   `max_retries` polls
//! - invariant violations: the relayer stops with an error

use std::collections::HashSet;
use std::time::Duration;

use eyre::{eyre, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use starkbridge_rs::{BridgeError, Layer, MessageHash, PendingMessage, RelayDriver, Settlement};

use crate::bounded_cache::HandledMessageCache;
use crate::config::RelayerConfig;
use crate::metrics;
use crate::retry::{classify_error, ErrorClass, RetryConfig};

/// Outcome counts of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub observed: usize,
    /// Delivered messages picked up from an inbox rather than an outbox
    pub recovered: usize,
    pub settled: Vec<Settlement>,
    pub duplicates: usize,
    pub deferred: usize,
    pub dead_lettered: usize,
}

/// A message whose consume was rejected, kept for a later poll
#[derive(Debug, Clone)]
pub struct DeferredMessage {
    pub message: PendingMessage,
    pub attempts: u32,
    pub last_error: String,
}

pub struct Relayer<D: RelayDriver> {
    driver: D,
    retry: RetryConfig,
    poll_interval: Duration,
    handled: HandledMessageCache,
    deferred: Vec<DeferredMessage>,
    dead_letters: Vec<DeferredMessage>,
}

impl<D: RelayDriver> Relayer<D> {
    pub fn new(driver: D, config: &RelayerConfig) -> Self {
        Self {
            driver,
            retry: config.retry_config(),
            poll_interval: config.poll_interval(),
            handled: HandledMessageCache::new(config.cache_max_size, config.cache_ttl_secs),
            deferred: Vec::new(),
            dead_letters: Vec::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn deferred(&self) -> &[DeferredMessage] {
        &self.deferred
    }

    pub fn dead_letters(&self) -> &[DeferredMessage] {
        &self.dead_letters
    }

    pub fn is_handled(&self, hash: &MessageHash) -> bool {
        self.handled.contains(hash)
    }

    /// Poll until a shutdown signal arrives or a fatal error occurs
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_retries = self.retry.max_retries,
            "Starting relayer loop"
        );
        metrics::UP.set(1.0);

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.poll_once().await {
                        Ok(report) if report.observed > 0 || report.recovered > 0 || report.deferred > 0 => {
                            info!(
                                observed = report.observed,
                                recovered = report.recovered,
                                settled = report.settled.len(),
                                duplicates = report.duplicates,
                                deferred = report.deferred,
                                dead_lettered = report.dead_lettered,
                                "Poll complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        metrics::UP.set(0.0);
        result
    }

    /// One pass over the deferred messages, both outboxes and both inboxes
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let mut report = PollReport::default();
        let mut seen = HashSet::new();

        let retries = std::mem::take(&mut self.deferred);
        for entry in retries {
            seen.insert(entry.message.hash());
            self.process(entry.message, entry.attempts, &mut report)
                .await?;
        }

        for origin in [Layer::L2, Layer::L1] {
            let messages = match self.driver.observe_outbox(origin).await {
                Ok(messages) => messages,
                Err(e) if e.is_fatal() => return Err(eyre!("Fatal error observing {}: {}", origin, e)),
                Err(e) => {
                    warn!(origin = %origin, error = %e, "Failed to observe outbox");
                    metrics::ERRORS
                        .with_label_values(&[direction(origin), "observe"])
                        .inc();
                    continue;
                }
            };

            report.observed += messages.len();
            metrics::MESSAGES_OBSERVED
                .with_label_values(&[direction(origin)])
                .inc_by(messages.len() as f64);

            for message in messages {
                seen.insert(message.hash());
                self.process(message, 0, &mut report).await?;
            }
        }

        for destination in [Layer::L1, Layer::L2] {
            let pending = match self.driver.pending_inbox(destination).await {
                Ok(pending) => pending,
                Err(e) if e.is_fatal() => {
                    return Err(eyre!("Fatal error reading {} inbox: {}", destination, e))
                }
                Err(e) => {
                    warn!(destination = %destination, error = %e, "Failed to read inbox");
                    metrics::ERRORS
                        .with_label_values(&[direction(destination.counterpart()), "inbox"])
                        .inc();
                    continue;
                }
            };

            for message in pending {
                let hash = message.hash();
                if !seen.insert(hash)
                    || self.handled.contains(&hash)
                    || self.dead_letters.iter().any(|d| d.message.hash() == hash)
                {
                    continue;
                }
                info!(hash = %hash, destination = %destination, "Recovered unsettled delivery");
                report.recovered += 1;
                self.process(message, 0, &mut report).await?;
            }
        }

        report.deferred = self.deferred.len();
        metrics::DEFERRED.set(self.deferred.len() as f64);
        Ok(report)
    }

    async fn process(
        &mut self,
        message: PendingMessage,
        attempts: u32,
        report: &mut PollReport,
    ) -> Result<()> {
        let hash = message.hash();
        let label = direction(message.origin);

        if self.handled.contains(&hash) {
            debug!(hash = %hash, "Skipping handled message");
            report.duplicates += 1;
            metrics::DUPLICATES_SKIPPED.with_label_values(&[label]).inc();
            return Ok(());
        }

        match self.submit_with_backoff(&message).await {
            Ok(settlement) => {
                info!(hash = %hash, direction = label, kind = settlement_kind(&settlement), "Message settled");
                metrics::MESSAGES_SETTLED
                    .with_label_values(&[label, settlement_kind(&settlement)])
                    .inc();
                self.handled.insert(hash);
                report.settled.push(settlement);
            }
            Err(e) => match classify_error(&e) {
                ErrorClass::Duplicate => {
                    debug!(hash = %hash, "Message already consumed");
                    metrics::DUPLICATES_SKIPPED.with_label_values(&[label]).inc();
                    self.handled.insert(hash);
                    report.duplicates += 1;
                }
                ErrorClass::Fatal => {
                    error!(hash = %hash, error = %e, "Invariant violation while relaying, stopping");
                    metrics::ERRORS.with_label_values(&[label, "fatal"]).inc();
                    return Err(eyre!("Fatal error relaying {}: {}", hash, e));
                }
                class @ (ErrorClass::Transient | ErrorClass::Rejected) => {
                    let attempts = attempts + 1;
                    let class_label = if class == ErrorClass::Transient {
                        "transient"
                    } else {
                        "rejected"
                    };
                    metrics::ERRORS.with_label_values(&[label, class_label]).inc();
                    let entry = DeferredMessage {
                        message,
                        attempts,
                        last_error: e.to_string(),
                    };
                    if self.retry.should_retry(attempts) {
                        warn!(hash = %hash, attempts = attempts, error = %e, "Consume failed, deferring");
                        self.deferred.push(entry);
                    } else {
                        error!(hash = %hash, attempts = attempts, error = %e, "Consume failed, dead-lettering");
                        metrics::DEAD_LETTERS.inc();
                        self.dead_letters.push(entry);
                        report.dead_lettered += 1;
                    }
                }
            },
        }
        Ok(())
    }

    /// Submit, retrying transient failures in place
    async fn submit_with_backoff(&self, message: &PendingMessage) -> Result<Settlement, BridgeError> {
        let mut attempt = 0;
        loop {
            match self.driver.submit_consume(message).await {
                Err(e)
                    if classify_error(&e) == ErrorClass::Transient
                        && self.retry.should_retry(attempt) =>
                {
                    let backoff = self.retry.backoff_for_attempt(attempt);
                    debug!(
                        hash = %message.hash(),
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient consume failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn direction(origin: Layer) -> &'static str {
    match origin {
        Layer::L1 => "l1_to_l2",
        Layer::L2 => "l2_to_l1",
    }
}

fn settlement_kind(settlement: &Settlement) -> &'static str {
    match settlement {
        Settlement::Minted { .. } => "mint",
        Settlement::Registered { .. } => "register",
        Settlement::Released { .. } => "release",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use starkbridge_rs::Felt;

    /// Driver that returns scripted consume results
    struct ScriptedDriver {
        outbox: Mutex<Vec<PendingMessage>>,
        inbox: Mutex<Vec<PendingMessage>>,
        results: Mutex<Vec<Result<Settlement, BridgeError>>>,
        submits: AtomicU32,
    }

    impl ScriptedDriver {
        fn new(outbox: Vec<PendingMessage>, results: Vec<Result<Settlement, BridgeError>>) -> Self {
            Self {
                outbox: Mutex::new(outbox),
                inbox: Mutex::new(Vec::new()),
                results: Mutex::new(results),
                submits: AtomicU32::new(0),
            }
        }

        /// Messages already sitting in a destination inbox
        fn with_inbox(self, inbox: Vec<PendingMessage>) -> Self {
            *self.inbox.lock().unwrap() = inbox;
            self
        }
    }

    #[async_trait]
    impl RelayDriver for ScriptedDriver {
        async fn observe_outbox(&self, origin: Layer) -> starkbridge_rs::Result<Vec<PendingMessage>> {
            let mut outbox = self.outbox.lock().unwrap();
            let (taken, kept): (Vec<_>, Vec<_>) =
                outbox.drain(..).partition(|m| m.origin == origin);
            *outbox = kept;
            Ok(taken)
        }

        async fn pending_inbox(&self, destination: Layer) -> starkbridge_rs::Result<Vec<PendingMessage>> {
            let inbox = self.inbox.lock().unwrap();
            Ok(inbox
                .iter()
                .filter(|m| m.destination() == destination)
                .cloned()
                .collect())
        }

        async fn submit_consume(&self, _message: &PendingMessage) -> starkbridge_rs::Result<Settlement> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Err(BridgeError::UnknownMessage {
                    hash: "0x0".to_string(),
                });
            }
            results.remove(0)
        }
    }

    fn message() -> PendingMessage {
        PendingMessage::new(
            Layer::L2,
            Felt::from_u64(0x10),
            Felt::from_u64(0x20),
            vec![Felt::from_u64(1), Felt::from_u64(2)],
        )
    }

    fn settlement(message: &PendingMessage) -> Settlement {
        Settlement::Registered {
            message: message.hash(),
            l2_token: message.from_address,
            l1_token: starkbridge_rs::L1Address([0x11; 20]),
        }
    }

    fn config(max_retries: u32) -> RelayerConfig {
        RelayerConfig {
            max_retries,
            initial_backoff_ms: 1,
            ..RelayerConfig::default()
        }
    }

    fn rejected() -> BridgeError {
        BridgeError::TokenNotFound {
            token: "0x20".to_string(),
        }
    }

    #[tokio::test]
    async fn test_settles_and_caches() {
        let msg = message();
        let driver = ScriptedDriver::new(vec![msg.clone()], vec![Ok(settlement(&msg))]);
        let mut relayer = Relayer::new(driver, &config(3));

        let report = relayer.poll_once().await.unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.settled.len(), 1);
        assert!(relayer.is_handled(&msg.hash()));
    }

    #[tokio::test]
    async fn test_unknown_message_is_duplicate() {
        let msg = message();
        let driver = ScriptedDriver::new(vec![msg.clone()], vec![]);
        let mut relayer = Relayer::new(driver, &config(3));

        let report = relayer.poll_once().await.unwrap();
        assert_eq!(report.duplicates, 1);
        assert!(report.settled.is_empty());
        assert!(relayer.deferred().is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_retried_in_place() {
        let msg = message();
        let storage = BridgeError::Storage {
            reason: "locked".to_string(),
        };
        let driver = ScriptedDriver::new(
            vec![msg.clone()],
            vec![Err(storage.clone()), Err(storage), Ok(settlement(&msg))],
        );
        let mut relayer = Relayer::new(driver, &config(3));

        let report = relayer.poll_once().await.unwrap();
        assert_eq!(report.settled.len(), 1);
        assert_eq!(relayer.driver().submits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_deferred_then_dead_lettered() {
        let msg = message();
        let driver = ScriptedDriver::new(vec![msg.clone()], vec![Err(rejected()), Err(rejected())]);
        let mut relayer = Relayer::new(driver, &config(2));

        let first = relayer.poll_once().await.unwrap();
        assert_eq!(first.deferred, 1);
        assert_eq!(relayer.deferred()[0].attempts, 1);

        let second = relayer.poll_once().await.unwrap();
        assert_eq!(second.dead_lettered, 1);
        assert!(relayer.deferred().is_empty());
        assert_eq!(relayer.dead_letters().len(), 1);
        assert!(!relayer.is_handled(&msg.hash()));
    }

    #[tokio::test]
    async fn test_fatal_error_stops() {
        let msg = message();
        let conflict = BridgeError::RegistryConflict {
            remote_token: msg.from_address.to_hex(),
            reason: "clone address taken".to_string(),
        };
        let driver = ScriptedDriver::new(vec![msg], vec![Err(conflict)]);
        let mut relayer = Relayer::new(driver, &config(3));

        assert!(relayer.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn test_unsettled_inbox_message_is_recovered() {
        let msg = message();
        let driver =
            ScriptedDriver::new(vec![], vec![Ok(settlement(&msg))]).with_inbox(vec![msg.clone()]);
        let mut relayer = Relayer::new(driver, &config(3));

        let report = relayer.poll_once().await.unwrap();
        assert_eq!(report.observed, 0);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.settled.len(), 1);
        assert!(relayer.is_handled(&msg.hash()));
    }

    #[tokio::test]
    async fn test_observed_message_is_not_swept_twice() {
        let msg = message();
        // the outbox delivery also shows up in the inbox within the same poll
        let driver = ScriptedDriver::new(vec![msg.clone()], vec![Err(rejected())])
            .with_inbox(vec![msg.clone()]);
        let mut relayer = Relayer::new(driver, &config(3));

        let report = relayer.poll_once().await.unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(relayer.driver().submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_is_not_swept_again() {
        let msg = message();
        let driver = ScriptedDriver::new(vec![], vec![Err(rejected()), Err(rejected())])
            .with_inbox(vec![msg.clone()]);
        let mut relayer = Relayer::new(driver, &config(2));

        assert_eq!(relayer.poll_once().await.unwrap().deferred, 1);
        assert_eq!(relayer.poll_once().await.unwrap().dead_lettered, 1);
        let third = relayer.poll_once().await.unwrap();
        assert_eq!(third.recovered, 0);
        assert_eq!(relayer.driver().submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let driver = ScriptedDriver::new(vec![], vec![]);
        let mut relayer = Relayer::new(driver, &config(3));
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        relayer.run(rx).await.unwrap();
    }
}
