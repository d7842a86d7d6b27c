//! Retry policy for consume submission
//!
//! Exponential backoff for transient failures, plus the classification that
//! decides what happens to a message whose consume failed.

use std::time::Duration;

use starkbridge_rs::BridgeError;

/// Consume retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// What a failed consume means for the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Already consumed or never delivered; nothing left to do
    Duplicate,
    /// State storage hiccup; retry with backoff
    Transient,
    /// Handler rejected the message; retry on a later poll
    Rejected,
    /// Invariant violation; stop relaying
    Fatal,
}

pub fn classify_error(error: &BridgeError) -> ErrorClass {
    if error.is_fatal() {
        ErrorClass::Fatal
    } else if error.is_duplicate_delivery() {
        ErrorClass::Duplicate
    } else if matches!(error, BridgeError::Storage { .. }) {
        ErrorClass::Transient
    } else {
        ErrorClass::Rejected
    }
}
