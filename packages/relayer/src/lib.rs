//! StarkBridge Relayer
//!
//! Moves bridge messages between the L1 and L2 chains of a persisted devnet
//! and exposes the devnet operations as a CLI.
//!
//! - `config` - Environment-driven relayer configuration
//! - `relayer` - Poll loop with retries, dead letters and duplicate tracking
//! - `commands` - One-shot CLI operations over the devnet state directory
//! - `metrics` - Prometheus counters

pub mod bounded_cache;
pub mod commands;
pub mod config;
pub mod metrics;
pub mod relayer;
pub mod retry;

pub use config::RelayerConfig;
pub use relayer::{PollReport, Relayer};
pub use retry::{classify_error, ErrorClass, RetryConfig};
