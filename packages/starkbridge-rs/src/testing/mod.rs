//! Testing Utilities Module
//!
//! Helpers shared by unit, integration and relayer tests.
//!
//! ## Submodules
//!
//! - `scenario` - Devnet with deployed L2 tokens and one-call bridging flows
//! - `assertions` - Common bridge assertions

pub mod assertions;
pub mod scenario;

pub use assertions::*;
pub use scenario::*;
