//! Deterministic simulation harness for the AM protocol engine
//!
//! Builds two peered entities, joins them with scripted-loss links and drives
//! them on a virtual clock. Used by the integration and property tests.

pub mod clock;
pub mod harness;
pub mod link;

pub use clock::VirtualClock;
pub use harness::{Harness, HarnessError};
pub use link::Link;
