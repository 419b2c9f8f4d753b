//! RLC - Acknowledged Mode Link-Layer Delivery
//!
//! High-level Rust API for the acknowledged-mode ARQ engine and its
//! deterministic simulation harness.

pub use rlc_protocol as protocol;
pub use rlc_sim as sim;

// Re-export commonly used types
pub use protocol::{AmConfig, AmEntity, AmError, AmPdu, ConnectionKey, SeqNumber};
