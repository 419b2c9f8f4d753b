//! RLC Acknowledged Mode Protocol Core
//!
//! This crate implements the acknowledged-mode ARQ engine of a radio link
//! control layer: PDU structures, sliding transmission and reception windows,
//! fragmentation and reassembly, cumulative/selective acknowledgment, bounded
//! retransmission with SDU discard, and the Move Receiving Window handshake.
//!
//! The engine is sans-IO and single-threaded: every operation takes the
//! current time, outbound PDUs and reassembled SDUs are drained by polling,
//! and timers are surfaced as deadlines the caller feeds back in.

pub mod config;
pub mod entity;
pub mod pdu;
pub mod rx;
pub mod sequence;
pub mod timer;
pub mod tx;
pub mod window;

pub use config::{AmConfig, ConfigError};
pub use entity::{AmEntity, AmError, ConnectionKey, ConnectionStats};
pub use pdu::{AmPdu, ControlPdu, DataPdu, PduError};
pub use rx::{RxBuffer, RxError, RxStats};
pub use sequence::SeqNumber;
pub use timer::{RxTimerKey, TimerTable, TxTimerKey};
pub use tx::{TxBuffer, TxError, TxStats};
pub use window::{FragDesc, MrwDesc, SlotArena, WindowDesc, WindowError};
