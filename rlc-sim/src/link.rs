//! In-order lossy link between two AM entities
//!
//! PDUs cross the link in wire form, so every run also exercises the codec.
//! Losses are scripted by transmission index, which keeps runs deterministic.

use bytes::Bytes;
use rlc_protocol::{AmPdu, ConnectionKey, PduError};
use std::collections::{BTreeSet, VecDeque};
use tracing::trace;

/// One direction of a point-to-point link
pub struct Link {
    inflight: VecDeque<(ConnectionKey, Bytes)>,
    /// Transmission indexes to drop
    drops: BTreeSet<u64>,
    sent: u64,
    lost: u64,
}

impl Link {
    pub fn new() -> Self {
        Self::with_drops(&[])
    }

    /// A link that silently loses the PDUs at the given transmission indexes
    pub fn with_drops(drops: &[u64]) -> Self {
        Link {
            inflight: VecDeque::new(),
            drops: drops.iter().copied().collect(),
            sent: 0,
            lost: 0,
        }
    }

    /// Put one PDU on the wire
    pub fn push(&mut self, key: ConnectionKey, pdu: &AmPdu) {
        let index = self.sent;
        self.sent += 1;
        if self.drops.contains(&index) {
            trace!(index, "link dropped PDU");
            self.lost += 1;
            return;
        }
        self.inflight.push_back((key, pdu.to_bytes().freeze()));
    }

    /// Take the next PDU off the wire
    pub fn pop(&mut self) -> Result<Option<(ConnectionKey, AmPdu)>, PduError> {
        match self.inflight.pop_front() {
            Some((key, bytes)) => Ok(Some((key, AmPdu::from_bytes(&bytes)?))),
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}
