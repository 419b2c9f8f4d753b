//! AM entity manager: per-connection buffer registry and PDU routing
//!
//! An [`AmEntity`] owns one transmission and one reception buffer per
//! connection, keyed by peer node and logical channel. Buffers are created on
//! first use, both for locally submitted SDUs and for PDUs arriving from a
//! peer. The entity is the error boundary: silently-absorbed network
//! anomalies never surface here, fatal protocol violations do.

use crate::config::AmConfig;
use crate::pdu::{AmPdu, ControlPdu};
use crate::rx::{RxBuffer, RxError, RxStats};
use crate::sequence::SeqNumber;
use crate::tx::{TxBuffer, TxError, TxStats};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Identifies one logical connection to one peer node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    /// Peer node identifier, nonzero
    pub node: u16,
    /// Logical channel identifier within the node
    pub lcid: u16,
}

impl ConnectionKey {
    pub fn new(node: u16, lcid: u16) -> Self {
        ConnectionKey { node, lcid }
    }
}

/// Entity-level errors
#[derive(Error, Debug)]
pub enum AmError {
    #[error("Invalid connection key: node identifier must be nonzero")]
    InvalidConnection,

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Rx(#[from] RxError),
}

/// Read-only counters for one connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub tx: TxStats,
    pub rx: RxStats,
}

struct Connection {
    tx: TxBuffer,
    rx: RxBuffer,
}

/// Registry of per-connection buffer pairs
pub struct AmEntity {
    config: AmConfig,
    connections: BTreeMap<ConnectionKey, Connection>,
}

impl AmEntity {
    pub fn new(config: AmConfig) -> Self {
        AmEntity {
            config,
            connections: BTreeMap::new(),
        }
    }

    fn connection(&mut self, key: ConnectionKey) -> Result<&mut Connection, AmError> {
        if key.node == 0 {
            return Err(AmError::InvalidConnection);
        }
        Ok(self.connections.entry(key).or_insert_with(|| {
            debug!(node = key.node, lcid = key.lcid, "creating connection buffers");
            Connection {
                tx: TxBuffer::new(self.config.clone()),
                rx: RxBuffer::new(self.config.clone()),
            }
        }))
    }

    /// Submit one SDU for reliable delivery on `key`
    pub fn submit_sdu(
        &mut self,
        key: ConnectionKey,
        sdu: Bytes,
        now: Instant,
    ) -> Result<(), AmError> {
        self.connection(key)?.tx.enqueue(sdu, now)?;
        Ok(())
    }

    /// Route one inbound PDU to the owning buffer.
    ///
    /// Data fragments and MRW commands go to the reception buffer and create
    /// the connection on first arrival. Acknowledgments go to the
    /// transmission buffer; an acknowledgment whose connection does not exist
    /// can only be racing a teardown, since nothing was ever transmitted on
    /// it, and is dropped.
    pub fn deliver(
        &mut self,
        key: ConnectionKey,
        pdu: AmPdu,
        now: Instant,
    ) -> Result<(), AmError> {
        match pdu {
            AmPdu::Data(data) => self.connection(key)?.rx.handle_data(data, now)?,
            AmPdu::Control(ControlPdu::MoveWindow {
                mrw_seq,
                new_first_sn,
            }) => self.connection(key)?.rx.handle_mrw(mrw_seq, new_first_sn, now)?,
            AmPdu::Control(ack) => {
                if key.node == 0 {
                    return Err(AmError::InvalidConnection);
                }
                match self.connections.get_mut(&key) {
                    Some(conn) => conn.tx.handle_control(ack, now)?,
                    None => {
                        trace!(
                            node = key.node,
                            lcid = key.lcid,
                            "acknowledgment for unknown connection dropped"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Tear down one connection; repeated teardown is a no-op
    pub fn teardown(&mut self, key: ConnectionKey) -> bool {
        let removed = self.connections.remove(&key).is_some();
        if removed {
            info!(node = key.node, lcid = key.lcid, "connection torn down");
        }
        removed
    }

    /// Tear down every connection belonging to one peer node
    pub fn teardown_node(&mut self, node: u16) -> usize {
        let before = self.connections.len();
        self.connections.retain(|key, _| key.node != node);
        let removed = before - self.connections.len();
        if removed > 0 {
            info!(node, removed, "peer connections torn down");
        }
        removed
    }

    /// Drain the next outbound PDU from any connection
    pub fn poll_transmit(&mut self) -> Option<(ConnectionKey, AmPdu)> {
        for (key, conn) in self.connections.iter_mut() {
            if let Some(pdu) = conn.tx.poll_transmit() {
                return Some((*key, pdu));
            }
            if let Some(pdu) = conn.rx.poll_transmit() {
                return Some((*key, pdu));
            }
        }
        None
    }

    /// Drain the next reassembled SDU from any connection
    pub fn poll_delivered(&mut self) -> Option<(ConnectionKey, Bytes)> {
        for (key, conn) in self.connections.iter_mut() {
            if let Some(sdu) = conn.rx.poll_delivered() {
                return Some((*key, sdu));
            }
        }
        None
    }

    /// Earliest pending deadline across every connection
    pub fn next_timeout(&self) -> Option<Instant> {
        self.connections
            .values()
            .flat_map(|conn| [conn.tx.next_timeout(), conn.rx.next_timeout()])
            .flatten()
            .min()
    }

    /// Fire every expired timer across every connection
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), AmError> {
        for conn in self.connections.values_mut() {
            conn.tx.handle_timeout(now)?;
            conn.rx.handle_timeout(now)?;
        }
        Ok(())
    }

    /// First sequence number of the connection's transmission window
    pub fn tx_window_first(&self, key: ConnectionKey) -> Option<SeqNumber> {
        self.connections.get(&key).map(|conn| conn.tx.first_seq())
    }

    /// First sequence number of the connection's reception window
    pub fn rx_window_first(&self, key: ConnectionKey) -> Option<SeqNumber> {
        self.connections.get(&key).map(|conn| conn.rx.first_seq())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self, key: ConnectionKey) -> Option<ConnectionStats> {
        self.connections.get(&key).map(|conn| ConnectionStats {
            tx: *conn.tx.stats(),
            rx: *conn.rx.stats(),
        })
    }
}
