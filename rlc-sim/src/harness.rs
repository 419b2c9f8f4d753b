//! Two peered AM entities driven over lossy links to quiescence
//!
//! The harness alternates between shuttling PDUs across the links and
//! advancing the virtual clock to the earliest pending deadline. A run ends
//! when no PDU is in flight and no timer is armed on either side.

use crate::clock::VirtualClock;
use crate::link::Link;
use bytes::Bytes;
use rlc_protocol::{AmConfig, AmEntity, AmError, ConnectionKey, PduError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Entity(#[from] AmError),

    #[error(transparent)]
    Pdu(#[from] PduError),

    #[error("Run did not reach quiescence within {0} steps")]
    StepLimit(usize),
}

/// Two AM entities, `a` and `b`, joined by one link per direction
pub struct Harness {
    pub a: AmEntity,
    pub b: AmEntity,
    a_to_b: Link,
    b_to_a: Link,
    clock: VirtualClock,
}

impl Harness {
    pub fn new(config: AmConfig) -> Self {
        Self::with_links(config, Link::new(), Link::new())
    }

    /// Harness with scripted losses on either direction
    pub fn with_links(config: AmConfig, a_to_b: Link, b_to_a: Link) -> Self {
        Harness {
            a: AmEntity::new(config.clone()),
            b: AmEntity::new(config),
            a_to_b,
            b_to_a,
            clock: VirtualClock::new(),
        }
    }

    pub fn now(&self) -> std::time::Instant {
        self.clock.now()
    }

    /// Submit one SDU on entity `a`
    pub fn submit_a(&mut self, key: ConnectionKey, sdu: Bytes) -> Result<(), HarnessError> {
        self.a.submit_sdu(key, sdu, self.clock.now())?;
        Ok(())
    }

    /// Submit one SDU on entity `b`
    pub fn submit_b(&mut self, key: ConnectionKey, sdu: Bytes) -> Result<(), HarnessError> {
        self.b.submit_sdu(key, sdu, self.clock.now())?;
        Ok(())
    }

    /// Move every queued PDU onto and across the links once.
    ///
    /// Returns true when any PDU moved.
    fn exchange(&mut self) -> Result<bool, HarnessError> {
        let now = self.clock.now();
        let mut moved = false;
        while let Some((key, pdu)) = self.a.poll_transmit() {
            self.a_to_b.push(key, &pdu);
            moved = true;
        }
        while let Some((key, pdu)) = self.b.poll_transmit() {
            self.b_to_a.push(key, &pdu);
            moved = true;
        }
        while let Some((key, pdu)) = self.a_to_b.pop()? {
            self.b.deliver(key, pdu, now)?;
            moved = true;
        }
        while let Some((key, pdu)) = self.b_to_a.pop()? {
            self.a.deliver(key, pdu, now)?;
            moved = true;
        }
        Ok(moved)
    }

    /// One exchange round, or one clock advance to the earliest deadline.
    ///
    /// Returns false once no PDU is in flight and no timer is armed.
    pub fn step(&mut self) -> Result<bool, HarnessError> {
        if self.exchange()? {
            return Ok(true);
        }
        let deadline = match [self.a.next_timeout(), self.b.next_timeout()]
            .into_iter()
            .flatten()
            .min()
        {
            Some(deadline) => deadline,
            None => return Ok(false),
        };
        self.clock.advance_to(deadline);
        let now = self.clock.now();
        self.a.handle_timeout(now)?;
        self.b.handle_timeout(now)?;
        Ok(true)
    }

    /// Run until no PDU is in flight and no timer is armed
    pub fn run_to_quiescence(&mut self, step_limit: usize) -> Result<(), HarnessError> {
        for _ in 0..step_limit {
            if !self.step()? {
                debug!("harness quiescent");
                return Ok(());
            }
        }
        Err(HarnessError::StepLimit(step_limit))
    }

    /// Every SDU entity `b` has reassembled so far
    pub fn delivered_b(&mut self) -> Vec<(ConnectionKey, Bytes)> {
        std::iter::from_fn(|| self.b.poll_delivered()).collect()
    }

    /// Every SDU entity `a` has reassembled so far
    pub fn delivered_a(&mut self) -> Vec<(ConnectionKey, Bytes)> {
        std::iter::from_fn(|| self.a.poll_delivered()).collect()
    }

    pub fn links_lost(&self) -> (u64, u64) {
        (self.a_to_b.lost(), self.b_to_a.lost())
    }
}
