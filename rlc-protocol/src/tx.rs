//! Transmission buffer: fragmentation, ARQ and window advancement
//!
//! One `TxBuffer` serves one direction of one connection. SDUs are queued,
//! fragmented into sequence-numbered data PDUs and emitted greedily until the
//! transmission window is full. Each in-flight fragment carries its own
//! retransmission timer; a fragment that exhausts its retry budget drags every
//! sibling fragment of the same SDU down with it. Once a prefix of the window
//! is resolved (acknowledged or discarded) the buffer issues a Move Receiving
//! Window command and advances on the matching acknowledgment.
//!
//! The buffer is sans-IO: callers pass `now` into every operation and drain
//! outbound PDUs through [`TxBuffer::poll_transmit`].

use crate::config::AmConfig;
use crate::pdu::{AmPdu, ControlPdu, DataPdu};
use crate::sequence::SeqNumber;
use crate::timer::{TimerTable, TxTimerKey};
use crate::window::{FragDesc, MrwDesc, SlotArena, WindowDesc, WindowError};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Fatal transmission-side protocol violations
///
/// Stale acknowledgments and already-resolved signals are absorbed silently;
/// anything here means the peer or the engine broke a window invariant and the
/// connection state is no longer trustworthy.
#[derive(Error, Debug)]
pub enum TxError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("Acknowledgment for {seq} beyond the in-flight window starting at {first}")]
    AckBeyondWindow { seq: SeqNumber, first: SeqNumber },

    #[error("Retransmission timer fired for {0} outside the window")]
    TimerOutsideWindow(SeqNumber),

    #[error("Retransmission timer fired for acknowledged fragment {0}")]
    TimerOnAcknowledged(SeqNumber),

    #[error("MRW retransmission timer fired for unknown command {0}")]
    MrwTimerWithoutCommand(u32),

    #[error("Window shift of {pos} exceeds the {in_flight} in-flight slots")]
    ShiftBeyondInFlight { pos: usize, in_flight: usize },
}

/// Transmission-side counters
#[derive(Debug, Default, Clone, Copy)]
pub struct TxStats {
    pub sdus_enqueued: u64,
    pub fragments_sent: u64,
    pub retransmissions: u64,
    pub fragments_discarded: u64,
    pub mrw_commands_sent: u64,
}

/// The SDU currently being fragmented
struct ActiveSdu {
    sdu_seq: u32,
    data: Bytes,
    frag: FragDesc,
}

/// Per-connection transmission buffer
pub struct TxBuffer {
    config: AmConfig,
    window: WindowDesc,
    arena: SlotArena,
    sdu_queue: VecDeque<Bytes>,
    active: Option<ActiveSdu>,
    next_sdu_seq: u32,
    mrw: MrwDesc,
    /// Stored copies of outstanding MRW commands, keyed by MRW sequence
    pending_mrw: BTreeMap<u32, ControlPdu>,
    timers: TimerTable<TxTimerKey>,
    outbound: VecDeque<AmPdu>,
    stats: TxStats,
}

impl TxBuffer {
    pub fn new(config: AmConfig) -> Self {
        let capacity = config.tx_window_size;
        TxBuffer {
            config,
            window: WindowDesc::new(capacity),
            arena: SlotArena::new(capacity),
            sdu_queue: VecDeque::new(),
            active: None,
            next_sdu_seq: 0,
            mrw: MrwDesc::default(),
            pending_mrw: BTreeMap::new(),
            timers: TimerTable::new(),
            outbound: VecDeque::new(),
            stats: TxStats::default(),
        }
    }

    /// Accept one SDU for reliable delivery and fill the window
    pub fn enqueue(&mut self, sdu: Bytes, now: Instant) -> Result<(), TxError> {
        self.stats.sdus_enqueued += 1;
        self.sdu_queue.push_back(sdu);
        self.fill_window(now)
    }

    /// Emit fragments greedily until the window is full or the backlog drains
    fn fill_window(&mut self, now: Instant) -> Result<(), TxError> {
        loop {
            if self.window.is_full() {
                break;
            }
            if self.active.is_none() {
                let Some(data) = self.sdu_queue.pop_front() else {
                    break;
                };
                let sdu_seq = self.next_sdu_seq;
                self.next_sdu_seq += 1;
                let frag =
                    FragDesc::start(self.config.fragment_unit, data.len(), self.window.next);
                self.active = Some(ActiveSdu {
                    sdu_seq,
                    data,
                    frag,
                });
            }
            let Some(active) = self.active.as_mut() else {
                break;
            };

            let seq = self.window.next;
            let range = active.frag.next_payload_range(active.data.len());
            let pdu = DataPdu::new(
                seq,
                active.frag.first_sn,
                active.frag.last_sn(),
                active.sdu_seq,
                active.data.slice(range),
            );
            let sdu_complete = active.frag.emit();

            let index = self.window.len();
            self.arena.occupy(index, pdu.clone())?;
            self.timers
                .arm(TxTimerKey::PduRtx(seq), now + self.config.pdu_rtx_timeout());
            trace!(%seq, first_sn = %pdu.first_sn, last_sn = %pdu.last_sn, "sending fragment");
            self.outbound.push_back(pdu.into());
            self.stats.fragments_sent += 1;
            self.window.next.increment();
            if sdu_complete {
                self.active = None;
            }
        }

        let backlog = self.active.is_some() || !self.sdu_queue.is_empty();
        if backlog && !self.timers.is_armed(TxTimerKey::BufferStatus) {
            self.timers.arm(
                TxTimerKey::BufferStatus,
                now + self.config.buffer_status_timeout(),
            );
        }
        Ok(())
    }

    /// Process an inbound control PDU addressed to this buffer
    pub fn handle_control(&mut self, pdu: ControlPdu, now: Instant) -> Result<(), TxError> {
        match pdu {
            ControlPdu::Ack {
                cumulative,
                first_sn,
                bitmap,
            } => {
                if let Some(seq) = cumulative {
                    self.receive_cumulative_ack(seq)?;
                }
                for (i, acked) in bitmap.iter().enumerate() {
                    if *acked {
                        self.receive_selective_ack(first_sn + i as u32)?;
                    }
                }
                self.check_for_window_shift(now)
            }
            ControlPdu::MoveWindowAck {
                mrw_seq,
                new_first_sn,
            } => self.receive_mrw_ack(mrw_seq, new_first_sn, now),
            ControlPdu::MoveWindow { .. } => {
                trace!("MoveWindow not addressed to the transmitting side, ignored");
                Ok(())
            }
        }
    }

    /// Acknowledge every fragment up to and including `seq`
    fn receive_cumulative_ack(&mut self, seq: SeqNumber) -> Result<(), TxError> {
        let index = match seq.index_after(self.window.first) {
            Some(index) => index,
            None => {
                trace!(%seq, first = %self.window.first, "stale cumulative ack ignored");
                return Ok(());
            }
        };
        if index >= self.window.len() {
            return Err(TxError::AckBeyondWindow {
                seq,
                first: self.window.first,
            });
        }
        for i in 0..=index {
            if !self.arena.is_resolved(i)? {
                self.arena.mark_received(i)?;
                self.timers.cancel(TxTimerKey::PduRtx(self.window.first + i as u32));
            }
        }
        Ok(())
    }

    /// Acknowledge one individual fragment
    fn receive_selective_ack(&mut self, seq: SeqNumber) -> Result<(), TxError> {
        let index = match seq.index_after(self.window.first) {
            Some(index) => index,
            None => {
                trace!(%seq, "stale selective ack ignored");
                return Ok(());
            }
        };
        if index >= self.window.len() {
            return Err(TxError::AckBeyondWindow {
                seq,
                first: self.window.first,
            });
        }
        if !self.arena.is_resolved(index)? {
            self.arena.mark_received(index)?;
            self.timers.cancel(TxTimerKey::PduRtx(seq));
        }
        Ok(())
    }

    /// Issue an MRW when a prefix of the window is resolved
    fn check_for_window_shift(&mut self, now: Instant) -> Result<(), TxError> {
        let mut prefix = 0;
        while prefix < self.window.len() && self.arena.is_resolved(prefix)? {
            prefix += 1;
        }
        if prefix > 0 {
            self.send_mrw(self.window.first + prefix as u32, now);
        }
        Ok(())
    }

    fn send_mrw(&mut self, new_first_sn: SeqNumber, now: Instant) {
        let mrw_seq = self.mrw.allocate();
        let pdu = ControlPdu::MoveWindow {
            mrw_seq,
            new_first_sn,
        };
        debug!(mrw_seq, %new_first_sn, "issuing MRW");
        self.pending_mrw.insert(mrw_seq, pdu.clone());
        self.timers
            .arm(TxTimerKey::MrwRtx(mrw_seq), now + self.config.ctrl_rtx_timeout());
        self.outbound.push_back(pdu.into());
        self.stats.mrw_commands_sent += 1;
    }

    /// Process an MRW acknowledgment.
    ///
    /// Unknown or already-acknowledged MRW sequences are ignored. An ack for a
    /// superseded MRW retires the stored retransmission copy but never moves
    /// the window; only the most recently issued MRW may shift it.
    fn receive_mrw_ack(
        &mut self,
        mrw_seq: u32,
        new_first_sn: SeqNumber,
        now: Instant,
    ) -> Result<(), TxError> {
        if self.pending_mrw.remove(&mrw_seq).is_none() {
            trace!(mrw_seq, "MRW ack for unknown command ignored");
            return Ok(());
        }
        self.timers.cancel(TxTimerKey::MrwRtx(mrw_seq));
        if self.mrw.is_superseded(mrw_seq) {
            debug!(mrw_seq, "MRW ack for superseded command, window not moved");
            return Ok(());
        }
        let pos = new_first_sn - self.window.first;
        if pos <= 0 {
            return Ok(());
        }
        self.move_tx_window(pos as usize, now)
    }

    /// Free the resolved prefix, renumber the remaining slots and refill
    fn move_tx_window(&mut self, pos: usize, now: Instant) -> Result<(), TxError> {
        if pos == 0 {
            return Ok(());
        }
        if pos > self.window.len() {
            return Err(TxError::ShiftBeyondInFlight {
                pos,
                in_flight: self.window.len(),
            });
        }
        for i in 0..pos {
            if self.arena.get(i)?.is_none() {
                return Err(WindowError::SlotEmpty(i).into());
            }
        }
        self.arena.shift(pos)?;
        self.window.advance(pos);
        debug!(pos, first = %self.window.first, "transmission window advanced");
        self.fill_window(now)
    }

    /// Discard a fragment and every buffered sibling fragment of its SDU
    fn discard_cascade(&mut self, seq: SeqNumber, now: Instant) -> Result<(), TxError> {
        let index = seq
            .index_after(self.window.first)
            .ok_or(TxError::TimerOutsideWindow(seq))?;
        let sdu_seq = self
            .arena
            .get(index)?
            .ok_or(WindowError::SlotEmpty(index))?
            .sdu_seq;
        warn!(%seq, sdu_seq, "discarding SDU after retry budget exhaustion");
        self.discard_slot(index)?;

        // later fragments of the same SDU; an empty slot ends the in-flight run
        let in_flight = self.window.len();
        let mut j = index + 1;
        while j < in_flight {
            match self.arena.get(j)? {
                Some(pdu) if pdu.sdu_seq == sdu_seq => {
                    self.discard_slot(j)?;
                    j += 1;
                }
                _ => break,
            }
        }

        // earlier fragments; a hole below an in-flight fragment is corruption
        let mut j = index;
        while j > 0 {
            j -= 1;
            let pdu = self.arena.get(j)?.ok_or(WindowError::SlotEmpty(j))?;
            if pdu.sdu_seq != sdu_seq {
                break;
            }
            self.discard_slot(j)?;
        }

        self.check_for_window_shift(now)
    }

    fn discard_slot(&mut self, index: usize) -> Result<(), TxError> {
        self.arena.mark_discarded(index)?;
        self.timers
            .cancel(TxTimerKey::PduRtx(self.window.first + index as u32));
        self.stats.fragments_discarded += 1;
        Ok(())
    }

    fn pdu_timer_expired(&mut self, seq: SeqNumber, now: Instant) -> Result<(), TxError> {
        let index = seq
            .index_after(self.window.first)
            .ok_or(TxError::TimerOutsideWindow(seq))?;
        if index >= self.window.len() {
            return Err(TxError::TimerOutsideWindow(seq));
        }
        if self.arena.is_received(index)? {
            return Err(TxError::TimerOnAcknowledged(seq));
        }
        // the slot may have been discarded by a cascade inside this same
        // timeout batch; its timer was logically cancelled
        if self.arena.is_discarded(index)? {
            return Ok(());
        }
        let retx_count = self
            .arena
            .get(index)?
            .ok_or(WindowError::SlotEmpty(index))?
            .retx_count;
        let next = retx_count + 1;
        if next > self.config.max_retx {
            self.discard_cascade(seq, now)
        } else {
            let pdu = self
                .arena
                .get_mut(index)?
                .ok_or(WindowError::SlotEmpty(index))?;
            pdu.retx_count = next;
            let copy = pdu.clone();
            debug!(%seq, retx = next, "retransmitting fragment");
            self.timers
                .arm(TxTimerKey::PduRtx(seq), now + self.config.pdu_rtx_timeout());
            self.outbound.push_back(copy.into());
            self.stats.retransmissions += 1;
            Ok(())
        }
    }

    fn mrw_timer_expired(&mut self, mrw_seq: u32, now: Instant) -> Result<(), TxError> {
        if self.mrw.is_superseded(mrw_seq) {
            trace!(mrw_seq, "superseded MRW retired without retransmission");
            self.pending_mrw.remove(&mrw_seq);
            return Ok(());
        }
        let pdu = self
            .pending_mrw
            .get(&mrw_seq)
            .ok_or(TxError::MrwTimerWithoutCommand(mrw_seq))?
            .clone();
        debug!(mrw_seq, "retransmitting MRW");
        self.timers
            .arm(TxTimerKey::MrwRtx(mrw_seq), now + self.config.ctrl_rtx_timeout());
        self.outbound.push_back(pdu.into());
        self.stats.mrw_commands_sent += 1;
        Ok(())
    }

    /// Fire every expired timer
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), TxError> {
        for key in self.timers.expire(now) {
            match key {
                TxTimerKey::PduRtx(seq) => self.pdu_timer_expired(seq, now)?,
                TxTimerKey::MrwRtx(mrw_seq) => self.mrw_timer_expired(mrw_seq, now)?,
                TxTimerKey::BufferStatus => {
                    self.check_for_window_shift(now)?;
                    self.fill_window(now)?;
                }
            }
        }
        Ok(())
    }

    /// Earliest pending deadline
    pub fn next_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drain the next outbound PDU
    pub fn poll_transmit(&mut self) -> Option<AmPdu> {
        self.outbound.pop_front()
    }

    /// First in-flight sequence number
    pub fn first_seq(&self) -> SeqNumber {
        self.window.first
    }

    /// Number of in-flight fragments
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// True when nothing is queued, in fragmentation or awaiting transmission
    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.sdu_queue.is_empty() && self.active.is_none()
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }
}
