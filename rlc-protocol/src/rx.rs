//! Reception buffer: reassembly, status reporting and window movement
//!
//! One `RxBuffer` serves one direction of one connection. Data fragments are
//! slotted into the reception window; once every fragment of an SDU is
//! present the payloads are concatenated and handed up, while the fragments
//! stay buffered until the peer's Move Receiving Window command frees them.
//! Acknowledgments combine a cumulative part with a selective bitmap and are
//! rate-limited by the ack prohibit interval.
//!
//! When a window shift frees the received prefix of an SDU whose later
//! fragments are still inside the window, the prefix payload is retained so
//! the SDU can still complete. A hole among the freed slots cancels that
//! retained prefix, since the SDU can never be reconstructed.

use crate::config::AmConfig;
use crate::pdu::{AmPdu, ControlPdu, DataPdu};
use crate::sequence::SeqNumber;
use crate::timer::{RxTimerKey, TimerTable};
use crate::window::{SlotArena, WindowError};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace};

/// Fatal reception-side protocol violations
///
/// Below-window fragments and duplicates of buffered fragments are absorbed
/// silently; these errors mean the fragment streams of two SDUs interleave in
/// ways the window renumbering rules forbid.
#[derive(Error, Debug)]
pub enum RxError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("Data PDU {seq} beyond the reception window starting at {first}")]
    PduBeyondWindow { seq: SeqNumber, first: SeqNumber },

    #[error("Duplicate at {seq} overlaps a different SDU (buffered {buffered}, arrived {arrived})")]
    DuplicateOverlap {
        seq: SeqNumber,
        buffered: u32,
        arrived: u32,
    },

    #[error("Fragments of SDUs {expected} and {found} interleave at slot {index}")]
    InterleavedSdus {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("Misplaced SDU boundary fragment at slot {index}")]
    MisplacedBoundary { index: usize },

    #[error("Fragment run for SDU {sdu_seq} lost its prefix below the window")]
    MissingSduPrefix { sdu_seq: u32 },

    #[error("Window shift of {pos} exceeds the window size {capacity}")]
    ShiftBeyondWindow { pos: usize, capacity: usize },
}

/// Reception-side counters
#[derive(Debug, Default, Clone, Copy)]
pub struct RxStats {
    pub data_pdus_received: u64,
    pub duplicate_pdus: u64,
    pub sdus_delivered: u64,
    pub bytes_delivered: u64,
    pub status_reports_sent: u64,
    pub mrw_acks_sent: u64,
}

/// Retained prefix payload of an SDU straddling the window's lower edge
struct OpenSdu {
    sdu_seq: u32,
    payload: BytesMut,
}

/// Per-connection reception buffer
pub struct RxBuffer {
    config: AmConfig,
    /// First sequence number inside the window
    first: SeqNumber,
    /// Next expected in-order sequence number
    next_expected: SeqNumber,
    arena: SlotArena,
    open_sdu: Option<OpenSdu>,
    timers: TimerTable<RxTimerKey>,
    outbound: VecDeque<AmPdu>,
    delivered: VecDeque<Bytes>,
    last_sent_ack: Option<Instant>,
    stats: RxStats,
}

impl RxBuffer {
    pub fn new(config: AmConfig) -> Self {
        let capacity = config.rx_window_size;
        RxBuffer {
            config,
            first: SeqNumber::ZERO,
            next_expected: SeqNumber::ZERO,
            arena: SlotArena::new(capacity),
            open_sdu: None,
            timers: TimerTable::new(),
            outbound: VecDeque::new(),
            delivered: VecDeque::new(),
            last_sent_ack: None,
            stats: RxStats::default(),
        }
    }

    /// Process one inbound data fragment
    pub fn handle_data(&mut self, pdu: DataPdu, now: Instant) -> Result<(), RxError> {
        self.stats.data_pdus_received += 1;
        if !self.timers.is_armed(RxTimerKey::StatusReport) {
            self.timers.arm(
                RxTimerKey::StatusReport,
                now + self.config.status_report_interval(),
            );
        }

        let seq = pdu.seq;
        let index = match seq.index_after(self.first) {
            Some(index) => index,
            None => {
                trace!(%seq, first = %self.first, "fragment below the window, dropped");
                return Ok(());
            }
        };
        if index >= self.arena.capacity() {
            return Err(RxError::PduBeyondWindow {
                seq,
                first: self.first,
            });
        }

        if seq == self.next_expected {
            self.next_expected.increment();
        } else {
            // a duplicate of an old fragment must not rewind the tracking
            self.next_expected = self.next_expected.max(seq.next());
            trace!(%seq, "fragment out of sequence, reporting status");
            self.send_status_report(now)?;
        }

        if let Some(buffered) = self.arena.get(index)? {
            if buffered.sdu_seq == pdu.sdu_seq {
                trace!(%seq, "duplicate fragment dropped");
                self.stats.duplicate_pdus += 1;
                return Ok(());
            }
            return Err(RxError::DuplicateOverlap {
                seq,
                buffered: buffered.sdu_seq,
                arrived: pdu.sdu_seq,
            });
        }

        self.arena.occupy(index, pdu)?;
        self.arena.mark_received(index)?;
        self.check_complete_sdu(index, now)
    }

    /// Deliver the SDU at `index` if every one of its fragments is buffered
    fn check_complete_sdu(&mut self, index: usize, now: Instant) -> Result<(), RxError> {
        let (sdu_seq, is_whole, is_first, is_last) = match self.arena.get(index)? {
            Some(pdu) => (pdu.sdu_seq, pdu.is_whole(), pdu.is_first(), pdu.is_last()),
            None => return Ok(()),
        };
        if is_whole {
            return self.pass_up(index, index, false, now);
        }

        // backward search for the SDU's first fragment
        let mut start = index;
        let mut use_stash = false;
        if !is_first {
            loop {
                if start == 0 {
                    // the run continues below the window edge; only the
                    // retained prefix can complete it
                    match &self.open_sdu {
                        Some(open) if open.sdu_seq == sdu_seq => {
                            use_stash = true;
                            break;
                        }
                        _ => return Err(RxError::MissingSduPrefix { sdu_seq }),
                    }
                }
                start -= 1;
                let Some(prev) = self.arena.get(start)? else {
                    return Ok(());
                };
                if prev.sdu_seq != sdu_seq {
                    return Err(RxError::InterleavedSdus {
                        index: start,
                        expected: sdu_seq,
                        found: prev.sdu_seq,
                    });
                }
                if prev.is_first() {
                    break;
                }
                if prev.is_last() || prev.is_whole() {
                    return Err(RxError::MisplacedBoundary { index: start });
                }
            }
        }

        // forward search for the SDU's last fragment
        let mut end = index;
        if !is_last {
            loop {
                end += 1;
                if end >= self.arena.capacity() {
                    return Ok(());
                }
                let Some(next) = self.arena.get(end)? else {
                    return Ok(());
                };
                if next.sdu_seq != sdu_seq {
                    return Err(RxError::InterleavedSdus {
                        index: end,
                        expected: sdu_seq,
                        found: next.sdu_seq,
                    });
                }
                if next.is_last() {
                    break;
                }
                if next.is_first() || next.is_whole() {
                    return Err(RxError::MisplacedBoundary { index: end });
                }
            }
        }

        self.pass_up(start, end, use_stash, now)
    }

    /// Concatenate the fragment payloads and hand the SDU up.
    ///
    /// The fragments stay buffered until an MRW frees their slots.
    fn pass_up(
        &mut self,
        start: usize,
        end: usize,
        use_stash: bool,
        now: Instant,
    ) -> Result<(), RxError> {
        let mut sdu = BytesMut::new();
        if use_stash {
            if let Some(open) = self.open_sdu.take() {
                sdu.extend_from_slice(&open.payload);
            }
        }
        for i in start..=end {
            let pdu = self.arena.get(i)?.ok_or(WindowError::SlotEmpty(i))?;
            sdu.extend_from_slice(&pdu.payload);
        }
        let sdu = sdu.freeze();
        debug!(len = sdu.len(), "SDU reassembled");
        self.stats.sdus_delivered += 1;
        self.stats.bytes_delivered += sdu.len() as u64;
        self.delivered.push_back(sdu);
        self.send_status_report(now)
    }

    /// Emit a cumulative + selective status report, subject to the prohibit
    /// interval. Nothing is sent while the window holds no fragments.
    fn send_status_report(&mut self, now: Instant) -> Result<(), RxError> {
        if let Some(last) = self.last_sent_ack {
            if now.duration_since(last) < self.config.ack_report_interval() {
                trace!("status report suppressed inside the ack prohibit interval");
                return Ok(());
            }
        }

        let capacity = self.arena.capacity();
        let mut cumulative = 0;
        while cumulative < capacity && self.arena.is_received(cumulative)? {
            cumulative += 1;
        }
        let mut highest = None;
        for i in cumulative..capacity {
            if self.arena.is_received(i)? {
                highest = Some(i);
            }
        }
        let mut bitmap = Vec::new();
        if let Some(highest) = highest {
            for i in cumulative..=highest {
                bitmap.push(self.arena.is_received(i)?);
            }
        }
        if cumulative == 0 && bitmap.is_empty() {
            return Ok(());
        }

        let ack = ControlPdu::Ack {
            cumulative: if cumulative > 0 {
                Some(self.first + (cumulative as u32 - 1))
            } else {
                None
            },
            first_sn: self.first + cumulative as u32,
            bitmap,
        };
        trace!(cumulative, "sending status report");
        self.outbound.push_back(ack.into());
        self.stats.status_reports_sent += 1;
        self.last_sent_ack = Some(now);
        Ok(())
    }

    /// Process a Move Receiving Window command.
    ///
    /// The command is acknowledged even when it is stale, so the peer stops
    /// retransmitting it. The acknowledgment always carries the post-move
    /// window start.
    pub fn handle_mrw(
        &mut self,
        mrw_seq: u32,
        new_first_sn: SeqNumber,
        _now: Instant,
    ) -> Result<(), RxError> {
        debug!(mrw_seq, %new_first_sn, "MRW command received");
        let pos = new_first_sn - self.first;
        if pos > 0 {
            let pos = pos as usize;
            if pos > self.arena.capacity() {
                return Err(RxError::ShiftBeyondWindow {
                    pos,
                    capacity: self.arena.capacity(),
                });
            }
            self.move_rx_window(pos)?;
        }
        self.outbound.push_back(
            ControlPdu::MoveWindowAck {
                mrw_seq,
                new_first_sn: self.first,
            }
            .into(),
        );
        self.stats.mrw_acks_sent += 1;
        Ok(())
    }

    /// Free the first `pos` slots and track any SDU straddling the new edge
    fn move_rx_window(&mut self, pos: usize) -> Result<(), RxError> {
        let freed = self.arena.shift(pos)?;
        for slot in freed {
            match slot {
                // a hole means the straddling SDU can never complete
                None => self.open_sdu = None,
                Some(pdu) => {
                    if pdu.is_last() || pdu.is_whole() {
                        self.open_sdu = None;
                    } else if pdu.is_first() {
                        self.open_sdu = Some(OpenSdu {
                            sdu_seq: pdu.sdu_seq,
                            payload: BytesMut::from(&pdu.payload[..]),
                        });
                    } else {
                        match self.open_sdu.as_mut() {
                            Some(open) if open.sdu_seq == pdu.sdu_seq => {
                                open.payload.extend_from_slice(&pdu.payload);
                            }
                            _ => self.open_sdu = None,
                        }
                    }
                }
            }
        }
        self.first += pos as u32;
        if self.next_expected - self.first < 0 {
            self.next_expected = self.first;
        }
        debug!(first = %self.first, "reception window advanced");
        Ok(())
    }

    fn has_buffered(&self) -> Result<bool, RxError> {
        for i in 0..self.arena.capacity() {
            if self.arena.get(i)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fire every expired timer
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), RxError> {
        for key in self.timers.expire(now) {
            match key {
                RxTimerKey::StatusReport => {
                    self.send_status_report(now)?;
                    if self.has_buffered()? {
                        self.timers.arm(
                            RxTimerKey::StatusReport,
                            now + self.config.status_report_interval(),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Earliest pending deadline
    pub fn next_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drain the next outbound control PDU
    pub fn poll_transmit(&mut self) -> Option<AmPdu> {
        self.outbound.pop_front()
    }

    /// Drain the next reassembled SDU
    pub fn poll_delivered(&mut self) -> Option<Bytes> {
        self.delivered.pop_front()
    }

    /// First sequence number inside the window
    pub fn first_seq(&self) -> SeqNumber {
        self.first
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }
}
