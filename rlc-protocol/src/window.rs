//! Sliding-window, fragmentation and MRW descriptors
//!
//! Both buffer sides index their in-flight fragments by window position
//! (`seq - first_sequence_number`). `SlotArena` owns that storage together
//! with the per-slot received/discarded flags, so out-of-range access is
//! caught in one place.

use crate::pdu::DataPdu;
use crate::sequence::SeqNumber;
use thiserror::Error;

/// Window accounting errors
///
/// These indicate implementation bugs, not network conditions; they surface as
/// fatal protocol violations at the entity boundary.
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Slot {0} out of window (capacity {1})")]
    OutOfRange(usize, usize),

    #[error("Slot {0} already occupied")]
    SlotBusy(usize),

    #[error("Slot {0} referenced but empty")]
    SlotEmpty(usize),
}

/// Sliding transmission/reception window bounds
///
/// Invariant: `0 <= next - first <= capacity`.
#[derive(Debug, Clone, Copy)]
pub struct WindowDesc {
    /// Oldest unresolved sequence number
    pub first: SeqNumber,
    /// Next sequence number to be assigned / expected
    pub next: SeqNumber,
    /// Fixed window capacity
    pub capacity: usize,
}

impl WindowDesc {
    pub fn new(capacity: usize) -> Self {
        WindowDesc {
            first: SeqNumber::ZERO,
            next: SeqNumber::ZERO,
            capacity,
        }
    }

    /// Number of sequence numbers currently inside the window
    #[inline]
    pub fn len(&self) -> usize {
        (self.next - self.first) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first == self.next
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Advance `first` by `pos` slots
    pub fn advance(&mut self, pos: usize) {
        self.first += pos as u32;
    }
}

/// Fragment storage plus per-slot status flags
///
/// A slot is `received` once acknowledged (tx side) or buffered (rx side),
/// `discarded` once given up on. `received` takes precedence: a received slot
/// is never marked discarded.
pub struct SlotArena {
    slots: Vec<Option<DataPdu>>,
    received: Vec<bool>,
    discarded: Vec<bool>,
}

impl SlotArena {
    pub fn new(capacity: usize) -> Self {
        SlotArena {
            slots: (0..capacity).map(|_| None).collect(),
            received: vec![false; capacity],
            discarded: vec![false; capacity],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, index: usize) -> Result<(), WindowError> {
        if index < self.slots.len() {
            Ok(())
        } else {
            Err(WindowError::OutOfRange(index, self.slots.len()))
        }
    }

    pub fn get(&self, index: usize) -> Result<Option<&DataPdu>, WindowError> {
        self.check(index)?;
        Ok(self.slots[index].as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Result<Option<&mut DataPdu>, WindowError> {
        self.check(index)?;
        Ok(self.slots[index].as_mut())
    }

    /// Store a fragment at an empty, unflagged slot
    pub fn occupy(&mut self, index: usize, pdu: DataPdu) -> Result<(), WindowError> {
        self.check(index)?;
        if self.slots[index].is_some() || self.received[index] || self.discarded[index] {
            return Err(WindowError::SlotBusy(index));
        }
        self.slots[index] = Some(pdu);
        Ok(())
    }

    pub fn is_received(&self, index: usize) -> Result<bool, WindowError> {
        self.check(index)?;
        Ok(self.received[index])
    }

    pub fn is_discarded(&self, index: usize) -> Result<bool, WindowError> {
        self.check(index)?;
        Ok(self.discarded[index])
    }

    /// A slot counts as resolved once received or discarded
    pub fn is_resolved(&self, index: usize) -> Result<bool, WindowError> {
        self.check(index)?;
        Ok(self.received[index] || self.discarded[index])
    }

    pub fn mark_received(&mut self, index: usize) -> Result<(), WindowError> {
        self.check(index)?;
        self.received[index] = true;
        Ok(())
    }

    /// Mark a slot discarded; received slots keep their received status.
    pub fn mark_discarded(&mut self, index: usize) -> Result<(), WindowError> {
        self.check(index)?;
        if !self.received[index] {
            self.discarded[index] = true;
        }
        Ok(())
    }

    /// Remove the first `pos` slots, compact the remainder down to index 0
    /// and clear the vacated tail. Returns the removed prefix in order.
    pub fn shift(&mut self, pos: usize) -> Result<Vec<Option<DataPdu>>, WindowError> {
        if pos > self.slots.len() {
            return Err(WindowError::OutOfRange(pos, self.slots.len()));
        }
        let mut freed = Vec::with_capacity(pos);
        for i in 0..pos {
            freed.push(self.slots[i].take());
        }
        let capacity = self.slots.len();
        for i in pos..capacity {
            self.slots[i - pos] = self.slots[i].take();
            self.received[i - pos] = self.received[i];
            self.discarded[i - pos] = self.discarded[i];
        }
        for i in capacity - pos..capacity {
            self.received[i] = false;
            self.discarded[i] = false;
        }
        Ok(freed)
    }
}

/// Tracks the progress of splitting one SDU into sequence-numbered fragments
#[derive(Debug, Clone, Copy)]
pub struct FragDesc {
    /// Fragment payload size in bytes
    pub frag_unit: usize,
    /// `ceil(sdu_len / frag_unit)`
    pub total_fragments: u32,
    /// Fragments already emitted for the current SDU
    pub emitted: u32,
    /// Window sequence number assigned to the SDU's first fragment
    pub first_sn: SeqNumber,
}

impl FragDesc {
    pub fn start(frag_unit: usize, sdu_len: usize, first_sn: SeqNumber) -> Self {
        debug_assert!(frag_unit > 0);
        let total_fragments = ((sdu_len + frag_unit - 1) / frag_unit).max(1) as u32;
        FragDesc {
            frag_unit,
            total_fragments,
            emitted: 0,
            first_sn,
        }
    }

    /// Sequence number of the SDU's last fragment
    pub fn last_sn(&self) -> SeqNumber {
        self.first_sn + (self.total_fragments - 1)
    }

    /// Byte range of the next fragment within the SDU
    pub fn next_payload_range(&self, sdu_len: usize) -> std::ops::Range<usize> {
        let start = self.emitted as usize * self.frag_unit;
        start..sdu_len.min(start + self.frag_unit)
    }

    /// Record one emitted fragment; true once the SDU is fully fragmented
    pub fn emit(&mut self) -> bool {
        self.emitted += 1;
        self.emitted >= self.total_fragments
    }
}

/// MRW command numbering
///
/// A retransmission attempt for an MRW is suppressed when a newer MRW has
/// been issued since.
#[derive(Debug, Clone, Copy, Default)]
pub struct MrwDesc {
    next_seq: u32,
    last_issued: Option<u32>,
}

impl MrwDesc {
    /// Allocate the next MRW sequence number and record it as last issued
    pub fn allocate(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.last_issued = Some(seq);
        seq
    }

    /// True when a newer MRW has been issued after `mrw_seq`
    pub fn is_superseded(&self, mrw_seq: u32) -> bool {
        match self.last_issued {
            Some(last) => last > mrw_seq,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn pdu(seq: u32) -> DataPdu {
        DataPdu::new(
            SeqNumber::new(seq),
            SeqNumber::new(seq),
            SeqNumber::new(seq),
            seq,
            Bytes::from_static(b"x"),
        )
    }

    #[test]
    fn test_window_bounds() {
        let mut w = WindowDesc::new(4);
        assert!(w.is_empty() && !w.is_full());
        w.next += 4;
        assert!(w.is_full());
        assert_eq!(w.len(), 4);
        w.advance(2);
        assert_eq!(w.len(), 2);
        assert_eq!(w.first, SeqNumber::new(2));
    }

    #[test]
    fn test_arena_occupy_rejects_busy_slot() {
        let mut arena = SlotArena::new(4);
        arena.occupy(1, pdu(1)).unwrap();
        assert!(matches!(
            arena.occupy(1, pdu(1)),
            Err(WindowError::SlotBusy(1))
        ));
        assert!(matches!(
            arena.occupy(4, pdu(4)),
            Err(WindowError::OutOfRange(4, 4))
        ));
    }

    #[test]
    fn test_received_takes_precedence_over_discard() {
        let mut arena = SlotArena::new(2);
        arena.occupy(0, pdu(0)).unwrap();
        arena.mark_received(0).unwrap();
        arena.mark_discarded(0).unwrap();
        assert!(arena.is_received(0).unwrap());
        assert!(!arena.is_discarded(0).unwrap());
        assert!(arena.is_resolved(0).unwrap());
    }

    #[test]
    fn test_shift_compacts_and_clears() {
        let mut arena = SlotArena::new(4);
        for i in 0..3 {
            arena.occupy(i, pdu(i as u32)).unwrap();
        }
        arena.mark_received(0).unwrap();
        arena.mark_received(2).unwrap();

        let freed = arena.shift(2).unwrap();
        assert_eq!(freed.len(), 2);
        assert!(freed[0].is_some() && freed[1].is_some());

        // old slot 2 is now slot 0, still flagged received
        assert_eq!(arena.get(0).unwrap().unwrap().seq, SeqNumber::new(2));
        assert!(arena.is_received(0).unwrap());
        assert!(arena.get(1).unwrap().is_none());
        assert!(!arena.is_received(2).unwrap());
    }

    #[test]
    fn test_frag_desc_counts() {
        let mut frag = FragDesc::start(100, 300, SeqNumber::new(5));
        assert_eq!(frag.total_fragments, 3);
        assert_eq!(frag.last_sn(), SeqNumber::new(7));
        assert_eq!(frag.next_payload_range(300), 0..100);
        assert!(!frag.emit());
        assert_eq!(frag.next_payload_range(300), 100..200);
        assert!(!frag.emit());
        assert_eq!(frag.next_payload_range(300), 200..300);
        assert!(frag.emit());
    }

    #[test]
    fn test_frag_desc_partial_tail() {
        let frag = FragDesc::start(100, 250, SeqNumber::ZERO);
        assert_eq!(frag.total_fragments, 3);
        let mut f = frag;
        f.emitted = 2;
        assert_eq!(f.next_payload_range(250), 200..250);
    }

    #[test]
    fn test_mrw_supersession() {
        let mut mrw = MrwDesc::default();
        let a = mrw.allocate();
        assert_eq!(a, 0);
        assert!(!mrw.is_superseded(a));
        let b = mrw.allocate();
        assert!(mrw.is_superseded(a));
        assert!(!mrw.is_superseded(b));
    }
}
