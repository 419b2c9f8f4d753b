//! Typed timer keys and the per-buffer deadline table
//!
//! The engine owns no threads and performs no sleeps. Each buffer keeps its
//! pending deadlines in a `TimerTable`; the driver asks for the earliest
//! deadline via [`TimerTable::next_deadline`] and feeds elapsed time back with
//! [`TimerTable::expire`]. Cancelling an unarmed timer is a no-op, so stale
//! cancellations after an ack-vs-timeout race are harmless.

use crate::sequence::SeqNumber;
use std::collections::BTreeMap;
use std::time::Instant;

/// Timers owned by a transmission buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxTimerKey {
    /// Retransmission deadline for one in-flight fragment
    PduRtx(SeqNumber),
    /// Retransmission deadline for one outstanding MRW command
    MrwRtx(u32),
    /// Periodic poll while the SDU queue drains
    BufferStatus,
}

/// Timers owned by a reception buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RxTimerKey {
    /// Periodic status-report deadline
    StatusReport,
}

/// Pending deadlines for one buffer, keyed by typed timer identity
///
/// Re-arming an already armed key replaces its deadline.
#[derive(Debug, Default)]
pub struct TimerTable<K: Ord + Copy> {
    deadlines: BTreeMap<K, Instant>,
}

impl<K: Ord + Copy> TimerTable<K> {
    pub fn new() -> Self {
        TimerTable {
            deadlines: BTreeMap::new(),
        }
    }

    pub fn arm(&mut self, key: K, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    /// Cancel a timer; returns false (and does nothing) when it was not armed
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key whose deadline has passed, earliest first
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_arm_and_expire_in_deadline_order() {
        let start = Instant::now();
        let mut table = TimerTable::new();
        table.arm(TxTimerKey::PduRtx(SeqNumber::new(3)), start + Duration::from_millis(20));
        table.arm(TxTimerKey::PduRtx(SeqNumber::new(1)), start + Duration::from_millis(10));
        table.arm(TxTimerKey::BufferStatus, start + Duration::from_millis(50));

        assert_eq!(table.next_deadline(), Some(start + Duration::from_millis(10)));

        let due = table.expire(start + Duration::from_millis(25));
        assert_eq!(
            due,
            vec![
                TxTimerKey::PduRtx(SeqNumber::new(1)),
                TxTimerKey::PduRtx(SeqNumber::new(3)),
            ]
        );
        assert!(table.is_armed(TxTimerKey::BufferStatus));
    }

    #[test]
    fn test_cancel_unarmed_is_noop() {
        let mut table: TimerTable<TxTimerKey> = TimerTable::new();
        assert!(!table.cancel(TxTimerKey::MrwRtx(0)));
        table.arm(TxTimerKey::MrwRtx(0), Instant::now());
        assert!(table.cancel(TxTimerKey::MrwRtx(0)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let start = Instant::now();
        let mut table = TimerTable::new();
        table.arm(RxTimerKey::StatusReport, start + Duration::from_millis(10));
        table.arm(RxTimerKey::StatusReport, start + Duration::from_millis(40));
        assert!(table.expire(start + Duration::from_millis(20)).is_empty());
        assert_eq!(
            table.expire(start + Duration::from_millis(40)),
            vec![RxTimerKey::StatusReport]
        );
    }
}
