//! Fragment Sequence Number Handling
//!
//! AM fragment sequence numbers are per-connection, monotonically increasing
//! values. Window slot positions are always derived from a sequence number by
//! subtracting the window's first sequence number; that arithmetic lives here,
//! behind a bounds-checked accessor, instead of being recomputed ad hoc at
//! every call site.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Per-connection fragment sequence number
///
/// Unlike transports with wrapping 31-bit sequence spaces, the AM engine uses
/// a plain monotonic counter: a connection is torn down long before 2^32
/// fragments are in flight.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct SeqNumber(u32);

impl SeqNumber {
    pub const ZERO: SeqNumber = SeqNumber(0);

    /// Create a new sequence number
    #[inline]
    pub fn new(value: u32) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0 + 1)
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// Signed distance from this sequence number to another
    ///
    /// Positive means `other` is ahead of `self`.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i64 {
        other.0 as i64 - self.0 as i64
    }

    /// Window slot index of this sequence number relative to the window's
    /// first sequence number.
    ///
    /// Returns `None` when this sequence number precedes `first` — the
    /// caller decides whether that is a stale signal (ignored) or a protocol
    /// violation (fatal). This is the single chokepoint for
    /// `seq - first` slot arithmetic.
    #[inline]
    pub fn index_after(self, first: SeqNumber) -> Option<usize> {
        if self.0 >= first.0 {
            Some((self.0 - first.0) as usize)
        } else {
            None
        }
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0 + rhs)
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl Sub for SeqNumber {
    type Output = i64;

    /// Signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i64 {
        rhs.distance_to(self)
    }
}
