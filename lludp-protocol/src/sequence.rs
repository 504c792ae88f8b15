//! Sequence number arithmetic
//!
//! Outbound packets carry a 32-bit sequence number that wraps around.
//! Comparisons use serial-number arithmetic so ordering is preserved across
//! the wrap boundary.

use std::fmt;

/// Wrapping 32-bit sequence number
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    #[inline]
    pub fn new(value: u32) -> Self {
        SeqNumber(value)
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Advance to the next sequence number in place
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Signed distance from this sequence number to another.
    ///
    /// Positive when `other` is ahead of `self`, negative when behind.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
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
