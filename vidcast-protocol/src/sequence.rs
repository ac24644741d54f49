//! Sequence Number Handling
//!
//! Packets carry a full 32-bit sequence number that wraps around at 2^32.
//! This module provides a wrapped sequence number type whose comparisons use
//! serial-number arithmetic, so ordering stays correct across the wrap.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Maximum sequence number value before wrapping to zero
pub const MAX_SEQ_NUMBER: u32 = u32::MAX;

/// First sequence number of every stream
pub const INITIAL_SEQ: SeqNumber = SeqNumber(1);

/// Sequence number with 32-bit wraparound semantics
///
/// Two sequence numbers are ordered by the shortest distance between them on
/// the 2^32 circle: `b` is ahead of `a` when `b - a (mod 2^32)` is below half
/// the sequence space.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Create a new sequence number
    #[inline]
    pub const fn new(value: u32) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Calculate the distance from this sequence number to another
    ///
    /// Returns a signed distance that accounts for wraparound. Positive values
    /// mean `other` is ahead of `self`, negative means `other` is behind.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }

    /// Big-endian wire representation
    #[inline]
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parse from the big-endian wire representation
    #[inline]
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        SeqNumber(u32::from_be_bytes(bytes))
    }
}

impl Default for SeqNumber {
    fn default() -> Self {
        INITIAL_SEQ
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
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Calculate the signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}
