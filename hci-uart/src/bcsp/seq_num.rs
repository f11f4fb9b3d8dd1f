use core::{
    fmt,
    ops::{Add, AddAssign, Sub},
};

/// A 3-bit BCSP sequence or acknowledgement number.
///
/// All arithmetic wraps modulo 8, matching the width of the `seq` and `ack` header fields.
/// Subtracting two `SeqNum`s yields the forward distance from the right-hand side to the left-hand
/// side, which is how many frames lie between them.
#[derive(PartialEq, Eq, Copy, Clone, Default)]
pub struct SeqNum(u8);

impl SeqNum {
    /// A sequence number of 0 (default value).
    pub const ZERO: Self = SeqNum(0);

    /// Creates a sequence number from the lower 3 bits of `raw`.
    pub const fn new(raw: u8) -> Self {
        SeqNum(raw & 0b111)
    }

    /// Returns the numeric value, in range `0..8`.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl Add<u8> for SeqNum {
    type Output = Self;

    fn add(self, rhs: u8) -> Self {
        SeqNum::new(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u8> for SeqNum {
    fn add_assign(&mut self, rhs: u8) {
        *self = *self + rhs;
    }
}

impl Sub<u8> for SeqNum {
    type Output = Self;

    fn sub(self, rhs: u8) -> Self {
        SeqNum::new(self.0.wrapping_sub(rhs))
    }
}

impl Sub for SeqNum {
    type Output = u8;

    fn sub(self, rhs: Self) -> u8 {
        self.0.wrapping_sub(rhs.0) & 0b111
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps() {
        assert_eq!(SeqNum::new(7) + 1, SeqNum::ZERO);
        assert_eq!(SeqNum::new(9), SeqNum::new(1));
        assert_eq!(SeqNum::new(1) - 3, SeqNum::new(6));

        let mut s = SeqNum::new(6);
        s += 3;
        assert_eq!(s.value(), 1);
    }

    #[test]
    fn distance() {
        assert_eq!(SeqNum::new(5) - SeqNum::new(3), 2);
        assert_eq!(SeqNum::new(1) - SeqNum::new(6), 3);
        assert_eq!(SeqNum::new(4) - SeqNum::new(4), 0);
    }
}
