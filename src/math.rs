//! Overflow-checked offset arithmetic.
//!
//! Every size and address computation in the validator goes through
//! [`Offset`]. Its operators return `Result<Offset, MathError>` instead of
//! wrapping, so a client program that overflows the math model is reported
//! as an arithmetic failure, never as a silently wrong bound.
//!
//! ```
//! use pva_dma::math::Offset;
//!
//! let pitch = Offset::from(64u32);
//! let lines = Offset::from(8u32);
//! let extent = (pitch * lines)?;
//! assert_eq!(extent.get(), 512);
//!
//! assert!((Offset::MAX + Offset::from(1u8)).is_err());
//! # Ok::<(), pva_dma::math::MathError>(())
//! ```

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use thiserror::Error;

/// Arithmetic failure in the offset model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// An operation left the signed 64-bit range.
    #[error("offset overflow: {lhs} {op} {rhs}")]
    Overflow { op: char, lhs: i64, rhs: i64 },

    /// An unsigned value could not be represented as a signed offset.
    #[error("value 0x{0:x} does not fit a signed offset")]
    TooLarge(u64),

    /// A negative offset was used where an address or size was required.
    #[error("offset {0} is negative")]
    Negative(i64),
}

/// Signed byte offset with checked arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(i64);

impl Offset {
    pub const ZERO: Offset = Offset(0);
    pub const MAX: Offset = Offset(i64::MAX);
    pub const MIN: Offset = Offset(i64::MIN);

    #[inline]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Convert an unsigned quantity (address, buffer size) into an offset.
    pub fn from_u64(value: u64) -> Result<Self, MathError> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| MathError::TooLarge(value))
    }

    /// Convert back into an unsigned quantity, rejecting negative values.
    pub fn to_u64(self) -> Result<u64, MathError> {
        u64::try_from(self.0).map_err(|_| MathError::Negative(self.0))
    }

    /// Convert into a buffer index, rejecting negative values.
    pub fn to_usize(self) -> Result<usize, MathError> {
        let value = self.to_u64()?;
        usize::try_from(value).map_err(|_| MathError::TooLarge(value))
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Round up to a power-of-two alignment.
    pub fn align_up(self, align: u64) -> Result<Self, MathError> {
        debug_assert!(align.is_power_of_two());
        let mask = Self::from_u64(align - 1)?;
        let bumped = (self + mask)?;
        Ok(Self(bumped.0 & !mask.0))
    }

    /// True if the offset is a multiple of `align` (a power of two).
    #[inline]
    pub fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        (self.0 as u64) & (align - 1) == 0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! offset_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Offset {
                #[inline]
                fn from(value: $t) -> Self {
                    Self(i64::from(value))
                }
            }
        )*
    };
}

offset_from!(u8, u16, u32, i8, i16, i32, i64);

impl Add for Offset {
    type Output = Result<Offset, MathError>;

    #[inline]
    fn add(self, rhs: Offset) -> Self::Output {
        self.0
            .checked_add(rhs.0)
            .map(Offset)
            .ok_or(MathError::Overflow { op: '+', lhs: self.0, rhs: rhs.0 })
    }
}

impl Sub for Offset {
    type Output = Result<Offset, MathError>;

    #[inline]
    fn sub(self, rhs: Offset) -> Self::Output {
        self.0
            .checked_sub(rhs.0)
            .map(Offset)
            .ok_or(MathError::Overflow { op: '-', lhs: self.0, rhs: rhs.0 })
    }
}

impl Mul for Offset {
    type Output = Result<Offset, MathError>;

    #[inline]
    fn mul(self, rhs: Offset) -> Self::Output {
        self.0
            .checked_mul(rhs.0)
            .map(Offset)
            .ok_or(MathError::Overflow { op: '*', lhs: self.0, rhs: rhs.0 })
    }
}

impl Neg for Offset {
    type Output = Result<Offset, MathError>;

    #[inline]
    fn neg(self) -> Self::Output {
        self.0
            .checked_neg()
            .map(Offset)
            .ok_or(MathError::Overflow { op: '-', lhs: 0, rhs: self.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_ops() {
        let a = Offset::from(10u32);
        let b = Offset::from(-4i32);
        assert_eq!((a + b).unwrap().get(), 6);
        assert_eq!((a - b).unwrap().get(), 14);
        assert_eq!((a * b).unwrap().get(), -40);
        assert_eq!((-b).unwrap().get(), 4);
    }

    #[test]
    fn test_overflow_is_error() {
        assert_eq!(
            Offset::MAX + Offset::from(1u8),
            Err(MathError::Overflow { op: '+', lhs: i64::MAX, rhs: 1 })
        );
        assert!((Offset::MIN - Offset::from(1u8)).is_err());
        assert!((Offset::MAX * Offset::from(2u8)).is_err());
        assert!((-Offset::MIN).is_err());
    }

    #[test]
    fn test_unsigned_conversions() {
        assert_eq!(Offset::from_u64(u64::MAX), Err(MathError::TooLarge(u64::MAX)));
        assert_eq!(Offset::from_u64(42).unwrap().to_u64().unwrap(), 42);
        assert_eq!(Offset::from(-1i32).to_u64(), Err(MathError::Negative(-1)));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(Offset::from(0u8).align_up(8).unwrap().get(), 0);
        assert_eq!(Offset::from(1u8).align_up(8).unwrap().get(), 8);
        assert_eq!(Offset::from(8u8).align_up(8).unwrap().get(), 8);
        assert_eq!(Offset::from(13u8).align_up(4).unwrap().get(), 16);
        assert!(Offset::MAX.align_up(8).is_err());
    }

    #[test]
    fn test_is_aligned() {
        assert!(Offset::from(16u8).is_aligned(8));
        assert!(!Offset::from(12u8).is_aligned(8));
    }
}
