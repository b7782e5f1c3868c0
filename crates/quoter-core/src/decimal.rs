//! Precision-safe decimal types for order prices and quantities.
//!
//! Both types wrap `rust_decimal::Decimal`. Rounding to the instrument grid
//! is round-half-even, which is what the venue applies on its side, so local
//! comparisons of rounded values match what the venue will accept.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Shared arithmetic and conversions for the decimal newtypes.
macro_rules! decimal_newtype {
    ($name:ident) => {
        impl $name {
            pub const ZERO: Self = Self(Decimal::ZERO);
            pub const ONE: Self = Self(Decimal::ONE);

            #[inline]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[inline]
            pub fn inner(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            #[inline]
            pub fn is_positive(&self) -> bool {
                self.0.is_sign_positive() && !self.0.is_zero()
            }

            /// Round to the nearest multiple of `step` (half-even).
            ///
            /// A zero or negative step leaves the value untouched.
            #[inline]
            fn round_to_step(self, step: Decimal) -> Self {
                if step <= Decimal::ZERO {
                    return self;
                }
                Self(((self.0 / step).round() * step).normalize())
            }

            /// Round down to a multiple of `step`.
            #[inline]
            fn floor_to_step(self, step: Decimal) -> Self {
                if step <= Decimal::ZERO {
                    return self;
                }
                Self(((self.0 / step).floor() * step).normalize())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = rust_decimal::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<Decimal> for $name {
            fn from(d: Decimal) -> Self {
                Self(d)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = Self;

            fn mul(self, rhs: Decimal) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<Decimal> for $name {
            type Output = Self;

            fn div(self, rhs: Decimal) -> Self::Output {
                Self(self.0 / rhs)
            }
        }
    };
}

/// Price with exact decimal precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

decimal_newtype!(Price);

impl Price {
    /// Round to the nearest tick.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        self.round_to_step(tick_size.0)
    }

    /// Round down to the tick grid.
    #[inline]
    pub fn floor_to_tick(&self, tick_size: Price) -> Self {
        self.floor_to_step(tick_size.0)
    }

    /// Signed basis-point difference from `other`.
    #[inline]
    pub fn bps_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(10000))
    }

    /// Absolute basis-point distance from `reference`.
    #[inline]
    pub fn bps_distance(&self, reference: Price) -> Option<Decimal> {
        self.bps_from(reference).map(|bps| bps.abs())
    }
}

/// Quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

decimal_newtype!(Size);

impl Size {
    /// Round to the nearest lot.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        self.round_to_step(lot_size.0)
    }

    /// Round down to the lot grid. Used when shrinking into a budget.
    #[inline]
    pub fn floor_to_lot(&self, lot_size: Size) -> Self {
        self.floor_to_step(lot_size.0)
    }

    /// Notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }

    /// `self - rhs`, never below zero.
    #[inline]
    pub fn saturating_sub(self, rhs: Size) -> Size {
        if rhs.0 >= self.0 {
            Size::ZERO
        } else {
            Size(self.0 - rhs.0)
        }
    }
}
