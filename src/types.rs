//! Element types and small shared enums.
//!
//! All tile kernels are generic over [`Scalar`], which is implemented for the four
//! element types the library supports: `f32`, `f64`, [`faer::c32`] and [`faer::c64`].
//! The trait extends [`faer::traits::ComplexField`], so every kernel can hand its tiles
//! straight to faer's matrix multiplication routines, and adds the handful of scalar
//! helpers the Householder reflector computation needs.

use faer::traits::ComplexField;
use faer::{c32, c64};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Matrix element type.
pub trait Scalar:
    ComplexField
    + Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    /// The real type underlying `Self` (`Self` itself for real types).
    type Base: RealScalar;

    const IS_COMPLEX: bool;

    fn zero() -> Self;
    fn one() -> Self;
    fn from_base(value: Self::Base) -> Self;
    fn from_f64(value: f64) -> Self;
    /// `re + i im`; the imaginary part is dropped for real types.
    fn from_parts(re: f64, im: f64) -> Self;
    fn real_part(self) -> Self::Base;
    fn conjugate(self) -> Self;
    /// `|self|^2`.
    fn abs_squared(self) -> Self::Base;
}

/// Real element type.
pub trait RealScalar: Scalar<Base = Self> + PartialOrd {
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn epsilon() -> Self;
    fn is_sign_negative(self) -> bool;
    fn to_f64(self) -> f64;
}

macro_rules! impl_real_scalar {
    ($t:ty) => {
        impl Scalar for $t {
            type Base = $t;
            const IS_COMPLEX: bool = false;

            fn zero() -> Self {
                0.0
            }
            fn one() -> Self {
                1.0
            }
            fn from_base(value: Self::Base) -> Self {
                value
            }
            fn from_f64(value: f64) -> Self {
                value as $t
            }
            fn from_parts(re: f64, _im: f64) -> Self {
                re as $t
            }
            fn real_part(self) -> Self::Base {
                self
            }
            fn conjugate(self) -> Self {
                self
            }
            fn abs_squared(self) -> Self::Base {
                self * self
            }
        }

        impl RealScalar for $t {
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }
            fn abs(self) -> Self {
                <$t>::abs(self)
            }
            fn epsilon() -> Self {
                <$t>::EPSILON
            }
            fn is_sign_negative(self) -> bool {
                <$t>::is_sign_negative(self)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

macro_rules! impl_complex_scalar {
    ($t:ty, $base:ty) => {
        impl Scalar for $t {
            type Base = $base;
            const IS_COMPLEX: bool = true;

            fn zero() -> Self {
                <$t>::new(0.0, 0.0)
            }
            fn one() -> Self {
                <$t>::new(1.0, 0.0)
            }
            fn from_base(value: Self::Base) -> Self {
                <$t>::new(value, 0.0)
            }
            fn from_f64(value: f64) -> Self {
                <$t>::new(value as $base, 0.0)
            }
            fn from_parts(re: f64, im: f64) -> Self {
                <$t>::new(re as $base, im as $base)
            }
            fn real_part(self) -> Self::Base {
                self.re
            }
            fn conjugate(self) -> Self {
                <$t>::new(self.re, -self.im)
            }
            fn abs_squared(self) -> Self::Base {
                self.re * self.re + self.im * self.im
            }
        }
    };
}

impl_real_scalar!(f32);
impl_real_scalar!(f64);
impl_complex_scalar!(c32, f32);
impl_complex_scalar!(c64, f64);

/// One of the two axes of a 2D index space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Coord {
    Row,
    Col,
}

impl Coord {
    pub const fn orthogonal(self) -> Coord {
        match self {
            Coord::Row => Coord::Col,
            Coord::Col => Coord::Row,
        }
    }
}

/// Which triangle of a hermitian matrix holds the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uplo {
    Lower,
    Upper,
}
