use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const BTC_CURRENCY_CODE: &str = "BTC";
pub const BTC_CURRENCY_CODE_LOWER: &str = "btc";

pub const SATS_PER_BTC: i64 = 100_000_000;

//--------------------------------------        Sats          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Sats(i64);

op!(binary Sats, Add, add);
op!(binary Sats, Sub, sub);
op!(inplace Sats, AddAssign, add_assign);
op!(inplace Sats, SubAssign, sub_assign);
op!(unary Sats, Neg, neg);

impl Mul<i64> for Sats {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Sats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in satoshi: {0}")]
pub struct SatsConversionError(String);

impl From<i64> for Sats {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Sats {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Sats {}

impl TryFrom<u64> for Sats {
    type Error = SatsConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(SatsConversionError(format!("Value {} is too large to convert to Sats", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Sats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.abs() < SATS_PER_BTC {
            write!(f, "{} sats", self.0)
        } else {
            let btc = self.0 as f64 / SATS_PER_BTC as f64;
            write!(f, "{btc:0.8} BTC")
        }
    }
}

impl Sats {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_btc(btc: i64) -> Self {
        Self(btc * SATS_PER_BTC)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}
