use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{
    Deserializer, Serialize, Serializer,
    de::{Error, Unexpected, Visitor},
};
use std::{fmt::Formatter, str::FromStr};
use thiserror::Error;

/// Decimals of the chain's native asset.
pub const NATIVE_DECIMALS: u32 = 18;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidPriceError {
    #[error("Price must not be negative: {0}")]
    Negative(Decimal),
    #[error("Price has more than {NATIVE_DECIMALS} decimal places: {0}")]
    TooPrecise(Decimal),
    #[error("Price is too large: {0}")]
    TooLarge(Decimal),
    #[error("Price is not a number: {0}")]
    Malformed(String),
}

/// A non-negative amount of the native asset, exactly representable in wei.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Price(Decimal);

impl Price {
    pub fn new(amount: Decimal) -> Result<Self, InvalidPriceError> {
        let amount = amount.normalize();
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(InvalidPriceError::Negative(amount));
        }
        if amount.scale() > NATIVE_DECIMALS {
            return Err(InvalidPriceError::TooPrecise(amount));
        }
        if to_wei(amount).is_none() {
            return Err(InvalidPriceError::TooLarge(amount));
        }

        // Drop a possible negative sign on zero.
        Ok(Self(amount.abs()))
    }

    #[must_use]
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    #[must_use]
    pub fn get(self) -> Decimal {
        self.0
    }

    #[must_use]
    pub fn is_free(self) -> bool {
        self.0.is_zero()
    }

    /// The price in the smallest unit of the native asset.
    #[must_use]
    pub fn wei(self) -> u128 {
        to_wei(self.0).expect("Price invariant guarantees a wei representation")
    }

    /// Total earned from `buyers` purchases at this price.
    #[must_use]
    pub fn revenue(self, buyers: u64) -> Decimal {
        self.0.saturating_mul(Decimal::from(buyers)).normalize()
    }
}

fn to_wei(amount: Decimal) -> Option<u128> {
    let wei = amount.checked_mul(Decimal::from(10_u64.pow(NATIVE_DECIMALS)))?;
    if !wei.fract().is_zero() {
        return None;
    }
    wei.to_u128()
}

impl FromStr for Price {
    type Err = InvalidPriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount =
            Decimal::from_str(s).map_err(|_| InvalidPriceError::Malformed(s.to_owned()))?;
        Self::new(amount)
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

/// Serializes any decimal as a string, the way prices are sent.
pub fn serialize_decimal<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

struct DecimalVisitor;

impl Visitor<'_> for DecimalVisitor {
    type Value = Decimal;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("a decimal number or a string containing one")
    }

    fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(Decimal::from(value))
    }

    fn visit_i64<E: Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(Decimal::from(value))
    }

    fn visit_f64<E: Error>(self, value: f64) -> Result<Self::Value, E> {
        // The shortest round-trip representation avoids binary float noise.
        Decimal::from_str(&value.to_string())
            .or_else(|_| Decimal::from_scientific(&value.to_string()))
            .map_err(|_| E::invalid_value(Unexpected::Float(value), &self))
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
        Decimal::from_str(value.trim())
            .or_else(|_| Decimal::from_scientific(value.trim()))
            .map_err(|_| E::invalid_value(Unexpected::Str(value), &self))
    }
}

/// Accepts `"0.01"` as well as `0.01`, since forms send either.
/// The value is not validated; see [`Price::new`].
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DecimalVisitor)
}
