pub mod address;
pub mod auth;
pub mod comment;
pub mod form;
pub mod post;
pub mod price;
pub mod purchase;

use crate::{
    model::{
        address::{InvalidTxHashError, InvalidWalletAddressError},
        auth::InvalidAuthTokenHashError,
        price::InvalidPriceError,
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData, str::FromStr};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

/// Raised when a stored value no longer satisfies the model's invariants.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    WalletAddress(#[from] InvalidWalletAddressError),
    #[error(transparent)]
    TxHash(#[from] InvalidTxHashError),
    #[error(transparent)]
    Price(#[from] InvalidPriceError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PaywallEpoch;
impl Epoch for PaywallEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type PaywallSnowflake = Snowflake<PaywallEpoch>;
pub type PaywallSnowflakeGenerator = SnowflakeGenerator<PaywallEpoch>;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(PaywallSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: PaywallSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> PaywallSnowflake {
        self.0
    }

    /// The id as stored in a `BIGINT` column.
    #[must_use]
    pub fn as_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaywallSnowflake::from_str(s).map(Self::new)
    }
}

impl<Marker> From<PaywallSnowflake> for Id<Marker> {
    fn from(value: PaywallSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for PaywallSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(PaywallSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, post::PostMarker};

    #[test]
    fn db_representation_keeps_the_high_bit() {
        let id = Id::<PostMarker>::from(u64::MAX - 7);
        assert_eq!(Id::<PostMarker>::from_db(id.as_db()), id);
        assert!(id.as_db().is_negative());
    }

    #[test]
    fn parses_from_path_segment() {
        let id: Id<PostMarker> = "123456789012345678".parse().unwrap();
        assert_eq!(u64::from(id), 123_456_789_012_345_678);
        assert!("abc".parse::<Id<PostMarker>>().is_err());
    }
}
