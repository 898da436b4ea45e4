use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{Error, Unexpected},
};
use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

pub const WALLET_ADDRESS_LEN: usize = 20;
pub const TX_HASH_LEN: usize = 32;

/// Decodes `0x`-prefixed hex of exactly `N` bytes. Case is ignored.
fn decode_prefixed_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    let mut bytes = [0; N];
    hex::decode_to_slice(digits, &mut bytes).ok()?;
    Some(bytes)
}

/// A wallet address. This is the only identity the service knows: posts,
/// comments, purchases and sessions all belong to an address.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct WalletAddress([u8; WALLET_ADDRESS_LEN]);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The wallet address is invalid: {0}")]
pub struct InvalidWalletAddressError(String);

impl WalletAddress {
    #[must_use]
    pub fn new(bytes: [u8; WALLET_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; WALLET_ADDRESS_LEN] {
        &self.0
    }
}

impl FromStr for WalletAddress {
    type Err = InvalidWalletAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed_hex(s)
            .map(Self)
            .ok_or_else(|| InvalidWalletAddressError(s.to_owned()))
    }
}

impl TryFrom<&[u8]> for WalletAddress {
    type Error = InvalidWalletAddressError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        value
            .try_into()
            .map(Self)
            .map_err(|_| InvalidWalletAddressError(format!("0x{}", hex::encode(value))))
    }
}

impl Display for WalletAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for WalletAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for WalletAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        inner
            .parse()
            .map_err(|_| Error::invalid_value(Unexpected::Str(&inner), &"WalletAddress"))
    }
}

/// Hash of a chain transaction, used as the receipt of a purchase.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct TxHash([u8; TX_HASH_LEN]);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The transaction hash is invalid: {0}")]
pub struct InvalidTxHashError(String);

impl TxHash {
    #[must_use]
    pub fn new(bytes: [u8; TX_HASH_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TX_HASH_LEN] {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = InvalidTxHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed_hex(s)
            .map(Self)
            .ok_or_else(|| InvalidTxHashError(s.to_owned()))
    }
}

impl TryFrom<&[u8]> for TxHash {
    type Error = InvalidTxHashError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        value
            .try_into()
            .map(Self)
            .map_err(|_| InvalidTxHashError(format!("0x{}", hex::encode(value))))
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for TxHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        inner
            .parse()
            .map_err(|_| Error::invalid_value(Unexpected::Str(&inner), &"TxHash"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::address::{TxHash, WalletAddress};

    #[test]
    fn address_comparison_ignores_checksum_case() {
        let checksummed: WalletAddress = "0x7E5F4552091A69125d5DfCd7b8C2659029395Bdf"
            .parse()
            .unwrap();
        let lower: WalletAddress = "0x7e5f4552091a69125d5dfcd7b8c2659029395bdf"
            .parse()
            .unwrap();

        assert_eq!(checksummed, lower);
        assert_eq!(
            checksummed.to_string(),
            "0x7e5f4552091a69125d5dfcd7b8c2659029395bdf"
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in [
            "",
            "0x",
            "7e5f4552091a69125d5dfcd7b8c2659029395bdf",
            "0x7e5f4552091a69125d5dfcd7b8c2659029395bd",
            "0x7e5f4552091a69125d5dfcd7b8c2659029395bdfff",
            "0x7e5f4552091a69125d5dfcd7b8c2659029395bdg",
        ] {
            assert!(input.parse::<WalletAddress>().is_err(), "{input}");
        }
    }

    #[test]
    fn from_stored_bytes() {
        let bytes = [0xAB; 20];
        assert_eq!(
            WalletAddress::try_from(&bytes[..]),
            Ok(WalletAddress::new(bytes))
        );
        assert!(WalletAddress::try_from(&bytes[..19]).is_err());
        assert!(TxHash::try_from(&bytes[..]).is_err());
    }

    #[test]
    fn tx_hash_from_json() {
        let json = "\"0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b\"";
        let hash: TxHash = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&hash).unwrap(), json);

        assert!(serde_json::from_str::<TxHash>("\"0x1234\"").is_err());
    }
}
