//! Recovering the wallet behind an EIP-191 `personal_sign` signature.

use crate::model::address::{WALLET_ADDRESS_LEN, WalletAddress};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{
    Deserialize, Deserializer,
    de::{Error, Unexpected},
};
use sha3::{Digest, Keccak256};
use std::{
    fmt::{Debug, Formatter},
    str::FromStr,
};
use thiserror::Error;

pub const SIGNATURE_LEN: usize = 65;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SignatureError {
    #[error("Signature is not 65 hex encoded bytes")]
    Encoding,
    #[error("Signature recovery byte {0} is invalid")]
    RecoveryByte(u8),
    #[error("Signature could not be recovered: {0}")]
    Recovery(String),
}

/// `r ‖ s ‖ v` as produced by wallets.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct WalletSignature([u8; SIGNATURE_LEN]);

impl WalletSignature {
    #[must_use]
    pub fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for WalletSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0; SIGNATURE_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| SignatureError::Encoding)?;
        Ok(Self(bytes))
    }
}

impl Debug for WalletSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletSignature(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for WalletSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        inner
            .parse()
            .map_err(|_| Error::invalid_value(Unexpected::Str(&inner), &"WalletSignature"))
    }
}

/// Keccak-256 of the message with the `personal_sign` prefix applied.
#[must_use]
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()));
    hasher.update(message);
    hasher.finalize().into()
}

/// The address controlled by `key`: the last 20 bytes of the Keccak-256 hash
/// of the uncompressed public key.
#[must_use]
pub fn address_of(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);

    let mut address = [0; WALLET_ADDRESS_LEN];
    address.copy_from_slice(&hash[hash.len() - WALLET_ADDRESS_LEN..]);
    WalletAddress::new(address)
}

/// Recovers the address that signed `message` with `personal_sign`.
pub fn recover_signer(
    message: &str,
    signature: &WalletSignature,
) -> Result<WalletAddress, SignatureError> {
    let (rs, v) = signature.0.split_at(SIGNATURE_LEN - 1);
    let v = v[0];

    // Legacy wallets add 27 to the parity bit.
    let parity = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(SignatureError::RecoveryByte(other)),
    };
    let recovery_id = RecoveryId::from_byte(parity).ok_or(SignatureError::RecoveryByte(v))?;
    let signature =
        Signature::from_slice(rs).map_err(|err| SignatureError::Recovery(err.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(
        &personal_message_hash(message),
        &signature,
        recovery_id,
    )
    .map_err(|err| SignatureError::Recovery(err.to_string()))?;

    Ok(address_of(&key))
}
