use crate::{
    model::{Id, address::WalletAddress},
    util::PositiveDuration,
    wallet::WalletSignature,
};
use argon2::{Argon2, Params};
use base64::{DecodeError, Engine, display::Base64Display, prelude::BASE64_STANDARD};
use serde::Deserialize;
use std::{
    fmt::{Debug, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::OffsetDateTime;

pub const AUTH_TOKEN_CORE_LEN: usize = 24;
pub const AUTH_TOKEN_SALT_LEN: usize = 18;
pub const AUTH_TOKEN_HASH_LEN: usize = Params::DEFAULT_OUTPUT_LEN;
pub const CHALLENGE_NONCE_LEN: usize = 16;
pub const CHALLENGE_TTL_SECONDS: i64 = 5 * 60;

/// Name shown to the user in the message their wallet signs.
pub const SERVICE_NAME: &str = "Paywall";

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing auth token failed: {0}")]
pub struct AuthTokenHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum AuthTokenDecodeError {
    #[error("Not enough parts separated by ':'")]
    NotEnoughParts,
    #[error("Invalid session id: {0}")]
    InvalidSessionId(ParseIntError),
    #[error("Decoding base64 failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("The length of the core part is incorrect")]
    InvalidCoreLength,
    #[error("The length of the salt part is incorrect")]
    InvalidSaltLength,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SessionMarker;

/// Bearer token handed out on login: `session_id:base64(core):base64(salt)`.
/// Only the argon2 hash of core and salt is stored.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AuthToken {
    pub session_id: Id<SessionMarker>,
    pub core: [u8; AUTH_TOKEN_CORE_LEN],
    pub salt: [u8; AUTH_TOKEN_SALT_LEN],
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AuthTokenHash(pub Box<[u8; AUTH_TOKEN_HASH_LEN]>);

/// A logged in wallet.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Session {
    pub id: Id<SessionMarker>,
    pub address: WalletAddress,
    pub token_hash: AuthTokenHash,
    pub created_at: OffsetDateTime,
    pub expires_after: Option<PositiveDuration>,
}

impl Session {
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_after
            .map(|expires_after| self.created_at + expires_after.get())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at()
            .is_some_and(|expires_at| expires_at <= now)
    }
}

impl AuthToken {
    #[must_use]
    pub fn generate_random(session_id: Id<SessionMarker>) -> Self {
        let core = rand::random();
        let salt = rand::random();

        Self {
            session_id,
            core,
            salt,
        }
    }

    #[must_use]
    pub fn as_token_str(&self) -> String {
        let session_id = self.session_id;
        let encoded_core = Base64Display::new(&self.core, &BASE64_STANDARD);
        let encoded_salt = Base64Display::new(&self.salt, &BASE64_STANDARD);

        format!("{session_id}:{encoded_core}:{encoded_salt}")
    }

    pub fn hash(&self) -> Result<AuthTokenHash, AuthTokenHashError> {
        let argon2 = Argon2::default();

        let mut hash = Box::new([0; AUTH_TOKEN_HASH_LEN]);
        argon2
            .hash_password_into(&self.core, &self.salt, &mut *hash)
            .map_err(AuthTokenHashError)?;

        Ok(AuthTokenHash(hash))
    }
}

impl FromStr for AuthToken {
    type Err = AuthTokenDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');

        let session_id_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;
        let core_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;
        let salt_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;

        let session_id = session_id_part
            .parse()
            .map_err(Self::Err::InvalidSessionId)?;
        let core = BASE64_STANDARD
            .decode(core_part)?
            .try_into()
            .map_err(|_| Self::Err::InvalidCoreLength)?;
        let salt = BASE64_STANDARD
            .decode(salt_part)?
            .try_into()
            .map_err(|_| Self::Err::InvalidSaltLength)?;

        Ok(Self {
            session_id,
            core,
            salt,
        })
    }
}

impl Debug for AuthToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("session_id", &self.session_id)
            .field("core", &"[redacted]")
            .field("salt", &"[redacted]")
            .finish()
    }
}

impl Debug for AuthTokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthTokenHash").field(&"[redacted]").finish()
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The auth token hash had an invalid length")]
pub struct InvalidAuthTokenHashError;

impl TryFrom<Box<[u8]>> for AuthTokenHash {
    type Error = InvalidAuthTokenHashError;

    fn try_from(value: Box<[u8]>) -> Result<Self, Self::Error> {
        Ok(Self(
            value.try_into().map_err(|_| InvalidAuthTokenHashError)?,
        ))
    }
}

/// The text a wallet signs to prove it controls an address.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct LoginChallenge {
    pub address: WalletAddress,
    pub message: String,
    pub expires_at: OffsetDateTime,
}

impl LoginChallenge {
    #[must_use]
    pub fn issue(address: WalletAddress, now: OffsetDateTime, ttl: PositiveDuration) -> Self {
        let nonce: [u8; CHALLENGE_NONCE_LEN] = rand::random();
        let message = format!(
            "{SERVICE_NAME} wants you to sign in with your wallet:\n\
            {address}\n\n\
            Nonce: {}",
            hex::encode(nonce)
        );

        Self {
            address,
            message,
            expires_at: now + ttl.get(),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct ChallengeRequest {
    pub address: WalletAddress,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct LoginRequest {
    pub address: WalletAddress,
    /// The challenge message exactly as it was signed.
    pub message: String,
    pub signature: WalletSignature,
}

#[cfg(test)]
mod tests {
    use crate::{
        model::{
            Id,
            address::WalletAddress,
            auth::{AuthToken, AuthTokenDecodeError, LoginChallenge, Session},
        },
        util::PositiveDuration,
    };
    use time::{Duration, macros::datetime};

    #[test]
    fn token_string_round_trip() {
        let token = AuthToken::generate_random(Id::from(1_234_567));
        let parsed: AuthToken = token.as_token_str().parse().unwrap();

        assert_eq!(parsed, token);
        assert_eq!(parsed.hash().unwrap(), token.hash().unwrap());
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(
            "123:abc".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::NotEnoughParts)
        );
        assert!(matches!(
            "x:AAAA:AAAA".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::InvalidSessionId(_))
        ));
        assert_eq!(
            "1:AAAA:AAAA".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::InvalidCoreLength)
        );
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = AuthToken::generate_random(Id::from(9));
        let debug = format!("{token:?}");
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains(&token.as_token_str()));
    }

    #[test]
    fn session_expiry() {
        let token = AuthToken::generate_random(Id::from(9));
        let created_at = datetime!(2025-06-01 12:00 UTC);
        let session = Session {
            id: token.session_id,
            address: WalletAddress::new([1; 20]),
            token_hash: token.hash().unwrap(),
            created_at,
            expires_after: Some(PositiveDuration::from_seconds(3600).unwrap()),
        };

        assert!(!session.is_expired_at(created_at + Duration::minutes(59)));
        assert!(session.is_expired_at(created_at + Duration::hours(1)));

        let forever = Session {
            expires_after: None,
            ..session
        };
        assert!(!forever.is_expired_at(created_at + Duration::days(10_000)));
    }

    #[test]
    fn challenges_are_unique_and_expire() {
        let address = WalletAddress::new([3; 20]);
        let now = datetime!(2025-06-01 12:00 UTC);
        let ttl = PositiveDuration::from_seconds(300).unwrap();

        let first = LoginChallenge::issue(address, now, ttl);
        let second = LoginChallenge::issue(address, now, ttl);

        assert_ne!(first.message, second.message);
        assert!(first.message.contains(&address.to_string()));
        assert!(!first.is_expired_at(now + Duration::minutes(4)));
        assert!(first.is_expired_at(now + Duration::minutes(5)));
    }
}
