use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use paywall_common::model::{
    Id,
    address::WalletAddress,
    auth::{AuthToken, SessionMarker},
};
use paywall_db::client::DbClient;
use std::sync::Arc;
use time::OffsetDateTime;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// The wallet behind a valid session token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedWallet {
    session_id: Id<SessionMarker>,
    address: WalletAddress,
}

impl AuthenticatedWallet {
    #[must_use]
    pub fn address(self) -> WalletAddress {
        self.address
    }

    #[must_use]
    pub fn session_id(self) -> Id<SessionMarker> {
        self.session_id
    }
}

impl<S> FromRequestParts<S> for AuthenticatedWallet
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken =
            <AuthorizationHeader as FromRequestParts<S>>::from_request_parts(parts, state)
                .await
                .map_err(ServerError::InvalidAuthorizationHeader)?
                .token()
                .parse()?;

        let session = Arc::<DbClient>::from_ref(state)
            .fetch_session(request_token.session_id)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if request_token.hash()? != session.token_hash
            || session.is_expired_at(OffsetDateTime::now_utc())
        {
            return Err(ServerError::InvalidToken);
        }

        Ok(Self {
            session_id: session.id,
            address: session.address,
        })
    }
}

/// Anonymous when no `Authorization` header is sent. A header that is sent
/// must still be valid.
impl<S> OptionalFromRequestParts<S> for AuthenticatedWallet
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }

        <Self as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}
