use crate::server::{
    Result, ServerError, ServerRouter, SessionConfig, auth::AuthenticatedWallet, json::Json,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use paywall_common::{
    model::{
        address::WalletAddress,
        auth::{ChallengeRequest, LoginChallenge, LoginRequest},
    },
    wallet::recover_signer,
};
use paywall_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(request_challenge)
        .typed_post(login)
        .typed_post(logout)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/auth/challenge", rejection(ServerError))]
struct ChallengePath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/auth/login", rejection(ServerError))]
struct LoginPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/auth/logout", rejection(ServerError))]
struct LogoutPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct ChallengeResponse {
    /// To be signed with `personal_sign`.
    message: String,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct LoginResponse {
    token: String,
    address: WalletAddress,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
}

async fn request_challenge(
    ChallengePath(): ChallengePath,
    State(db): State<Arc<DbClient>>,
    State(config): State<SessionConfig>,
    Json(ChallengeRequest { address }): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>> {
    let challenge = LoginChallenge::issue(address, OffsetDateTime::now_utc(), config.challenge_ttl);
    db.store_challenge(&challenge).await?;

    Ok(Json(ChallengeResponse {
        message: challenge.message,
        expires_at: challenge.expires_at,
    }))
}

async fn login(
    LoginPath(): LoginPath,
    State(db): State<Arc<DbClient>>,
    State(config): State<SessionConfig>,
    Json(LoginRequest {
        address,
        message,
        signature,
    }): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    // A bad signature leaves the challenge in place.
    let signer = recover_signer(&message, &signature)?;
    if signer != address {
        return Err(ServerError::SignerMismatch {
            expected: address,
            actual: signer,
        });
    }

    db.take_challenge(address, &message)
        .await?
        .filter(|challenge| !challenge.is_expired_at(OffsetDateTime::now_utc()))
        .ok_or(ServerError::ChallengeMissingOrExpired(address))?;

    let (token, session) = db
        .create_session(address, Some(config.session_duration))
        .await?;
    debug!(session_id = %session.id, %address, "Wallet signed in");

    Ok(Json(LoginResponse {
        token: token.as_token_str(),
        address,
        expires_at: session.expires_at(),
    }))
}

async fn logout(
    LogoutPath(): LogoutPath,
    State(db): State<Arc<DbClient>>,
    wallet: AuthenticatedWallet,
) -> Result<StatusCode> {
    db.delete_session(wallet.session_id()).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::server::tests::{offline_app, send};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use k256::ecdsa::SigningKey;
    use paywall_common::wallet::personal_message_hash;
    use std::fmt::Write;

    fn json_post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn challenge_needs_a_valid_address() {
        let request = json_post("/auth/challenge", r#"{"address":"0x1234"}"#);
        let (status, body) = send(offline_app(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn login_needs_a_well_formed_signature() {
        let request = json_post(
            "/auth/login",
            r#"{
                "address": "0x7e5f4552091a69125d5dfcd7b8c2659029395bdf",
                "message": "Paywall wants you to sign in with your wallet",
                "signature": "0xdead"
            }"#,
        );
        let (status, _) = send(offline_app(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn foreign_signatures_are_refused_before_any_challenge_is_spent() {
        let mut secret = [0; 32];
        secret[31] = 1;
        let key = SigningKey::from_bytes(&secret.into()).unwrap();

        let message = "Paywall wants you to sign in with your wallet";
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&personal_message_hash(message))
            .unwrap();
        let mut signature_hex = String::from("0x");
        for byte in signature.to_bytes() {
            write!(signature_hex, "{byte:02x}").unwrap();
        }
        write!(signature_hex, "{:02x}", recovery_id.to_byte()).unwrap();

        // Signed by 0x7e5f..., claimed for another wallet.
        let body = serde_json::json!({
            "address": "0x0000000000000000000000000000000000000001",
            "message": message,
            "signature": signature_hex,
        });
        let (status, _) = send(offline_app(), json_post("/auth/login", body.to_string())).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_needs_a_session() {
        let request = Request::post("/auth/logout").body(Body::empty()).unwrap();
        let (status, _) = send(offline_app(), request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
