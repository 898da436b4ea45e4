use crate::chain::{ChainClient, ChainError};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use paywall_common::{
    model::{
        Id,
        address::{TxHash, WalletAddress},
        auth::{AuthTokenDecodeError, AuthTokenHashError},
        comment::CommentMarker,
        form::FormErrors,
        post::PostMarker,
        purchase::{PaymentMismatch, PurchaseRefusal},
    },
    util::PositiveDuration,
    wallet::SignatureError,
};
use paywall_db::client::{DbClient, DbError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::error;

mod auth;
mod json;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SessionConfig {
    pub session_duration: PositiveDuration,
    pub challenge_ttl: PositiveDuration,
}

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub chain_client: Arc<ChainClient>,
    pub session_config: SessionConfig,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("No unexpired login challenge for {0}")]
    ChallengeMissingOrExpired(WalletAddress),
    #[error("The signature could not be verified: {0}")]
    Signature(#[from] SignatureError),
    #[error("The challenge was signed by {actual}, not {expected}")]
    SignerMismatch {
        expected: WalletAddress,
        actual: WalletAddress,
    },
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentByIdNotFound(Id<CommentMarker>),
    #[error("Only the author may change post {0}.")]
    NotAuthor(Id<PostMarker>),
    #[error("{0}")]
    Validation(FormErrors),
    #[error("Post {0} was purchased and cannot be deleted.")]
    PostHasPurchases(Id<PostMarker>),
    #[error("Purchase refused: {0}")]
    PurchaseRefused(#[from] PurchaseRefusal),
    #[error("Transaction {0} already paid for a purchase.")]
    TxHashAlreadyUsed(TxHash),
    #[error("This purchase was already recorded.")]
    PurchaseConflict,
    #[error("The payment does not match the post: {0}")]
    Payment(#[from] PaymentMismatch),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Payment {tx_hash} was confirmed but the purchase could not be recorded: {source}")]
    PurchaseRecordFailed { tx_hash: TxHash, source: DbError },
}

impl From<FormErrors> for ServerError {
    fn from(value: FormErrors) -> Self {
        Self::Validation(value)
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::CommentByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken
            | ServerError::ChallengeMissingOrExpired(_)
            | ServerError::Signature(_)
            | ServerError::SignerMismatch { .. } => StatusCode::UNAUTHORIZED,
            ServerError::JsonRejection(_)
            | ServerError::QueryRejection(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_) => StatusCode::BAD_REQUEST,
            ServerError::NotAuthor(_) => StatusCode::FORBIDDEN,
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::PostHasPurchases(_)
            | ServerError::PurchaseRefused(_)
            | ServerError::TxHashAlreadyUsed(_)
            | ServerError::PurchaseConflict => StatusCode::CONFLICT,
            ServerError::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            ServerError::Chain(ChainError::NotConfirmed(_)) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Chain(ChainError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Chain(_) => StatusCode::BAD_GATEWAY,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::PurchaseRecordFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client gets to read. Server side failures stay in the logs.
    fn message(&self) -> String {
        match self {
            ServerError::Chain(ChainError::NotConfirmed(_) | ChainError::Cancelled) => {
                self.to_string()
            }
            _ if self.status().is_server_error() => "Something went wrong".to_owned(),
            _ => self.to_string(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<FormErrors>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let message = self.message();
        let fields = match self {
            ServerError::Validation(errors) => Some(errors),
            _ => None,
        };
        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
            fields,
        };
        (status, Json(error_response)).into_response()
    }
}
