use axum::http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE, InvalidHeaderValue},
};
use chain::{ChainClient, ChainError};
use paywall_common::{
    model::auth::CHALLENGE_TTL_SECONDS,
    snowflake::{ProcessId, WorkerId},
    util::{NonPositiveDurationError, PositiveDuration},
};
use paywall_db::client::{DbClient, DbError};
use serde::Deserialize;
use server::{ServerState, SessionConfig};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod chain;
mod server;

const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("WORKER_ID and PROCESS_ID must be between 0 and 31")]
    SnowflakePart,
    #[error("SESSION_DURATION_SECONDS must be positive: {0}")]
    SessionDuration(#[from] NonPositiveDurationError),
    #[error("CORS_ALLOWED_ORIGIN is not a valid origin: {0}")]
    CorsOrigin(#[from] InvalidHeaderValue),
    #[error("Error setting up the database: {0}")]
    Database(#[from] DbError),
    #[error("Error setting up the chain client: {0}")]
    Chain(#[from] ChainError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "Env::default_database_max_connections")]
    database_max_connections: u32,
    chain_rpc_url: Url,
    #[serde(default = "Env::default_receipt_poll_interval_ms")]
    receipt_poll_interval_ms: u64,
    #[serde(default = "Env::default_receipt_max_polls")]
    receipt_max_polls: NonZeroU32,
    #[serde(default = "Env::default_session_duration_seconds")]
    session_duration_seconds: i64,
    #[serde(default)]
    worker_id: u8,
    #[serde(default)]
    process_id: u8,
    /// Any origin when unset.
    cors_allowed_origin: Option<String>,
}

impl Env {
    fn default_database_max_connections() -> u32 {
        10
    }

    fn default_receipt_poll_interval_ms() -> u64 {
        2_000
    }

    fn default_receipt_max_polls() -> NonZeroU32 {
        NonZeroU32::new(60).unwrap_or(NonZeroU32::MIN)
    }

    fn default_session_duration_seconds() -> i64 {
        7 * 24 * 60 * 60
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "paywall_api=debug,\
                paywall_db=debug,\
                paywall_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer, InitError> {
    let allow_origin = match allowed_origin {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin)?),
        None => AllowOrigin::any(),
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "Listening for Ctrl-C failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!(%err, "Listening for SIGTERM failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Periodically drops expired sessions and login challenges.
async fn purge_expired(db_client: Arc<DbClient>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        if let Err(err) = db_client.purge_expired().await {
            warn!(%err, "Purging expired sessions failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let worker_id = WorkerId::new(env.worker_id).ok_or(InitError::SnowflakePart)?;
    let process_id = ProcessId::new(env.process_id).ok_or(InitError::SnowflakePart)?;
    let session_config = SessionConfig {
        session_duration: PositiveDuration::from_seconds(env.session_duration_seconds)?,
        challenge_ttl: PositiveDuration::from_seconds(CHALLENGE_TTL_SECONDS)?,
    };

    let db_client = DbClient::connect(
        &env.database_url,
        env.database_max_connections,
        worker_id,
        process_id,
    )
    .await?;
    db_client.migrate().await?;
    let db_client = Arc::new(db_client);

    let chain_client = ChainClient::new(
        env.chain_rpc_url,
        Duration::from_millis(env.receipt_poll_interval_ms),
        env.receipt_max_polls,
    )?;

    let shutdown = CancellationToken::new();
    tokio::spawn(purge_expired(Arc::clone(&db_client), shutdown.clone()));

    let state = ServerState {
        db_client,
        chain_client: Arc::new(chain_client),
        session_config,
        shutdown: shutdown.clone(),
    };

    let app = server::routes()
        .with_state(state)
        .layer(cors_layer(env.cors_allowed_origin.as_deref())?)
        .layer(TraceLayer::new_for_http());

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down");
        signal_shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
