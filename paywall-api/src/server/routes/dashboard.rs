use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedWallet, json::Json};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use paywall_common::model::post::PostStats;
use paywall_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(get_dashboard)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/dashboard", rejection(ServerError))]
struct DashboardPath();

/// The caller's own posts with buyers and revenue.
async fn get_dashboard(
    DashboardPath(): DashboardPath,
    State(db): State<Arc<DbClient>>,
    author: AuthenticatedWallet,
) -> Result<Json<Vec<PostStats>>> {
    let stats = db.fetch_author_stats(author.address()).await?;

    Ok(Json(stats))
}
