use crate::{
    chain::ChainClient,
    server::{Result, ServerError, ServerRouter, auth::AuthenticatedWallet, json::Json},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use paywall_common::model::{
    Id,
    post::PostMarker,
    purchase::{CreatePurchase, Purchase, PurchaseRequest, check_purchase, verify_payment},
};
use paywall_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(purchase_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/purchase", rejection(ServerError))]
struct PurchasePath {
    id: Id<PostMarker>,
}

/// Unlocks a post once the transfer the buyer already sent is confirmed.
async fn purchase_post(
    PurchasePath { id }: PurchasePath,
    State(db): State<Arc<DbClient>>,
    State(chain): State<Arc<ChainClient>>,
    State(shutdown): State<CancellationToken>,
    buyer: AuthenticatedWallet,
    Json(PurchaseRequest { tx_hash }): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<Purchase>)> {
    let buyer = buyer.address();
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?
        .summary;

    let has_purchase = db.has_purchase(id, buyer).await?;
    check_purchase(&post, buyer, has_purchase)?;
    if db.tx_hash_used(tx_hash).await? {
        return Err(ServerError::TxHashAlreadyUsed(tx_hash));
    }

    info!(post_id = %id, %buyer, %tx_hash, "Waiting for payment confirmation");
    let transfer = chain.wait_for_transfer(tx_hash, &shutdown).await?;

    if let Err(mismatch) = verify_payment(&post, buyer, &transfer) {
        warn!(post_id = %id, %buyer, %tx_hash, %mismatch, "Payment rejected");
        return Err(mismatch.into());
    }
    info!(post_id = %id, %buyer, %tx_hash, "Payment confirmed");

    let purchase = CreatePurchase {
        post_id: id,
        buyer,
        tx_hash,
    };
    let purchase = db.create_purchase(&purchase).await.map_err(|source| {
        error!(
            post_id = %id,
            %buyer,
            %tx_hash,
            error = %source,
            "Payment confirmed but recording the purchase failed"
        );
        ServerError::PurchaseRecordFailed { tx_hash, source }
    })?;

    let purchase = purchase.ok_or(ServerError::PurchaseConflict)?;
    Ok((StatusCode::CREATED, Json(purchase)))
}
