use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedWallet,
    json::{Json, Query},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use paywall_common::model::{
    Id,
    post::{CreatePostForm, EditPostForm, GatedPost, Post, PostMarker, PostSummary, search_pattern},
};
use paywall_db::client::{DbClient, DbError};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_patch(edit_post)
        .typed_delete(delete_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct PostsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct ListPostsQuery {
    #[serde(default)]
    search: Option<String>,
}

async fn list_posts(
    PostsPath(): PostsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<Vec<PostSummary>>> {
    let pattern = query.search.as_deref().and_then(search_pattern);
    let posts = db.fetch_posts(pattern.as_deref()).await?;

    Ok(Json(posts))
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    viewer: Option<AuthenticatedWallet>,
) -> Result<Json<GatedPost>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    let viewer = viewer.map(AuthenticatedWallet::address);
    let has_purchase = match viewer {
        Some(address) if address != post.summary.author && !post.summary.price.is_free() => {
            db.has_purchase(id, address).await?
        }
        _ => false,
    };

    Ok(Json(post.gate(viewer, has_purchase)))
}

async fn create_post(
    PostsPath(): PostsPath,
    State(db): State<Arc<DbClient>>,
    author: AuthenticatedWallet,
    Json(form): Json<CreatePostForm>,
) -> Result<(StatusCode, Json<Post>)> {
    let post = form.validate(author.address())?;
    let post = db.create_post(&post).await?;

    Ok((StatusCode::CREATED, Json(post)))
}

/// Fetches `id` and checks that `wallet` wrote it.
async fn fetch_own_post(
    db: &DbClient,
    id: Id<PostMarker>,
    wallet: AuthenticatedWallet,
) -> Result<Post> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    if post.summary.author != wallet.address() {
        return Err(ServerError::NotAuthor(id));
    }
    Ok(post)
}

async fn edit_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    author: AuthenticatedWallet,
    Json(form): Json<EditPostForm>,
) -> Result<Json<Post>> {
    fetch_own_post(&db, id, author).await?;

    let edit = form.validate()?;
    let post = db
        .update_post(id, &edit)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    author: AuthenticatedWallet,
) -> Result<StatusCode> {
    fetch_own_post(&db, id, author).await?;

    deletion_response(id, db.delete_post(id).await)
}

fn deletion_response(
    id: Id<PostMarker>,
    deleted: Result<bool, DbError>,
) -> Result<StatusCode> {
    match deleted {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(ServerError::PostByIdNotFound(id)),
        Err(DbError::PostHasPurchases) => Err(ServerError::PostHasPurchases(id)),
        Err(err) => Err(err.into()),
    }
}
