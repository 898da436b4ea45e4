use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedWallet, json::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use paywall_common::model::{
    Id,
    comment::{
        Comment, CommentThread, CreateCommentForm, MAX_REPLY_DEPTH, build_comment_tree,
        check_reply_depth,
    },
    post::PostMarker,
};
use paywall_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_comments)
        .typed_post(create_comment)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct CommentsPath {
    id: Id<PostMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct CommentsResponse {
    /// Every comment of the post, replies included.
    total: usize,
    comments: Vec<CommentThread>,
}

async fn ensure_post_exists(db: &DbClient, id: Id<PostMarker>) -> Result<()> {
    db.fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    Ok(())
}

async fn list_comments(
    CommentsPath { id }: CommentsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<CommentsResponse>> {
    ensure_post_exists(&db, id).await?;

    let comments = db.fetch_comments(id).await?;
    let total = comments.len();

    Ok(Json(CommentsResponse {
        total,
        comments: build_comment_tree(comments),
    }))
}

async fn create_comment(
    CommentsPath { id }: CommentsPath,
    State(db): State<Arc<DbClient>>,
    author: AuthenticatedWallet,
    Json(form): Json<CreateCommentForm>,
) -> Result<(StatusCode, Json<Comment>)> {
    let comment = form.validate(id, author.address())?;
    ensure_post_exists(&db, id).await?;

    // Replies must stay within the post they answer.
    if let Some(parent_id) = comment.parent_id {
        db.fetch_comment(parent_id)
            .await?
            .filter(|parent| parent.post_id == id)
            .ok_or(ServerError::CommentByIdNotFound(parent_id))?;

        let parent_depth = db
            .fetch_comment_depth(parent_id, MAX_REPLY_DEPTH)
            .await?
            .ok_or(ServerError::CommentByIdNotFound(parent_id))?;
        check_reply_depth(parent_depth)?;
    }

    let comment = db.create_comment(&comment).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
