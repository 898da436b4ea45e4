use crate::record::{
    ChallengeRecord, CommentRecord, PostRecord, PostStatsRecord, PostSummaryRecord,
    PurchaseRecord, SessionRecord,
};
use paywall_common::{
    model::{
        Id, ModelValidationError, PaywallSnowflake, PaywallSnowflakeGenerator,
        address::{TxHash, WalletAddress},
        auth::{AuthToken, AuthTokenHashError, LoginChallenge, Session, SessionMarker},
        comment::{Comment, CommentMarker, CreateComment},
        post::{CreatePost, EditPost, Post, PostMarker, PostStats, PostSummary},
        purchase::{CreatePurchase, Purchase},
    },
    snowflake::{ProcessId, WorkerId},
    util::PositiveDuration,
};
use sqlx::{PgPool, migrate::MigrateError, postgres::PgPoolOptions, query, query_as, query_scalar};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// SQLSTATE raised by `posts.delete_post` for posts that were bought.
const RESTRICT_VIOLATION: &str = "23001";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    TokenHash(#[from] AuthTokenHashError),
    #[error("The post has purchases and cannot be deleted")]
    PostHasPurchases,
}

impl From<sqlx::Error> for DbError {
    fn from(value: sqlx::Error) -> Self {
        match &value {
            sqlx::Error::Database(err) if err.code().as_deref() == Some(RESTRICT_VIOLATION) => {
                Self::PostHasPurchases
            }
            _ => Self::Sqlx(value),
        }
    }
}

pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<PaywallSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(PaywallSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self::new(pool, worker_id, process_id))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        info!("Database migrations are up to date");
        Ok(())
    }

    fn next_snowflake(&self) -> PaywallSnowflake {
        self.snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()
    }

    /// Newest first. `search` is an `ILIKE` pattern matched against title and
    /// description.
    pub async fn fetch_posts(&self, search: Option<&str>) -> Result<Vec<PostSummary>> {
        let records = query_as::<_, PostSummaryRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.author_address,
                posts.title,
                posts.description,
                posts.price,
                posts.created_at
            FROM
                posts.posts
            WHERE
                $1::TEXT IS NULL
                OR posts.title ILIKE $1
                OR posts.description ILIKE $1
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            ",
        )
        .bind(search)
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(PostSummary::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.author_address,
                posts.title,
                posts.description,
                posts.price,
                posts.created_at,
                posts.content
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $1
            ",
        )
        .bind(post_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// All posts by `author` with their sales, newest first.
    pub async fn fetch_author_stats(&self, author: WalletAddress) -> Result<Vec<PostStats>> {
        let records = query_as::<_, PostStatsRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.author_address,
                posts.title,
                posts.description,
                posts.price,
                posts.created_at,
                COUNT(purchases.purchase_snowflake) AS total_buyers
            FROM
                posts.posts
                LEFT JOIN posts.purchases
                    ON purchases.post_snowflake = posts.post_snowflake
            WHERE
                posts.author_address = $1
            GROUP BY
                posts.post_snowflake
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            ",
        )
        .bind(&author.as_bytes()[..])
        .fetch_all(&self.pool)
        .await?;

        let stats = records
            .into_iter()
            .map(PostStats::try_from)
            .collect::<Result<_, _>>()?;
        Ok(stats)
    }

    pub async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let post_snowflake = self.next_snowflake();

        let record = query_as::<_, PostRecord>(
            "
            INSERT INTO posts.posts
                (post_snowflake, author_address, title, description, content, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING
                post_snowflake,
                author_address,
                title,
                description,
                price,
                created_at,
                content
            ",
        )
        .bind(post_snowflake.get().cast_signed())
        .bind(&post.author.as_bytes()[..])
        .bind(&post.title)
        .bind(&post.description)
        .bind(&post.content)
        .bind(post.price.get())
        .fetch_one(&self.pool)
        .await?;

        let post = Post::try_from(record)?;
        debug!(post_id = %post.summary.id, author = %post.summary.author, "Created post");
        Ok(post)
    }

    /// Returns `None` if the post does not exist.
    pub async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        edit: &EditPost,
    ) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            UPDATE posts.posts
            SET
                title = $2,
                content = $3,
                price = $4
            WHERE
                posts.post_snowflake = $1
            RETURNING
                post_snowflake,
                author_address,
                title,
                description,
                price,
                created_at,
                content
            ",
        )
        .bind(post_id.as_db())
        .bind(&edit.title)
        .bind(&edit.content)
        .bind(edit.price.get())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        if post.is_some() {
            debug!(%post_id, "Updated post");
        }
        Ok(post)
    }

    /// Deletes a post with its comments. Returns whether the post existed.
    ///
    /// Fails with [`DbError::PostHasPurchases`] if anyone bought the post.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let deleted: bool = query_scalar("SELECT posts.delete_post($1)")
            .bind(post_id.as_db())
            .fetch_one(&self.pool)
            .await?;

        if deleted {
            debug!(%post_id, "Deleted post");
        }
        Ok(deleted)
    }

    /// Oldest first, ready for [`build_comment_tree`].
    ///
    /// [`build_comment_tree`]: paywall_common::model::comment::build_comment_tree
    pub async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records = query_as::<_, CommentRecord>(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.parent_snowflake,
                comments.author_address,
                comments.content,
                comments.created_at
            FROM
                posts.comments
            WHERE
                comments.post_snowflake = $1
            ORDER BY
                comments.created_at,
                comments.comment_snowflake
            ",
        )
        .bind(post_id.as_db())
        .fetch_all(&self.pool)
        .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }

    pub async fn fetch_comment(&self, comment_id: Id<CommentMarker>) -> Result<Option<Comment>> {
        let record = query_as::<_, CommentRecord>(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.parent_snowflake,
                comments.author_address,
                comments.content,
                comments.created_at
            FROM
                posts.comments
            WHERE
                comments.comment_snowflake = $1
            ",
        )
        .bind(comment_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let comment = record.map(Comment::try_from).transpose()?;
        Ok(comment)
    }

    /// How many ancestors the comment has, counting at most `limit` of them.
    /// `None` if the comment does not exist.
    pub async fn fetch_comment_depth(
        &self,
        comment_id: Id<CommentMarker>,
        limit: u32,
    ) -> Result<Option<u32>> {
        let depth: Option<i32> = query_scalar(
            "
            WITH RECURSIVE ancestors (parent_snowflake, depth) AS (
                SELECT
                    comments.parent_snowflake,
                    0
                FROM
                    posts.comments
                WHERE
                    comments.comment_snowflake = $1
                UNION ALL
                SELECT
                    comments.parent_snowflake,
                    ancestors.depth + 1
                FROM
                    ancestors
                    JOIN posts.comments
                        ON comments.comment_snowflake = ancestors.parent_snowflake
                WHERE
                    ancestors.depth < $2
            )
            SELECT MAX(ancestors.depth) FROM ancestors
            ",
        )
        .bind(comment_id.as_db())
        .bind(limit.cast_signed())
        .fetch_one(&self.pool)
        .await?;

        Ok(depth.map(i32::cast_unsigned))
    }

    pub async fn create_comment(&self, comment: &CreateComment) -> Result<Comment> {
        let comment_snowflake = self.next_snowflake();

        let record = query_as::<_, CommentRecord>(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, parent_snowflake, author_address, content)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                comment_snowflake,
                post_snowflake,
                parent_snowflake,
                author_address,
                content,
                created_at
            ",
        )
        .bind(comment_snowflake.get().cast_signed())
        .bind(comment.post_id.as_db())
        .bind(comment.parent_id.map(Id::as_db))
        .bind(&comment.author.as_bytes()[..])
        .bind(&comment.content)
        .fetch_one(&self.pool)
        .await?;

        let comment = Comment::try_from(record)?;
        debug!(comment_id = %comment.id, post_id = %comment.post_id, "Created comment");
        Ok(comment)
    }

    pub async fn has_purchase(
        &self,
        post_id: Id<PostMarker>,
        buyer: WalletAddress,
    ) -> Result<bool> {
        let exists: bool = query_scalar(
            "
            SELECT EXISTS (
                SELECT 1
                FROM posts.purchases
                WHERE
                    purchases.post_snowflake = $1
                    AND purchases.buyer_address = $2
            )
            ",
        )
        .bind(post_id.as_db())
        .bind(&buyer.as_bytes()[..])
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn tx_hash_used(&self, tx_hash: TxHash) -> Result<bool> {
        let exists: bool = query_scalar(
            "
            SELECT EXISTS (
                SELECT 1
                FROM posts.purchases
                WHERE purchases.tx_hash = $1
            )
            ",
        )
        .bind(&tx_hash.as_bytes()[..])
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Records a verified purchase. Returns `None` if the buyer already owns
    /// the post or the transaction already paid for something.
    pub async fn create_purchase(&self, purchase: &CreatePurchase) -> Result<Option<Purchase>> {
        let purchase_snowflake = self.next_snowflake();

        let record = query_as::<_, PurchaseRecord>(
            "
            INSERT INTO posts.purchases
                (purchase_snowflake, post_snowflake, buyer_address, tx_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING
                purchase_snowflake,
                post_snowflake,
                buyer_address,
                tx_hash,
                created_at
            ",
        )
        .bind(purchase_snowflake.get().cast_signed())
        .bind(purchase.post_id.as_db())
        .bind(&purchase.buyer.as_bytes()[..])
        .bind(&purchase.tx_hash.as_bytes()[..])
        .fetch_optional(&self.pool)
        .await?;

        let purchase = record.map(Purchase::try_from).transpose()?;
        if let Some(purchase) = &purchase {
            info!(
                purchase_id = %purchase.id,
                post_id = %purchase.post_id,
                buyer = %purchase.buyer,
                tx_hash = %purchase.tx_hash,
                "Recorded purchase"
            );
        }
        Ok(purchase)
    }

    /// Starts a session for `address` and returns the bearer token for it.
    /// The token itself is never stored.
    pub async fn create_session(
        &self,
        address: WalletAddress,
        expires_after: Option<PositiveDuration>,
    ) -> Result<(AuthToken, Session)> {
        let session_id = Id::new(self.next_snowflake());
        let token = AuthToken::generate_random(session_id);
        let token_hash = token.hash()?;

        let record = query_as::<_, SessionRecord>(
            "
            INSERT INTO auth.sessions
                (session_snowflake, address, token_hash, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            RETURNING
                session_snowflake,
                address,
                token_hash,
                created_at,
                expires_after_seconds
            ",
        )
        .bind(session_id.as_db())
        .bind(&address.as_bytes()[..])
        .bind(&token_hash.0[..])
        .bind(expires_after.map(|duration| duration.whole_seconds()))
        .fetch_one(&self.pool)
        .await?;

        let session = Session::try_from(record)?;
        debug!(%session_id, %address, "Created session");
        Ok((token, session))
    }

    pub async fn fetch_session(&self, session_id: Id<SessionMarker>) -> Result<Option<Session>> {
        let record = query_as::<_, SessionRecord>(
            "
            SELECT
                sessions.session_snowflake,
                sessions.address,
                sessions.token_hash,
                sessions.created_at,
                sessions.expires_after_seconds
            FROM
                auth.sessions
            WHERE
                sessions.session_snowflake = $1
            ",
        )
        .bind(session_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let session = record.map(Session::try_from).transpose()?;
        Ok(session)
    }

    pub async fn delete_session(&self, session_id: Id<SessionMarker>) -> Result<bool> {
        let result = query("DELETE FROM auth.sessions WHERE sessions.session_snowflake = $1")
            .bind(session_id.as_db())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores `challenge`, replacing any earlier one for the same address.
    pub async fn store_challenge(&self, challenge: &LoginChallenge) -> Result<()> {
        query(
            "
            INSERT INTO auth.challenges (address, message, expires_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&challenge.address.as_bytes()[..])
        .bind(&challenge.message)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes and returns the pending challenge issued to `address` with
    /// `message`, so each challenge can be answered at most once.
    pub async fn take_challenge(
        &self,
        address: WalletAddress,
        message: &str,
    ) -> Result<Option<LoginChallenge>> {
        let record = query_as::<_, ChallengeRecord>(
            "
            DELETE FROM auth.challenges
            WHERE
                challenges.message = $2
                AND challenges.address = $1
            RETURNING
                address,
                message,
                expires_at
            ",
        )
        .bind(&address.as_bytes()[..])
        .bind(message)
        .fetch_optional(&self.pool)
        .await?;

        let challenge = record.map(LoginChallenge::try_from).transpose()?;
        Ok(challenge)
    }

    /// Drops expired sessions and challenges. Returns how many rows went.
    pub async fn purge_expired(&self) -> Result<u64> {
        let sessions = query(
            "
            DELETE FROM auth.sessions
            WHERE
                sessions.created_at
                + sessions.expires_after_seconds * INTERVAL '1 second' <= now()
            ",
        )
        .execute(&self.pool)
        .await?;
        let challenges = query("DELETE FROM auth.challenges WHERE challenges.expires_at <= now()")
            .execute(&self.pool)
            .await?;

        let purged = sessions.rows_affected() + challenges.rows_affected();
        if purged > 0 {
            debug!(purged, "Purged expired sessions and challenges");
        }
        Ok(purged)
    }
}
