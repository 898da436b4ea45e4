use paywall_common::{
    model::{
        Id, ModelValidationError,
        address::{TxHash, WalletAddress},
        auth::{LoginChallenge, Session},
        comment::Comment,
        post::{Post, PostStats, PostSummary},
        price::Price,
        purchase::Purchase,
    },
    util::PositiveDuration,
};
use rust_decimal::Decimal;
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostSummaryRecord {
    pub post_snowflake: i64,
    pub author_address: Vec<u8>,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    #[sqlx(flatten)]
    pub summary: PostSummaryRecord,
    pub content: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostStatsRecord {
    #[sqlx(flatten)]
    pub summary: PostSummaryRecord,
    pub total_buyers: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub parent_snowflake: Option<i64>,
    pub author_address: Vec<u8>,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PurchaseRecord {
    pub purchase_snowflake: i64,
    pub post_snowflake: i64,
    pub buyer_address: Vec<u8>,
    pub tx_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct SessionRecord {
    pub session_snowflake: i64,
    pub address: Vec<u8>,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ChallengeRecord {
    pub address: Vec<u8>,
    pub message: String,
    pub expires_at: OffsetDateTime,
}

impl TryFrom<PostSummaryRecord> for PostSummary {
    type Error = ModelValidationError;

    fn try_from(value: PostSummaryRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: WalletAddress::try_from(value.author_address.as_slice())?,
            title: value.title,
            description: value.description,
            price: Price::new(value.price)?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            summary: value.summary.try_into()?,
            content: value.content,
        })
    }
}

impl TryFrom<PostStatsRecord> for PostStats {
    type Error = ModelValidationError;

    fn try_from(value: PostStatsRecord) -> Result<Self, Self::Error> {
        Ok(Self::new(
            value.summary.try_into()?,
            value.total_buyers.cast_unsigned(),
        ))
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            author: WalletAddress::try_from(value.author_address.as_slice())?,
            content: value.content,
            parent_id: value.parent_snowflake.map(Id::from_db),
            created_at: value.created_at,
        })
    }
}

impl TryFrom<PurchaseRecord> for Purchase {
    type Error = ModelValidationError;

    fn try_from(value: PurchaseRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.purchase_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            buyer: WalletAddress::try_from(value.buyer_address.as_slice())?,
            tx_hash: TxHash::try_from(value.tx_hash.as_slice())?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<SessionRecord> for Session {
    type Error = ModelValidationError;

    fn try_from(value: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.session_snowflake),
            address: WalletAddress::try_from(value.address.as_slice())?,
            token_hash: value.token_hash.into_boxed_slice().try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(PositiveDuration::from_seconds)
                .transpose()?,
        })
    }
}

impl TryFrom<ChallengeRecord> for LoginChallenge {
    type Error = ModelValidationError;

    fn try_from(value: ChallengeRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            address: WalletAddress::try_from(value.address.as_slice())?,
            message: value.message,
            expires_at: value.expires_at,
        })
    }
}
