use crate::model::{
    Id,
    address::{TxHash, WalletAddress},
    post::{PostMarker, PostSummary},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PurchaseMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Purchase {
    pub id: Id<PurchaseMarker>,
    pub post_id: Id<PostMarker>,
    pub buyer: WalletAddress,
    pub tx_hash: TxHash,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePurchase {
    pub post_id: Id<PostMarker>,
    pub buyer: WalletAddress,
    pub tx_hash: TxHash,
}

/// Body of a buy request: the hash of the transfer the wallet already sent.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct PurchaseRequest {
    pub tx_hash: TxHash,
}

/// Whether `viewer` may read the full content of a post.
///
/// The author always may, as may anyone holding a purchase for it. Free
/// posts are open to everybody, including viewers without a session.
#[must_use]
pub fn can_view(post: &PostSummary, viewer: Option<WalletAddress>, has_purchase: bool) -> bool {
    post.price.is_free() || viewer == Some(post.author) || (viewer.is_some() && has_purchase)
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum PurchaseRefusal {
    #[error("Authors cannot buy their own posts")]
    OwnPost,
    #[error("The post is free")]
    FreePost,
    #[error("The post was already purchased")]
    AlreadyPurchased,
}

/// Checks that buying makes sense before any payment is looked at.
pub fn check_purchase(
    post: &PostSummary,
    buyer: WalletAddress,
    has_purchase: bool,
) -> Result<(), PurchaseRefusal> {
    if post.author == buyer {
        Err(PurchaseRefusal::OwnPost)
    } else if post.price.is_free() {
        Err(PurchaseRefusal::FreePost)
    } else if has_purchase {
        Err(PurchaseRefusal::AlreadyPurchased)
    } else {
        Ok(())
    }
}

/// A native-asset transfer as observed on chain after it was mined.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct ObservedTransfer {
    pub tx_hash: TxHash,
    pub from: WalletAddress,
    /// `None` for contract creations.
    pub to: Option<WalletAddress>,
    pub value_wei: u128,
    pub succeeded: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum PaymentMismatch {
    #[error("Transaction {0} was reverted")]
    Reverted(TxHash),
    #[error("Transaction was sent by {actual}, expected {expected}")]
    WrongSender {
        expected: WalletAddress,
        actual: WalletAddress,
    },
    #[error("Transaction pays {actual:?}, expected {expected}")]
    WrongRecipient {
        expected: WalletAddress,
        actual: Option<WalletAddress>,
    },
    #[error("Transaction transfers {actual} wei, expected at least {expected}")]
    InsufficientValue { expected: u128, actual: u128 },
}

/// Checks that `transfer` pays for `post` on behalf of `buyer`.
pub fn verify_payment(
    post: &PostSummary,
    buyer: WalletAddress,
    transfer: &ObservedTransfer,
) -> Result<(), PaymentMismatch> {
    if !transfer.succeeded {
        return Err(PaymentMismatch::Reverted(transfer.tx_hash));
    }
    if transfer.from != buyer {
        return Err(PaymentMismatch::WrongSender {
            expected: buyer,
            actual: transfer.from,
        });
    }
    if transfer.to != Some(post.author) {
        return Err(PaymentMismatch::WrongRecipient {
            expected: post.author,
            actual: transfer.to,
        });
    }

    let expected = post.price.wei();
    if transfer.value_wei < expected {
        return Err(PaymentMismatch::InsufficientValue {
            expected,
            actual: transfer.value_wei,
        });
    }

    Ok(())
}
