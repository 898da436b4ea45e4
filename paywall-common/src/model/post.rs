use crate::model::{
    Id,
    address::WalletAddress,
    form::{FormErrors, check_length},
    price::{self, Price},
    purchase,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const TITLE_MIN_LEN: usize = 5;
pub const TITLE_MAX_LEN: usize = 200;
pub const DESCRIPTION_MIN_LEN: usize = 10;
pub const DESCRIPTION_MAX_LEN: usize = 1_000;
pub const CONTENT_MIN_LEN: usize = 20;
pub const EDITED_CONTENT_MIN_LEN: usize = 10;
pub const CONTENT_MAX_LEN: usize = 200_000;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// Everything about a post except its (possibly premium) content.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PostSummary {
    pub id: Id<PostMarker>,
    pub author: WalletAddress,
    pub title: String,
    pub description: String,
    pub price: Price,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Post {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub content: String,
}

/// A post as shown to one particular viewer.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct GatedPost {
    #[serde(flatten)]
    pub summary: PostSummary,
    /// `None` while the viewer has not unlocked the post.
    pub content: Option<String>,
    pub unlocked: bool,
    pub is_author: bool,
}

impl Post {
    /// Applies the purchase gate for `viewer`; see [`purchase::can_view`].
    #[must_use]
    pub fn gate(self, viewer: Option<WalletAddress>, has_purchase: bool) -> GatedPost {
        let unlocked = purchase::can_view(&self.summary, viewer, has_purchase);
        let is_author = viewer == Some(self.summary.author);

        GatedPost {
            summary: self.summary,
            content: unlocked.then_some(self.content),
            unlocked,
            is_author,
        }
    }
}

/// An author's post together with its sales.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PostStats {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub total_buyers: u64,
    #[serde(serialize_with = "price::serialize_decimal")]
    pub total_revenue: Decimal,
    /// Posts that sold at least once cannot be deleted.
    pub deletable: bool,
}

impl PostStats {
    #[must_use]
    pub fn new(summary: PostSummary, total_buyers: u64) -> Self {
        let total_revenue = summary.price.revenue(total_buyers);
        Self {
            summary,
            total_buyers,
            total_revenue,
            deletable: total_buyers == 0,
        }
    }
}

/// The create-post form as submitted.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct CreatePostForm {
    pub title: String,
    pub description: String,
    pub content: String,
    #[serde(deserialize_with = "price::deserialize_decimal")]
    pub price: Decimal,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub author: WalletAddress,
    pub title: String,
    pub description: String,
    pub content: String,
    pub price: Price,
}

impl CreatePostForm {
    pub fn validate(self, author: WalletAddress) -> Result<CreatePost, FormErrors> {
        let mut errors = FormErrors::default();

        check_length(
            &mut errors,
            "title",
            "Title",
            &self.title,
            TITLE_MIN_LEN,
            TITLE_MAX_LEN,
        );
        check_length(
            &mut errors,
            "description",
            "Description",
            &self.description,
            DESCRIPTION_MIN_LEN,
            DESCRIPTION_MAX_LEN,
        );
        check_length(
            &mut errors,
            "content",
            "Content",
            &self.content,
            CONTENT_MIN_LEN,
            CONTENT_MAX_LEN,
        );
        let price = validate_price(&mut errors, self.price);

        errors.into_result(())?;
        Ok(CreatePost {
            author,
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            content: self.content,
            price: price.unwrap_or_default(),
        })
    }
}

/// The edit-post form. The description is fixed once published.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct EditPostForm {
    pub title: String,
    pub content: String,
    #[serde(deserialize_with = "price::deserialize_decimal")]
    pub price: Decimal,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct EditPost {
    pub title: String,
    pub content: String,
    pub price: Price,
}

impl EditPostForm {
    pub fn validate(self) -> Result<EditPost, FormErrors> {
        let mut errors = FormErrors::default();

        check_length(
            &mut errors,
            "title",
            "Title",
            &self.title,
            TITLE_MIN_LEN,
            TITLE_MAX_LEN,
        );
        check_length(
            &mut errors,
            "content",
            "Content",
            &self.content,
            EDITED_CONTENT_MIN_LEN,
            CONTENT_MAX_LEN,
        );
        let price = validate_price(&mut errors, self.price);

        errors.into_result(())?;
        Ok(EditPost {
            title: self.title.trim().to_owned(),
            content: self.content,
            price: price.unwrap_or_default(),
        })
    }
}

fn validate_price(errors: &mut FormErrors, amount: Decimal) -> Option<Price> {
    Price::new(amount)
        .map_err(|err| {
            errors.add("price", err.to_string());
        })
        .ok()
}

/// Builds an `ILIKE` pattern matching `term` anywhere, or `None` for a blank
/// search. `%`, `_` and `\` in the term match literally.
#[must_use]
pub fn search_pattern(term: &str) -> Option<String> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }

    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::model::{
        Id,
        address::WalletAddress,
        post::{CreatePostForm, EditPostForm, Post, PostStats, PostSummary, search_pattern},
        price::Price,
    };
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use time::macros::datetime;

    pub(crate) fn address(last_byte: u8) -> WalletAddress {
        let mut bytes = [0x11; 20];
        bytes[19] = last_byte;
        WalletAddress::new(bytes)
    }

    pub(crate) fn post(author: WalletAddress, price: &str) -> Post {
        Post {
            summary: PostSummary {
                id: Id::from(42),
                author,
                title: "Getting Started".to_owned(),
                description: "A beginner-friendly guide to the ecosystem.".to_owned(),
                price: Price::from_str(price).unwrap(),
                created_at: datetime!(2025-06-01 12:00 UTC),
            },
            content: "The full premium article body.".to_owned(),
        }
    }

    #[test]
    fn author_sees_content_without_purchase() {
        let author = address(1);
        let gated = post(author, "0.01").gate(Some(author), false);

        assert!(gated.unlocked);
        assert!(gated.is_author);
        assert_eq!(
            gated.content.as_deref(),
            Some("The full premium article body.")
        );
    }

    #[test]
    fn buyer_sees_content_stranger_sees_description() {
        let author = address(1);
        let reader = address(2);

        let bought = post(author, "0.01").gate(Some(reader), true);
        assert!(bought.unlocked);
        assert!(!bought.is_author);

        let not_bought = post(author, "0.01").gate(Some(reader), false);
        assert!(!not_bought.unlocked);
        assert_eq!(not_bought.content, None);
        assert_eq!(
            not_bought.summary.description,
            "A beginner-friendly guide to the ecosystem."
        );

        let anonymous = post(author, "0.01").gate(None, false);
        assert!(!anonymous.unlocked);
    }

    #[test]
    fn gated_json_omits_nothing_but_content() {
        let gated = post(address(1), "0.01").gate(None, false);
        let json = serde_json::to_value(&gated).unwrap();

        assert_eq!(json["id"], "42");
        assert_eq!(json["price"], "0.01");
        assert_eq!(json["content"], serde_json::Value::Null);
        assert_eq!(json["unlocked"], false);
        assert_eq!(json["created_at"], "2025-06-01T12:00:00Z");
    }

    #[test]
    fn create_form_reports_every_invalid_field() {
        let form = CreatePostForm {
            title: "Hey".to_owned(),
            description: "short".to_owned(),
            content: "tiny".to_owned(),
            price: Decimal::from(-1),
        };

        let errors = form.validate(address(1)).unwrap_err();
        assert_eq!(
            errors.get("title"),
            Some("Title must be at least 5 characters long.")
        );
        assert_eq!(
            errors.get("description"),
            Some("Description must be at least 10 characters long.")
        );
        assert_eq!(
            errors.get("content"),
            Some("Content must be at least 20 characters long.")
        );
        assert!(errors.get("price").is_some());
    }

    #[test]
    fn create_form_trims_title_and_description() {
        let form = CreatePostForm {
            title: "  Getting Started  ".to_owned(),
            description: " A beginner-friendly guide. ".to_owned(),
            content: "# Heading\n\nTwenty or more characters.".to_owned(),
            price: Decimal::from_str("0.010").unwrap(),
        };

        let post = form.validate(address(1)).unwrap();
        assert_eq!(post.title, "Getting Started");
        assert_eq!(post.description, "A beginner-friendly guide.");
        assert_eq!(post.price, Price::from_str("0.01").unwrap());
        assert_eq!(post.author, address(1));
    }

    #[test]
    fn edit_form_uses_shorter_content_minimum() {
        let form = EditPostForm {
            title: "Updated title".to_owned(),
            content: "Ten chars!".to_owned(),
            price: Decimal::ZERO,
        };
        let edit = form.validate().unwrap();
        assert!(edit.price.is_free());
    }

    #[test]
    fn stats_compute_revenue() {
        let stats = PostStats::new(post(address(1), "0.01").summary, 4);
        assert_eq!(stats.total_revenue, Decimal::from_str("0.04").unwrap());
        assert!(!stats.deletable);
        assert!(PostStats::new(post(address(1), "0.01").summary, 0).deletable);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_revenue"], "0.04");
        assert_eq!(json["total_buyers"], 4);
        assert_eq!(json["deletable"], false);
    }

    #[test]
    fn search_pattern_escapes_wildcards() {
        assert_eq!(search_pattern("  citrea "), Some("%citrea%".to_owned()));
        assert_eq!(search_pattern("100%_off"), Some(r"%100\%\_off%".to_owned()));
        assert_eq!(search_pattern(r"a\b"), Some(r"%a\\b%".to_owned()));
        assert_eq!(search_pattern("   "), None);
    }
}
