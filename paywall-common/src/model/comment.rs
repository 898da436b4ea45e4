use crate::model::{
    Id,
    address::WalletAddress,
    form::{FormErrors, check_length},
    post::PostMarker,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

pub const COMMENT_MIN_LEN: usize = 1;
pub const COMMENT_MAX_LEN: usize = 10_000;
/// Top level comments sit at depth 0.
pub const MAX_REPLY_DEPTH: u32 = 256;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: WalletAddress,
    pub content: String,
    pub parent_id: Option<Id<CommentMarker>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A comment with its replies, oldest first.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentThread>,
}

impl Drop for CommentThread {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut thread) = pending.pop() {
            pending.append(&mut thread.replies);
        }
    }
}

/// Reassembles a flat, chronologically ordered list of comments into threads.
///
/// Sibling order follows the input order. A comment whose parent is not part
/// of `comments` is dropped together with everything below it. Comments
/// forming a parent cycle never reach a root and are dropped as well.
/// Replies nested deeper than [`MAX_REPLY_DEPTH`] are cut off.
///
/// The tree is built without recursion.
#[must_use]
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<CommentThread> {
    let mut positions = HashMap::with_capacity(comments.len());
    for (index, comment) in comments.iter().enumerate() {
        positions.entry(comment.id).or_insert(index);
    }

    let mut roots = Vec::new();
    let mut children = vec![Vec::new(); comments.len()];
    for (index, comment) in comments.iter().enumerate() {
        match comment.parent_id {
            None => roots.push(index),
            Some(parent_id) => {
                if let Some(&parent) = positions.get(&parent_id) {
                    children[parent].push(index);
                }
            }
        }
    }

    let mut pending: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentThread>> = (0..pending.len()).map(|_| None).collect();

    // Post-order walk: a node is assembled once all of its replies are.
    let mut stack: Vec<(usize, u32, bool)> =
        roots.iter().rev().map(|&root| (root, 0, false)).collect();
    while let Some((index, depth, replies_built)) = stack.pop() {
        if replies_built {
            let replies = children[index]
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            if let Some(comment) = pending[index].take() {
                built[index] = Some(CommentThread { comment, replies });
            }
        } else {
            stack.push((index, depth, true));
            if depth < MAX_REPLY_DEPTH {
                stack.extend(
                    children[index]
                        .iter()
                        .rev()
                        .map(|&child| (child, depth + 1, false)),
                );
            }
        }
    }

    roots
        .into_iter()
        .filter_map(|root| built[root].take())
        .collect()
}

/// Rejects a reply to a comment sitting at `parent_depth`.
pub fn check_reply_depth(parent_depth: u32) -> Result<(), FormErrors> {
    let mut errors = FormErrors::default();
    if parent_depth >= MAX_REPLY_DEPTH {
        errors.add(
            "parent_id",
            format!("Replies can be nested at most {MAX_REPLY_DEPTH} levels deep."),
        );
    }
    errors.into_result(())
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct CreateCommentForm {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Id<CommentMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateComment {
    pub post_id: Id<PostMarker>,
    pub author: WalletAddress,
    pub content: String,
    pub parent_id: Option<Id<CommentMarker>>,
}

impl CreateCommentForm {
    pub fn validate(
        self,
        post_id: Id<PostMarker>,
        author: WalletAddress,
    ) -> Result<CreateComment, FormErrors> {
        let mut errors = FormErrors::default();
        check_length(
            &mut errors,
            "content",
            "Comment",
            &self.content,
            COMMENT_MIN_LEN,
            COMMENT_MAX_LEN,
        );
        errors.into_result(())?;

        Ok(CreateComment {
            post_id,
            author,
            content: self.content.trim().to_owned(),
            parent_id: self.parent_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        address::WalletAddress,
        comment::{
            Comment, CommentThread, CreateCommentForm, MAX_REPLY_DEPTH, build_comment_tree,
            check_reply_depth,
        },
    };
    use std::thread;
    use time::{Duration, macros::datetime};

    fn comment(id: u64, parent: Option<u64>) -> Comment {
        Comment {
            id: Id::from(id),
            post_id: Id::from(1),
            author: WalletAddress::new([7; 20]),
            content: format!("comment {id}"),
            parent_id: parent.map(Id::from),
            created_at: datetime!(2025-06-01 12:00 UTC) + Duration::minutes(id.cast_signed()),
        }
    }

    fn shape(threads: &[CommentThread]) -> Vec<(u64, Vec<u64>)> {
        threads
            .iter()
            .map(|thread| {
                (
                    thread.comment.id.into(),
                    thread
                        .replies
                        .iter()
                        .map(|reply| reply.comment.id.into())
                        .collect(),
                )
            })
            .collect()
    }

    fn count(threads: &[CommentThread]) -> usize {
        threads
            .iter()
            .map(|thread| 1 + count(&thread.replies))
            .sum()
    }

    #[test]
    fn flat_comments_stay_in_order() {
        let tree = build_comment_tree(vec![comment(1, None), comment(2, None), comment(3, None)]);
        assert_eq!(shape(&tree), vec![(1, vec![]), (2, vec![]), (3, vec![])]);
    }

    #[test]
    fn replies_nest_under_parents_in_order() {
        let tree = build_comment_tree(vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, None),
            comment(4, Some(1)),
            comment(5, Some(2)),
            comment(6, Some(3)),
        ]);

        assert_eq!(shape(&tree), vec![(1, vec![2, 4]), (3, vec![6])]);
        assert_eq!(shape(&tree[0].replies), vec![(2, vec![5]), (4, vec![])]);
        assert_eq!(count(&tree), 6);
    }

    #[test]
    fn orphans_and_their_replies_are_dropped() {
        let tree = build_comment_tree(vec![
            comment(1, None),
            comment(2, Some(99)),
            comment(3, Some(2)),
            comment(4, Some(1)),
        ]);

        assert_eq!(shape(&tree), vec![(1, vec![4])]);
        assert_eq!(count(&tree), 2);
    }

    #[test]
    fn cycles_are_dropped() {
        let tree = build_comment_tree(vec![
            comment(1, Some(2)),
            comment(2, Some(1)),
            comment(3, Some(3)),
            comment(4, None),
        ]);

        assert_eq!(shape(&tree), vec![(4, vec![])]);
    }

    fn chain(len: u64) -> Vec<Comment> {
        (1..=len)
            .map(|id| comment(id, (id > 1).then(|| id - 1)))
            .collect()
    }

    fn depth_of(tree: &[CommentThread]) -> u64 {
        let mut depth = 0;
        let mut level = tree;
        while let Some(thread) = level.first() {
            depth += 1;
            level = &thread.replies;
        }
        depth
    }

    #[test]
    fn replies_beyond_the_maximum_depth_are_cut() {
        let tree = build_comment_tree(chain(100_000));

        assert_eq!(tree.len(), 1);
        assert_eq!(depth_of(&tree), u64::from(MAX_REPLY_DEPTH) + 1);
    }

    #[test]
    fn deepest_allowed_chain_serializes_on_a_small_stack() {
        let len = u64::from(MAX_REPLY_DEPTH) + 1;

        let json = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let tree = build_comment_tree(chain(len));
                assert_eq!(depth_of(&tree), len);
                serde_json::to_vec(&tree).unwrap()
            })
            .unwrap()
            .join()
            .unwrap();

        assert!(!json.is_empty());
    }

    #[test]
    fn dropping_a_deep_thread_does_not_recurse() {
        thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let mut nested = CommentThread {
                    comment: comment(0, None),
                    replies: Vec::new(),
                };
                for id in 1..200_000 {
                    nested = CommentThread {
                        comment: comment(id, None),
                        replies: vec![nested],
                    };
                }
                drop(nested);
            })
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn reply_depth_limit() {
        assert!(check_reply_depth(0).is_ok());
        assert!(check_reply_depth(MAX_REPLY_DEPTH - 1).is_ok());

        let errors = check_reply_depth(MAX_REPLY_DEPTH).unwrap_err();
        assert!(errors.get("parent_id").is_some());
    }

    #[test]
    fn reply_json_shape() {
        let tree = build_comment_tree(vec![comment(1, None), comment(2, Some(1))]);
        let json = serde_json::to_value(&tree).unwrap();

        assert_eq!(json[0]["id"], "1");
        assert_eq!(json[0]["parent_id"], serde_json::Value::Null);
        assert_eq!(json[0]["replies"][0]["parent_id"], "1");
        assert_eq!(json[0]["replies"][0]["replies"], serde_json::json!([]));
    }

    #[test]
    fn blank_comments_are_rejected() {
        let form = CreateCommentForm {
            content: "   \n ".to_owned(),
            parent_id: None,
        };
        let errors = form
            .validate(Id::from(1), WalletAddress::new([1; 20]))
            .unwrap_err();
        assert!(errors.get("content").is_some());

        let form = CreateCommentForm {
            content: " Great introduction! ".to_owned(),
            parent_id: Some(Id::from(5)),
        };
        let comment = form
            .validate(Id::from(1), WalletAddress::new([1; 20]))
            .unwrap();
        assert_eq!(comment.content, "Great introduction!");
        assert_eq!(comment.parent_id, Some(Id::from(5)));
    }
}
