//! Append-only comment entries shared by records and sub-records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable comment. Lists of comments are kept newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub text: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl Comment {
    pub fn new(text: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at,
        }
    }
}

/// Prepends `comment` so the list stays newest-first.
pub(crate) fn push_newest_first(comments: &mut Vec<Comment>, comment: Comment) {
    comments.insert(0, comment);
}
