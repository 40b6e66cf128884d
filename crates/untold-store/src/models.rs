//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer; field names follow the camelCase convention of the public JSON API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The fixed set of story categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    Horror,
    Adult,
    Confession,
    Success,
    Travel,
    Funny,
    Mystery,
    Relationship,
    Life,
    Crime,
}

impl Category {
    /// The TEXT value stored in SQLite (same spelling as the JSON variant).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Horror => "Horror",
            Category::Adult => "Adult",
            Category::Confession => "Confession",
            Category::Success => "Success",
            Category::Travel => "Travel",
            Category::Funny => "Funny",
            Category::Mystery => "Mystery",
            Category::Relationship => "Relationship",
            Category::Life => "Life",
            Category::Crime => "Crime",
        }
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Horror" => Ok(Category::Horror),
            "Adult" => Ok(Category::Adult),
            "Confession" => Ok(Category::Confession),
            "Success" => Ok(Category::Success),
            "Travel" => Ok(Category::Travel),
            "Funny" => Ok(Category::Funny),
            "Mystery" => Ok(Category::Mystery),
            "Relationship" => Ok(Category::Relationship),
            "Life" => Ok(Category::Life),
            "Crime" => Ok(Category::Crime),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown category: {other}"
            ))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// A submitted story.
///
/// `likes` and `dislikes` are never stored: every read derives them from the
/// `reactions` table, so the counts can never drift from the membership sets.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Unique story identifier.
    pub id: Uuid,
    pub title: String,
    pub category: Category,
    pub content: String,
    pub tags: Vec<String>,
    /// Opaque upload references produced by the proof store.
    pub proofs: Vec<String>,
    /// Derived: number of users currently in the liked set.
    pub likes: u64,
    /// Derived: number of users currently in the disliked set.
    pub dislikes: u64,
    /// Monotonic view counter, incremented atomically in place.
    pub views: u64,
    /// Moderation flag; hidden stories are excluded from public listings.
    pub hidden: bool,
    pub anonymous: bool,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the client when submitting a story.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStory {
    pub title: String,
    pub category: Category,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub anonymous: bool,
    pub author: Option<String>,
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Which membership set a reaction row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
        }
    }
}

/// The full reaction state of one story after a toggle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionTally {
    pub likes: u64,
    pub dislikes: u64,
    pub liked_by: Vec<String>,
    pub disliked_by: Vec<String>,
}

// ---------------------------------------------------------------------------
// Reports & comments
// ---------------------------------------------------------------------------

/// A single moderation report.  Reports are advisory and append-only; the
/// same user may report the same story any number of times.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub reason: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// A story together with its report sequence, for the moderation queue.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedStory {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub reports: Vec<Report>,
}

/// A comment on a story.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub text: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A registered account.
///
/// `password_hash` and the OTP fields never leave the backend; they are
/// skipped during serialization.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub otp: Option<String>,
    #[serde(skip_serializing)]
    pub otp_expires: Option<DateTime<Utc>>,
    pub verified: bool,
    #[serde(rename = "twoFA")]
    pub two_fa: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// A signup waiting for its OTP to be verified.  Keyed by email so that a
/// re-request simply replaces the previous code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignup {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub otp: String,
    pub otp_expires: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

/// Sort orders accepted by the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Latest,
    Views,
    Likes,
}

impl FromStr for SortKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(SortKey::Latest),
            "views" => Ok(SortKey::Views),
            "likes" => Ok(SortKey::Likes),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown sort key: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for name in [
            "Horror",
            "Adult",
            "Confession",
            "Success",
            "Travel",
            "Funny",
            "Mystery",
            "Relationship",
            "Life",
            "Crime",
        ] {
            let cat: Category = name.parse().unwrap();
            assert_eq!(cat.as_str(), name);
        }
    }

    #[test]
    fn category_rejects_unknown() {
        assert!("Poetry".parse::<Category>().is_err());
    }

    #[test]
    fn user_serialization_hides_secrets() {
        let user = User {
            id: Uuid::new_v4(),
            name: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$...".into(),
            otp: Some("123456".into()),
            otp_expires: Some(Utc::now()),
            verified: true,
            two_fa: false,
            is_admin: false,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("123456"));
        assert!(json.contains("alice@example.com"));
    }
}
