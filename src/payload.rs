//! Backend payload boundary.
//!
//! Realtime pushes and refetch responses arrive as loosely-typed JSON. They
//! are parsed into the tagged [`RemoteEvent`] and then validated into a
//! [`ValidatedEvent`] carrying domain values. Nothing unvalidated reaches a
//! store.
//!
//! Normalisation rules:
//! - ids are trimmed and must be non-empty
//! - negative counters are clamped to zero (the backend occasionally
//!   over-decrements)
//! - id lists drop blank entries and duplicates
//! - display names are trimmed and must be non-empty; a blank photo URL is `None`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stores::{IdSet, IdSetKind, LikeState, ProfileSnapshot};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Malformed payload: {0}")]
    Json(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, PayloadError>;

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteEvent {
    Like {
        #[serde(rename = "postId")]
        post_id: String,
        #[serde(rename = "isLiked")]
        is_liked: bool,
        likes: i64,
    },
    ReplyCount {
        #[serde(rename = "postId")]
        post_id: String,
        count: i64,
    },
    Blocked {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(default)]
        ids: Vec<String>,
    },
    Followed {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(default)]
        ids: Vec<String>,
    },
    Profile {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "displayName", default)]
        display_name: Option<String>,
        #[serde(rename = "photoURL", default)]
        photo_url: Option<String>,
    },
}

/// A backend event that passed validation, ready for [`crate::stores::Stores::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedEvent {
    Like { post_id: String, state: LikeState },
    ReplyCount { post_id: String, count: u64 },
    IdSet { kind: IdSetKind, owner: String, ids: IdSet },
    Profile { user_id: String, snapshot: ProfileSnapshot },
}

impl ValidatedEvent {
    /// The store key this event targets.
    pub fn key(&self) -> &str {
        match self {
            ValidatedEvent::Like { post_id, .. } | ValidatedEvent::ReplyCount { post_id, .. } => {
                post_id
            }
            ValidatedEvent::IdSet { owner, .. } => owner,
            ValidatedEvent::Profile { user_id, .. } => user_id,
        }
    }
}

fn require_id(field: &'static str, raw: &str) -> Result<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(PayloadError::InvalidField {
            field,
            reason: "empty id".to_string(),
        });
    }
    Ok(id.to_string())
}

fn clamp_count(value: i64) -> u64 {
    if value < 0 {
        log::debug!("payload: negative counter {} clamped to 0", value);
        0
    } else {
        value as u64
    }
}

fn normalise_ids(ids: Vec<String>) -> IdSet {
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

impl RemoteEvent {
    /// Parse and validate a JSON payload in one step.
    pub fn parse(json: &str) -> Result<ValidatedEvent> {
        let event: RemoteEvent =
            serde_json::from_str(json).map_err(|e| PayloadError::Json(e.to_string()))?;
        event.validate()
    }

    pub fn validate(self) -> Result<ValidatedEvent> {
        match self {
            RemoteEvent::Like {
                post_id,
                is_liked,
                likes,
            } => Ok(ValidatedEvent::Like {
                post_id: require_id("postId", &post_id)?,
                state: LikeState::new(is_liked, clamp_count(likes)),
            }),
            RemoteEvent::ReplyCount { post_id, count } => Ok(ValidatedEvent::ReplyCount {
                post_id: require_id("postId", &post_id)?,
                count: clamp_count(count),
            }),
            RemoteEvent::Blocked { user_id, ids } => Ok(ValidatedEvent::IdSet {
                kind: IdSetKind::Blocked,
                owner: require_id("userId", &user_id)?,
                ids: normalise_ids(ids),
            }),
            RemoteEvent::Followed { user_id, ids } => Ok(ValidatedEvent::IdSet {
                kind: IdSetKind::Followed,
                owner: require_id("userId", &user_id)?,
                ids: normalise_ids(ids),
            }),
            RemoteEvent::Profile {
                user_id,
                display_name,
                photo_url,
            } => {
                let user_id = require_id("userId", &user_id)?;
                let display_name = display_name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or(PayloadError::MissingField("displayName"))?;
                let photo_url = photo_url
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty());
                Ok(ValidatedEvent::Profile {
                    user_id,
                    snapshot: ProfileSnapshot::new(display_name, photo_url),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
