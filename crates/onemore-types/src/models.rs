use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anonymous user identifier issued by the backend.
pub type UserId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A shareable tally group. The owner never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner_user_id: UserId,
    pub name: String,
    pub invite_code: String,
    pub created_at: DateTime<Utc>,
}

/// One drinker slot within a session. A joining user may claim it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub display_name: String,
    pub claimed_by_user_id: Option<UserId>,
    /// Index into the card palette. Legacy rows may have none.
    pub color_index: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrinkCategory {
    Beer,
    Soft,
    Cocktail,
}

impl DrinkCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beer => "beer",
            Self::Soft => "soft",
            Self::Cocktail => "cocktail",
        }
    }
}

impl fmt::Display for DrinkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrinkCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beer" => Ok(Self::Beer),
            "soft" => Ok(Self::Soft),
            "cocktail" => Ok(Self::Cocktail),
            other => Err(format!("unknown drink category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkType {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub category: DrinkCategory,
    /// Price in cents.
    pub price_cents: i64,
    pub emoji: String,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

/// Signed step of a drink event. Serialized as `1` or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    pub fn value(self) -> i64 {
        match self {
            Self::Increment => 1,
            Self::Decrement => -1,
        }
    }
}

impl From<Delta> for i64 {
    fn from(delta: Delta) -> Self {
        delta.value()
    }
}

impl TryFrom<i64> for Delta {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Increment),
            -1 => Ok(Self::Decrement),
            other => Err(format!("delta must be 1 or -1, got {}", other)),
        }
    }
}

/// Append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub actor_user_id: UserId,
    pub target_participant_id: Uuid,
    pub drink_type_id: Uuid,
    pub delta: Delta,
    pub created_at: DateTime<Utc>,
}

// -- Inserts --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub owner_user_id: UserId,
    pub name: String,
    pub invite_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParticipant {
    pub session_id: Uuid,
    pub display_name: String,
    pub claimed_by_user_id: Option<UserId>,
    pub color_index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDrinkType {
    pub session_id: Uuid,
    pub name: String,
    pub category: DrinkCategory,
    pub price_cents: i64,
    pub emoji: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDrinkEvent {
    pub session_id: Uuid,
    pub actor_user_id: UserId,
    pub target_participant_id: Uuid,
    pub drink_type_id: Uuid,
    pub delta: Delta,
}

// -- Targeted updates --

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPatch {
    pub display_name: Option<String>,
    pub color_index: Option<u32>,
}

impl ParticipantPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.color_index.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinkTypePatch {
    pub name: Option<String>,
    pub emoji: Option<String>,
    pub price_cents: Option<i64>,
    pub category: Option<DrinkCategory>,
    pub sort_order: Option<i32>,
}

impl DrinkTypePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.emoji.is_none()
            && self.price_cents.is_none()
            && self.category.is_none()
            && self.sort_order.is_none()
    }
}

// -- Auth --

/// Result of anonymous sign-in: a stable user id plus the bearer token
/// that proves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub user_id: UserId,
    pub access_token: String,
}

/// Bearer token claims shared by the backend (issuing) and anything that
/// needs to inspect a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub anonymous: bool,
    pub exp: usize,
}
