//! Domain records shared by every store.

use crate::error::{MediaError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Scalar value held in metadata and custom-field maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Lossy conversion from arbitrary JSON; arrays, objects and null are rejected
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Integer)
                .or_else(|| n.as_f64().map(Scalar::Float)),
            serde_json::Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered key to scalar map (EXIF metadata, album custom fields)
pub type ScalarMap = BTreeMap<String, Scalar>;

/// Build a scalar map from a JSON column, dropping entries that are not scalars.
pub fn scalar_map_from_json(value: &serde_json::Value) -> ScalarMap {
    match value {
        serde_json::Value::Object(entries) => entries
            .iter()
            .filter_map(|(k, v)| Scalar::from_json(v).map(|s| (k.clone(), s)))
            .collect(),
        _ => ScalarMap::new(),
    }
}

/// Culling decision made on a photo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickRejectState {
    #[default]
    None,
    Pick,
    Reject,
}

impl PickRejectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickRejectState::None => "none",
            PickRejectState::Pick => "pick",
            PickRejectState::Reject => "reject",
        }
    }
}

impl FromStr for PickRejectState {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(PickRejectState::None),
            "pick" => Ok(PickRejectState::Pick),
            "reject" => Ok(PickRejectState::Reject),
            other => Err(MediaError::Validation(format!(
                "state must be 'none', 'pick', or 'reject', got '{}'",
                other
            ))),
        }
    }
}

/// Star rating in the inclusive range 0..=5
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct StarRating(u8);

impl StarRating {
    pub const MAX: u8 = 5;

    pub fn new(stars: i64) -> Result<Self> {
        if (0..=Self::MAX as i64).contains(&stars) {
            Ok(Self(stars as u8))
        } else {
            Err(MediaError::Validation(format!(
                "stars must be between 0 and {}, got {}",
                Self::MAX,
                stars
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for StarRating {
    type Error = MediaError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StarRating> for i64 {
    fn from(s: StarRating) -> Self {
        s.0 as i64
    }
}

/// A stored photo. Only created through ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: i64,
    pub album_id: i64,
    /// Filename as uploaded
    pub filename: String,
    pub title: Option<String>,
    /// Shared by the original and thumbnail objects
    pub blob_id: Uuid,
    pub thumbnail_blob_id: Option<Uuid>,
    pub content_type: String,
    pub size_bytes: i64,
    pub metadata: ScalarMap,
    pub state: PickRejectState,
    pub stars: StarRating,
    pub capture_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row values for a photo that has not been committed yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub album_id: i64,
    pub filename: String,
    pub blob_id: Uuid,
    pub thumbnail_blob_id: Option<Uuid>,
    pub content_type: String,
    pub size_bytes: i64,
    pub metadata: ScalarMap,
    pub capture_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: i64,
    /// Fixed at creation
    pub photographer_id: i64,
    pub title: String,
    pub date_taken: Option<NaiveDate>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub custom_fields: ScalarMap,
    pub thumbnail_photo_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read access for a non-owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumGrant {
    pub album_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub photo_id: i64,
    pub user_id: i64,
    pub parent_comment_id: Option<i64>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Photographer,
    Client,
}

impl FromStr for Role {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "photographer" => Ok(Role::Photographer),
            "client" => Ok(Role::Client),
            other => Err(MediaError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
