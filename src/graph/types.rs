//! Core graph type definitions.
//!
//! Defines [`EntityType`] (the discriminator carried by every entity),
//! [`PrayerPoint`], [`PrayerTopic`], the denormalized [`JourneyEntry`], and
//! [`FieldUpdate`] for explicit partial updates.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// The two kinds of entity in the prayer graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Point,
    Topic,
}

impl EntityType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Topic => "topic",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "point" => Ok(Self::Point),
            "topic" => Ok(Self::Topic),
            _ => Err(GraphError::invalid(format!("unknown entity type: {s}"))),
        }
    }
}

/// An individual recorded prayer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrayerPoint {
    pub entity_type: EntityType,
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub recipients: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Topic ids this point belongs to. Never contains duplicates.
    pub linked_topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prayer_id: Option<String>,
}

impl PrayerPoint {
    /// The denormalized snapshot of this point stored in a topic's journey.
    pub fn journey_entry(&self) -> JourneyEntry {
        JourneyEntry {
            id: self.id.clone(),
            category: self.category.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            author: self.author_name.clone(),
            created_at: self.created_at.clone(),
            recipients: self.recipients.clone(),
        }
    }
}

/// A named grouping of related points with derived aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrayerTopic {
    pub entity_type: EntityType,
    pub id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: String,
    pub updated_at: String,
    /// One entry per linked point, newest first.
    pub journey: Vec<JourneyEntry>,
    /// The topic's own embedding, if it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_text: Option<String>,
    /// Mean of all contributing embeddings. Absent, never empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_embedding: Option<Vec<f32>>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_at: Option<String>,
    pub aggregate_dirty: bool,
}

/// Snapshot of a linked point, so a topic renders its history without
/// fetching every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub title: String,
    pub content: String,
    pub author: String,
    pub created_at: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// A single field of a partial update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Apply to an optional stored value.
    pub fn apply_to(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Unchanged => current,
            Self::Set(v) => Some(v),
            Self::Clear => None,
        }
    }
}

/// Current time in the fixed-width form used for every stored timestamp.
///
/// Microsecond precision and a `Z` suffix keep lexicographic order equal to
/// chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Normalize a caller-supplied RFC 3339 timestamp into the stored form.
pub fn normalize_timestamp(raw: &str) -> crate::error::Result<String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Micros, true)
        })
        .map_err(|e| GraphError::invalid(format!("invalid timestamp {raw:?}: {e}")))
}
