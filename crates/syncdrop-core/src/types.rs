//! Core types for SyncDrop

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::SyncError;

/// Unique identifier for a drop
///
/// Assigned by the producer before the drop reaches the store, so creating
/// the same drop twice overwrites rather than duplicates. Freshly minted ids
/// are ULIDs; ids arriving from the remote table are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropId(String);

impl DropId {
    /// Mint a new time-ordered id
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap an existing id
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DropId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification tag of a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropType {
    Text,
    Url,
    Snippet,
    Image,
    Video,
    Document,
}

impl DropType {
    pub const ALL: [DropType; 6] = [
        DropType::Text,
        DropType::Url,
        DropType::Snippet,
        DropType::Image,
        DropType::Video,
        DropType::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropType::Text => "text",
            DropType::Url => "url",
            DropType::Snippet => "snippet",
            DropType::Image => "image",
            DropType::Video => "video",
            DropType::Document => "document",
        }
    }

    /// Collection a file upload of this type lands in, if the type is a
    /// file type.
    pub fn file_collection(&self) -> Option<CollectionId> {
        match self {
            DropType::Image => Some(CollectionId::Images),
            DropType::Video => Some(CollectionId::Videos),
            DropType::Document => Some(CollectionId::Documents),
            DropType::Text | DropType::Url | DropType::Snippet => None,
        }
    }
}

impl fmt::Display for DropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DropType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::UnknownDropType(s.to_string()))
    }
}

/// One of the fixed, named collections a drop can be stored in
///
/// `all` and `trash` are view filters, not collections, and cannot be
/// parsed into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionId {
    Inbox,
    Work,
    Personal,
    Links,
    Code,
    Images,
    Videos,
    Documents,
}

impl CollectionId {
    pub const ALL: [CollectionId; 8] = [
        CollectionId::Inbox,
        CollectionId::Work,
        CollectionId::Personal,
        CollectionId::Links,
        CollectionId::Code,
        CollectionId::Images,
        CollectionId::Videos,
        CollectionId::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionId::Inbox => "inbox",
            CollectionId::Work => "work",
            CollectionId::Personal => "personal",
            CollectionId::Links => "links",
            CollectionId::Code => "code",
            CollectionId::Images => "images",
            CollectionId::Videos => "videos",
            CollectionId::Documents => "documents",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            CollectionId::Inbox => "Inbox",
            CollectionId::Work => "Work",
            CollectionId::Personal => "Personal",
            CollectionId::Links => "Links",
            CollectionId::Code => "Code",
            CollectionId::Images => "Images",
            CollectionId::Videos => "Videos",
            CollectionId::Documents => "Documents",
        }
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        CollectionId::Inbox
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionId::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SyncError::UnknownCollection(s.to_string()))
    }
}

/// Type-dependent side record; never required for sync correctness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One stored clipboard entry
///
/// A drop is active while `deleted_at` is `None` and in the trash once the
/// tombstone is set. Only [`crate::SyncDrop::permanently_delete`] removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drop {
    pub id: DropId,
    /// Raw payload: text, URL, code, or a data URI for binary media
    pub content: String,
    #[serde(rename = "type")]
    pub drop_type: DropType,
    pub collection_id: CollectionId,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DropMetadata>,
    /// Tombstone, epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    /// Originating device (remote only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_device_id: Option<String>,
    /// Owning principal (remote only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Drop {
    /// Create a new active drop stamped with the current time
    pub fn new(content: impl Into<String>, drop_type: DropType, collection_id: CollectionId) -> Self {
        Self {
            id: DropId::new(),
            content: content.into(),
            drop_type,
            collection_id,
            tags: Vec::new(),
            created_at: now_millis(),
            metadata: None,
            deleted_at: None,
            source_device_id: None,
            owner_id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: DropMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Collection part of a view: a real collection, or one of the `all`/`trash`
/// pseudo-filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionFilter {
    /// Every active drop
    All,
    /// Every trashed drop, regardless of collection
    Trash,
    /// Active drops of one collection
    Collection(CollectionId),
}

impl CollectionFilter {
    /// Whether this view shows the trash partition
    pub fn trashed(&self) -> bool {
        matches!(self, CollectionFilter::Trash)
    }

    /// Collection predicate, if any
    pub fn collection(&self) -> Option<CollectionId> {
        match self {
            CollectionFilter::Collection(c) => Some(*c),
            CollectionFilter::All | CollectionFilter::Trash => None,
        }
    }

    pub fn matches(&self, drop: &Drop) -> bool {
        if drop.is_trashed() != self.trashed() {
            return false;
        }
        self.collection()
            .map_or(true, |collection| drop.collection_id == collection)
    }
}

impl Default for CollectionFilter {
    fn default() -> Self {
        CollectionFilter::Collection(CollectionId::Inbox)
    }
}

impl From<CollectionId> for CollectionFilter {
    fn from(c: CollectionId) -> Self {
        CollectionFilter::Collection(c)
    }
}

impl fmt::Display for CollectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionFilter::All => f.write_str("all"),
            CollectionFilter::Trash => f.write_str("trash"),
            CollectionFilter::Collection(c) => c.fmt(f),
        }
    }
}

impl FromStr for CollectionFilter {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CollectionFilter::All),
            "trash" => Ok(CollectionFilter::Trash),
            other => other.parse().map(CollectionFilter::Collection),
        }
    }
}

/// What one subscriber is looking at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub collection: CollectionFilter,
    /// Case-insensitive search over content, tags and title
    pub query: Option<String>,
}

impl ViewFilter {
    pub fn new(collection: CollectionFilter) -> Self {
        Self {
            collection,
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = if query.trim().is_empty() {
            None
        } else {
            Some(query)
        };
        self
    }

    pub fn matches(&self, drop: &Drop) -> bool {
        self.collection.matches(drop) && self.matches_query(drop)
    }

    fn matches_query(&self, drop: &Drop) -> bool {
        let Some(query) = &self.query else {
            return true;
        };
        let needle = query.to_lowercase();
        drop.content.to_lowercase().contains(&needle)
            || drop.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            || drop
                .metadata
                .as_ref()
                .and_then(|m| m.title.as_ref())
                .is_some_and(|t| t.to_lowercase().contains(&needle))
    }

    /// Filter and order a raw record set for this view
    pub fn resolve(&self, drops: impl IntoIterator<Item = Drop>) -> Vec<Drop> {
        let mut out: Vec<Drop> = drops.into_iter().filter(|d| self.matches(d)).collect();
        sort_newest_first(&mut out);
        out
    }
}

impl From<CollectionFilter> for ViewFilter {
    fn from(collection: CollectionFilter) -> Self {
        Self::new(collection)
    }
}

impl From<CollectionId> for ViewFilter {
    fn from(c: CollectionId) -> Self {
        Self::new(CollectionFilter::Collection(c))
    }
}

/// Order drops newest first. Stable, so ties keep their input order.
pub fn sort_newest_first(drops: &mut [Drop]) {
    drops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
