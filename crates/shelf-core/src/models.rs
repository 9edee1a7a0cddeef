//! Data models for Shelf
//!
//! Defines the core data structures: Tag, Resource, and Tombstone.
//! Tags and resources are many-to-many; the membership set is owned by the
//! resource side (a tag's `resources` list is hydrated on read and ignored
//! when a tag arrives from a remote replica).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of a stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tag,
    Resource,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tag => "tag",
            EntityKind::Resource => "resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tag" => Some(EntityKind::Tag),
            "resource" => Some(EntityKind::Resource),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time at millisecond precision
///
/// Timestamps are persisted as integer milliseconds, so models must never
/// carry sub-millisecond precision: a value that loses precision on its way
/// through storage would compare differently before and after the round
/// trip, and last-writer-wins resolution compares both kinds.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Produce the next `last_modified` value after a mutation
///
/// Invariant: the returned timestamp is strictly greater than `prev`, even
/// when the wall clock has not advanced past it (coarse clocks, same-millisecond
/// mutations). Last-writer-wins conflict resolution depends on this.
pub fn next_timestamp(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > prev {
        now
    } else {
        prev + Duration::milliseconds(1)
    }
}

/// A tag for organizing resources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    /// Unique identifier
    pub id: Uuid,
    /// Tag name (unique, non-empty)
    pub name: String,
    /// Resources carrying this tag (derived from the junction table)
    #[serde(default)]
    pub resources: Vec<Uuid>,
    /// When this tag was created
    pub created_at: DateTime<Utc>,
    /// When this tag was last updated
    pub last_modified: DateTime<Utc>,
}

impl Tag {
    /// Create a new tag with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            resources: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Create a tag with a specific ID (for loading from storage)
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            name: name.into(),
            resources: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Rename the tag
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.last_modified = next_timestamp(self.last_modified);
    }
}

/// A stored resource: a titled piece of content with tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Unique identifier
    pub id: Uuid,
    /// Display title (non-empty)
    pub title: String,
    /// Body content
    pub content: String,
    /// Tags attached to this resource
    #[serde(default)]
    pub tags: Vec<Uuid>,
    /// When this resource was created
    pub created_at: DateTime<Utc>,
    /// When this resource was last mutated (strictly monotonic)
    pub last_modified: DateTime<Utc>,
}

impl Resource {
    /// Create a new resource with the given title
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: String::new(),
            tags: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Create a resource with a specific ID (for loading from storage)
    pub fn with_id(id: Uuid, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            title: title.into(),
            content: String::new(),
            tags: Vec::new(),
            created_at: now,
            last_modified: now,
        }
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.last_modified = next_timestamp(self.last_modified);
    }

    /// Update the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.last_modified = next_timestamp(self.last_modified);
    }

    /// Attach a tag
    pub fn add_tag(&mut self, tag_id: Uuid) {
        if !self.tags.contains(&tag_id) {
            self.tags.push(tag_id);
            self.last_modified = next_timestamp(self.last_modified);
        }
    }

    /// Detach a tag
    pub fn remove_tag(&mut self, tag_id: Uuid) {
        if let Some(pos) = self.tags.iter().position(|t| *t == tag_id) {
            self.tags.remove(pos);
            self.last_modified = next_timestamp(self.last_modified);
        }
    }
}

/// A retained delete marker
///
/// Prevents a late-arriving remote update from resurrecting a deleted
/// entity. Pruned once older than the configured grace window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tombstone {
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub deleted_at: DateTime<Utc>,
}
