//! Query layer
//!
//! Named filters over resources. A [`Filter`] is a pure description: it is
//! evaluated with [`apply`] against an in-memory snapshot, never against the
//! database, so the same filter produces the same result on every replica
//! holding the same records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Resource, Tag};

/// How many days back the "recent" filter reaches
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// A named view over the resource collection
///
/// Matching is a conjunction: a resource passes when its `last_modified` is
/// at or after `min_modification_date` AND, if `tag` is set, it carries that
/// tag. Identity is the `id` field; display fields never affect equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: Uuid,
    /// Display name shown in listings
    pub name: String,
    /// Symbolic icon name for UI surfaces
    pub icon: String,
    /// Lower bound (inclusive) on `last_modified`
    pub min_modification_date: DateTime<Utc>,
    /// Required tag, if any
    pub tag: Option<Uuid>,
}

impl Filter {
    /// Everything: no date floor, no tag requirement
    pub fn all() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "All".to_string(),
            icon: "tray.full".to_string(),
            min_modification_date: DateTime::<Utc>::MIN_UTC,
            tag: None,
        }
    }

    /// Resources modified within the last [`RECENT_WINDOW_DAYS`] days
    ///
    /// The window is anchored at construction time, not evaluation time.
    pub fn recent() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Recent".to_string(),
            icon: "clock".to_string(),
            min_modification_date: Utc::now() - Duration::days(RECENT_WINDOW_DAYS),
            tag: None,
        }
    }

    /// Resources carrying the given tag
    pub fn with_tag(tag: &Tag) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: tag.name.clone(),
            icon: "tag".to_string(),
            min_modification_date: DateTime::<Utc>::MIN_UTC,
            tag: Some(tag.id),
        }
    }

    /// Whether a single resource matches this filter
    pub fn matches(&self, resource: &Resource) -> bool {
        if resource.last_modified < self.min_modification_date {
            return false;
        }
        match self.tag {
            Some(tag_id) => resource.tags.contains(&tag_id),
            None => true,
        }
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Filter {}

impl std::hash::Hash for Filter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Evaluate a filter against a snapshot of resources
///
/// Pure function of its inputs; preserves the input ordering.
pub fn apply(filter: &Filter, resources: &[Resource]) -> Vec<Resource> {
    resources
        .iter()
        .filter(|r| filter.matches(r))
        .cloned()
        .collect()
}
