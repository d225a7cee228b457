//! Events, their departments, tags and links.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum event title length in bytes
pub const EVENT_TITLE_BYTES_MAX: usize = 255;

/// Maximum event location length in bytes
pub const EVENT_LOCATION_BYTES_MAX: usize = 255;

/// Maximum tag name length in bytes
pub const TAG_NAME_BYTES_MAX: usize = 100;

/// Maximum department name length in bytes
pub const DEPARTMENT_NAME_BYTES_MAX: usize = 255;

/// Maximum link URL length in bytes
pub const EVENT_LINK_URL_BYTES_MAX: usize = 2_000;

// =============================================================================
// Lookup Tables
// =============================================================================

/// Office or department that runs an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

impl Department {
    #[must_use]
    pub fn new(name: String) -> Self {
        assert!(!name.is_empty(), "department name cannot be empty");
        assert!(
            name.len() <= DEPARTMENT_NAME_BYTES_MAX,
            "department name {} bytes exceeds max {}",
            name.len(),
            DEPARTMENT_NAME_BYTES_MAX
        );
        Self {
            id: Uuid::new_v4(),
            name,
        }
    }
}

/// Free-form label on events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

impl Tag {
    #[must_use]
    pub fn new(name: String) -> Self {
        assert!(!name.is_empty(), "tag name cannot be empty");
        assert!(
            name.len() <= TAG_NAME_BYTES_MAX,
            "tag name {} bytes exceeds max {}",
            name.len(),
            TAG_NAME_BYTES_MAX
        );
        Self {
            id: Uuid::new_v4(),
            name,
        }
    }
}

// =============================================================================
// Links
// =============================================================================

/// Platforms an event can link out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkPlatform {
    Facebook,
    TikTok,
    YouTube,
    Website,
}

impl LinkPlatform {
    /// Stored `EventLinkName` for this platform.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "Facebook",
            Self::TikTok => "TikTok",
            Self::YouTube => "YouTube",
            Self::Website => "Website",
        }
    }

    /// Form label used in validation messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Facebook => "Facebook Link",
            Self::TikTok => "TikTok Link",
            Self::YouTube => "YouTube Link",
            Self::Website => "Website Link",
        }
    }

    /// Parse a stored link name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
    }

    /// All platforms in form order.
    #[must_use]
    pub fn all() -> &'static [LinkPlatform] {
        &[Self::Facebook, Self::TikTok, Self::YouTube, Self::Website]
    }
}

/// An outbound link attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub url: String,
}

impl EventLink {
    #[must_use]
    pub fn new(event_id: Uuid, platform: LinkPlatform, url: String) -> Self {
        assert!(
            url.len() <= EVENT_LINK_URL_BYTES_MAX,
            "link url {} bytes exceeds max {}",
            url.len(),
            EVENT_LINK_URL_BYTES_MAX
        );
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: platform.as_str().to_string(),
            url,
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// A scheduled activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event.
    ///
    /// # Panics
    /// Panics if the title or location exceed their limits.
    #[must_use]
    pub fn new(
        title: String,
        description: String,
        date: NaiveDate,
        time: NaiveTime,
        location: String,
        now: DateTime<Utc>,
    ) -> Self {
        assert!(
            title.len() <= EVENT_TITLE_BYTES_MAX,
            "title {} bytes exceeds max {}",
            title.len(),
            EVENT_TITLE_BYTES_MAX
        );
        assert!(
            location.len() <= EVENT_LOCATION_BYTES_MAX,
            "location {} bytes exceeds max {}",
            location.len(),
            EVENT_LOCATION_BYTES_MAX
        );

        Self {
            id: Uuid::new_v4(),
            title,
            description,
            date,
            time,
            location,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An event with its associations loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetail {
    pub event: Event,
    pub departments: Vec<Department>,
    pub tags: Vec<Tag>,
    pub links: Vec<EventLink>,
}

impl EventDetail {
    /// URL stored for a platform, if any.
    #[must_use]
    pub fn link_url(&self, platform: LinkPlatform) -> Option<&str> {
        self.links
            .iter()
            .find(|l| LinkPlatform::from_name(&l.name) == Some(platform))
            .map(|l| l.url.as_str())
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Filters for the event listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Matches title, description, department name or tag name
    pub query: Option<String>,
    pub department_id: Option<Uuid>,
    /// Substring of a link name
    pub platform: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number actually served
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Resolve a requested page number the way a lenient paginator does:
    /// unparseable or < 1 → first page, past the end → last page.
    #[must_use]
    pub fn resolve_page(requested: Option<&str>, total: usize, per_page: usize) -> (usize, usize) {
        assert!(per_page > 0, "per_page must be positive");

        let total_pages = total.div_ceil(per_page).max(1);
        let page = requested
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1)
            .min(total_pages);

        (page, total_pages)
    }
}
