//! Events - Creation, Editing, Listing, Departments
//!
//! TigerStyle: Validate the whole form up front, then write atomically.
//!
//! Form checks run in a fixed order and stop at the first failure, so the
//! client always sees one actionable message.

mod form;

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{
    Department, Event, EventDetail, EventFilter, EventLink, Page, User, DEPARTMENT_NAME_BYTES_MAX,
};
use crate::storage::{StorageBackend, StorageError};

pub use form::{parse_tags, validate_event_form, EventForm, FormMode, ValidEvent};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Events per listing page
pub const EVENTS_PER_PAGE: usize = 10;

/// Hits returned by the quick search
pub const QUICK_SEARCH_LIMIT: usize = 5;

/// Recently created events shown beside the listing
pub const RECENT_EVENTS_COUNT: usize = 10;

pub const MSG_EMPTY_SEARCH: &str = "Please enter a search term to find events.";
pub const MSG_EVENT_EXISTS: &str = "Event already exists.";
pub const MSG_STAFF_ONLY: &str = "Unauthorized access. Staff or admin privileges required.";
pub const MSG_ADMIN_ONLY: &str = "Access denied. Admin privileges required.";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("{message}")]
    Invalid { field: String, message: String },

    #[error("Event already exists.")]
    Duplicate,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EventError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type EventResult<T> = Result<T, EventError>;

// =============================================================================
// Types
// =============================================================================

/// Raw listing query, as received.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListQuery {
    /// `Some("")` means the search box was submitted empty
    pub q: Option<String>,
    pub department: Option<String>,
    pub platform: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub page: Option<String>,
}

/// One page of the event listing with its sidebar data.
#[derive(Debug, Clone, Serialize)]
pub struct EventListing {
    pub events: Page<Event>,
    pub search_query: String,
    /// Shown when the search box was submitted empty
    pub notice: Option<String>,
    pub departments: Vec<Department>,
    pub recent_events: Vec<Event>,
    pub can_manage_events: bool,
    pub is_admin: bool,
}

/// Quick search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    /// e.g. `Mar 07, 2025`
    pub date: String,
    pub location: String,
}

// =============================================================================
// EventService
// =============================================================================

pub struct EventService {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl EventService {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Create an event with its department, tags and links.
    pub async fn create(&self, actor: &User, form: EventForm) -> EventResult<EventDetail> {
        require_manager(actor)?;
        let valid = validate_event_form(&form, FormMode::Create)?;
        self.require_department(valid.department_id).await?;

        if self
            .storage
            .event_exists(&valid.title, valid.date, valid.department_id)
            .await?
        {
            return Err(EventError::Duplicate);
        }

        let event = Event::new(
            valid.title.clone(),
            valid.description.clone(),
            valid.date,
            valid.time,
            valid.location.clone(),
            self.clock.now(),
        );
        let tag_ids = self.resolve_tags(&valid.tags).await?;
        let links = build_links(event.id, &valid);

        self.storage
            .create_event(&event, valid.department_id, &tag_ids, &links)
            .await?;

        tracing::info!(event_id = %event.id, actor = %actor.id, title = %event.title, "event created");
        self.load(event.id).await
    }

    /// Overwrite an event; department and tags are replaced, links reconciled.
    pub async fn edit(&self, actor: &User, id: Uuid, form: EventForm) -> EventResult<EventDetail> {
        require_manager(actor)?;
        let existing = self.load(id).await?;
        let valid = validate_event_form(&form, FormMode::Edit)?;
        self.require_department(valid.department_id).await?;

        let mut event = existing.event;
        event.title = valid.title.clone();
        event.description = valid.description.clone();
        event.date = valid.date;
        event.time = valid.time;
        event.location = valid.location.clone();
        event.updated_at = self.clock.now();

        let tag_ids = self.resolve_tags(&valid.tags).await?;
        let links = build_links(event.id, &valid);

        self.storage
            .update_event(&event, valid.department_id, &tag_ids, &links)
            .await?;

        tracing::info!(event_id = %event.id, actor = %actor.id, "event updated");
        self.load(event.id).await
    }

    pub async fn get(&self, id: Uuid) -> EventResult<EventDetail> {
        self.load(id).await
    }

    /// Filtered, paginated listing. Malformed filters are ignored.
    pub async fn list(&self, viewer: Option<&User>, query: &ListQuery) -> EventResult<EventListing> {
        let search_query = query.q.as_deref().map(str::trim).unwrap_or_default().to_string();
        let notice = match &query.q {
            Some(_) if search_query.is_empty() => Some(MSG_EMPTY_SEARCH.to_string()),
            _ => None,
        };

        let filter = EventFilter {
            query: (!search_query.is_empty()).then(|| search_query.clone()),
            department_id: query
                .department
                .as_deref()
                .and_then(|d| Uuid::parse_str(d.trim()).ok()),
            platform: query
                .platform
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            from_date: query.from_date.as_deref().and_then(form::parse_date),
            to_date: query.to_date.as_deref().and_then(form::parse_date),
        };

        // Count first so an out-of-range page clamps to the last one.
        let (_, total) = self.storage.search_events(&filter, 1, 0).await?;
        let (page, total_pages) =
            Page::<Event>::resolve_page(query.page.as_deref(), total, EVENTS_PER_PAGE);
        let (items, total) = self
            .storage
            .search_events(&filter, EVENTS_PER_PAGE, (page - 1) * EVENTS_PER_PAGE)
            .await?;

        Ok(EventListing {
            events: Page {
                items,
                page,
                total_pages,
                total,
            },
            search_query,
            notice,
            departments: self.storage.list_departments().await?,
            recent_events: self.storage.recent_events(RECENT_EVENTS_COUNT).await?,
            can_manage_events: viewer.is_some_and(User::can_manage_events),
            is_admin: viewer.is_some_and(|u| u.is_active && u.is_admin),
        })
    }

    /// Title or location match for the search-as-you-type box.
    pub async fn quick_search(&self, q: &str) -> EventResult<Vec<SearchHit>> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(Vec::new());
        }

        let events = self.storage.quick_search(q, QUICK_SEARCH_LIMIT).await?;
        Ok(events
            .into_iter()
            .map(|e| SearchHit {
                id: e.id.to_string(),
                title: e.title,
                date: e.date.format("%b %d, %Y").to_string(),
                location: e.location,
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Departments
    // -------------------------------------------------------------------------

    pub async fn departments(&self) -> EventResult<Vec<Department>> {
        Ok(self.storage.list_departments().await?)
    }

    pub async fn add_department(&self, actor: &User, name: &str) -> EventResult<Department> {
        require_admin(actor)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(EventError::invalid("name", "Department name is required."));
        }
        if name.len() > DEPARTMENT_NAME_BYTES_MAX {
            return Err(EventError::invalid(
                "name",
                format!("Department name must be at most {DEPARTMENT_NAME_BYTES_MAX} characters."),
            ));
        }

        let department = Department::new(name.to_string());
        match self.storage.insert_department(&department).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(EventError::Conflict("Department already exists.".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(department_id = %department.id, name = %department.name, "department added");
        Ok(department)
    }

    pub async fn delete_department(&self, actor: &User, id: Uuid) -> EventResult<()> {
        require_admin(actor)?;

        if !self.storage.delete_department(id).await? {
            return Err(EventError::NotFound("Department not found.".to_string()));
        }
        tracing::info!(department_id = %id, "department deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn load(&self, id: Uuid) -> EventResult<EventDetail> {
        self.storage
            .get_event(id)
            .await?
            .ok_or_else(|| EventError::NotFound("Event not found.".to_string()))
    }

    async fn require_department(&self, id: Uuid) -> EventResult<()> {
        match self.storage.get_department(id).await? {
            Some(_) => Ok(()),
            None => Err(EventError::invalid(
                "department",
                "Selected office/department does not exist.",
            )),
        }
    }

    async fn resolve_tags(&self, names: &[String]) -> EventResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let tag = self.storage.get_or_create_tag(name).await?;
            if !ids.contains(&tag.id) {
                ids.push(tag.id);
            }
        }
        Ok(ids)
    }
}

fn build_links(event_id: Uuid, valid: &ValidEvent) -> Vec<EventLink> {
    valid
        .links
        .iter()
        .map(|(platform, url)| EventLink::new(event_id, *platform, url.clone()))
        .collect()
}

fn require_manager(actor: &User) -> EventResult<()> {
    if actor.can_manage_events() {
        Ok(())
    } else {
        Err(EventError::Forbidden(MSG_STAFF_ONLY.to_string()))
    }
}

fn require_admin(actor: &User) -> EventResult<()> {
    if actor.is_active && actor.is_admin {
        Ok(())
    } else {
        Err(EventError::Forbidden(MSG_ADMIN_ONLY.to_string()))
    }
}
