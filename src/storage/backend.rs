//! StorageBackend trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use super::error::StorageResult;
use crate::models::{
    BackupHistory, Department, Event, EventDetail, EventFilter, EventLink, RestoreOperation,
    Role, Tag, User,
};

/// Maximum rows a single listing call may return
pub const LIST_LIMIT_MAX: usize = 1_000;

/// Persistence for every Arcasys row type.
///
/// Implementations must keep the same semantics: case-insensitive email and
/// tag matching, atomic multi-row event writes, newest-first audit listings.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    // -------------------------------------------------------------------------
    // Roles
    // -------------------------------------------------------------------------

    /// Return the role with this name, creating it if missing.
    async fn get_or_create_role(&self, name: &str) -> StorageResult<Role>;

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    /// Insert a user. `Conflict` if the email is taken (case-insensitive).
    async fn insert_user(&self, user: &User) -> StorageResult<()>;

    async fn get_user(&self, id: Uuid) -> StorageResult<Option<User>>;

    /// Case-insensitive email lookup.
    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    /// Overwrite every mutable column. `NotFound` if the user is gone.
    async fn update_user(&self, user: &User) -> StorageResult<()>;

    async fn delete_user(&self, id: Uuid) -> StorageResult<bool>;

    /// Inactive staff accounts, oldest application first.
    async fn list_pending_users(&self) -> StorageResult<Vec<User>>;

    // -------------------------------------------------------------------------
    // Departments and tags
    // -------------------------------------------------------------------------

    /// All departments ordered by name.
    async fn list_departments(&self) -> StorageResult<Vec<Department>>;

    async fn get_department(&self, id: Uuid) -> StorageResult<Option<Department>>;

    /// `Conflict` if the name is taken.
    async fn insert_department(&self, department: &Department) -> StorageResult<()>;

    /// Removes the department and its event associations.
    async fn delete_department(&self, id: Uuid) -> StorageResult<bool>;

    /// Case-insensitive match; the first spelling stored wins.
    async fn get_or_create_tag(&self, name: &str) -> StorageResult<Tag>;

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Atomically insert the event with its department, tags and links.
    async fn create_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()>;

    /// Atomically overwrite the event, replace its department and tags, and
    /// reconcile links by name (existing ids kept, missing names deleted).
    async fn update_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()>;

    async fn get_event(&self, id: Uuid) -> StorageResult<Option<EventDetail>>;

    /// An event with this title (case-insensitive), date and department exists.
    async fn event_exists(
        &self,
        title: &str,
        date: NaiveDate,
        department_id: Uuid,
    ) -> StorageResult<bool>;

    /// Filtered events ordered by date (newest first) plus the total match count.
    async fn search_events(
        &self,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<(Vec<Event>, usize)>;

    /// Title or location substring match, newest date first.
    async fn quick_search(&self, query: &str, limit: usize) -> StorageResult<Vec<Event>>;

    /// Most recently created events.
    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<Event>>;

    // -------------------------------------------------------------------------
    // Backups and restores
    // -------------------------------------------------------------------------

    async fn insert_backup(&self, backup: &BackupHistory) -> StorageResult<()>;

    async fn get_backup(&self, id: Uuid) -> StorageResult<Option<BackupHistory>>;

    /// Newest first.
    async fn list_backups(&self) -> StorageResult<Vec<BackupHistory>>;

    async fn insert_restore(&self, operation: &RestoreOperation) -> StorageResult<()>;

    async fn update_restore(&self, operation: &RestoreOperation) -> StorageResult<()>;

    async fn get_restore(&self, id: Uuid) -> StorageResult<Option<RestoreOperation>>;

    /// Newest first.
    async fn list_restores(&self) -> StorageResult<Vec<RestoreOperation>>;
}
