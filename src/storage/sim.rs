//! SimStorageBackend - In-Memory Storage
//!
//! TigerStyle: Deterministic storage for tests and database-less development.
//!
//! All state sits behind one `RwLock`, so every multi-row write is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::backend::{StorageBackend, LIST_LIMIT_MAX};
use super::error::{StorageError, StorageResult};
use crate::models::{
    BackupHistory, Department, Event, EventDetail, EventFilter, EventLink, RestoreOperation,
    Role, Tag, User,
};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct SimState {
    roles: Vec<Role>,
    users: HashMap<Uuid, User>,
    departments: HashMap<Uuid, Department>,
    tags: Vec<Tag>,
    events: HashMap<Uuid, Event>,
    /// (event_id, department_id)
    event_departments: Vec<(Uuid, Uuid)>,
    /// (event_id, tag_id)
    event_tags: Vec<(Uuid, Uuid)>,
    links: Vec<EventLink>,
    backups: Vec<BackupHistory>,
    restores: Vec<RestoreOperation>,
}

impl SimState {
    fn departments_of(&self, event_id: Uuid) -> Vec<Department> {
        self.event_departments
            .iter()
            .filter(|(e, _)| *e == event_id)
            .filter_map(|(_, d)| self.departments.get(d).cloned())
            .collect()
    }

    fn tags_of(&self, event_id: Uuid) -> Vec<Tag> {
        self.event_tags
            .iter()
            .filter(|(e, _)| *e == event_id)
            .filter_map(|(_, t)| self.tags.iter().find(|tag| tag.id == *t).cloned())
            .collect()
    }

    fn links_of(&self, event_id: Uuid) -> Vec<EventLink> {
        self.links
            .iter()
            .filter(|l| l.event_id == event_id)
            .cloned()
            .collect()
    }

    fn check_references(&self, department_id: Uuid, tag_ids: &[Uuid]) -> StorageResult<()> {
        if !self.departments.contains_key(&department_id) {
            return Err(StorageError::not_found(format!("department {department_id}")));
        }
        for tag_id in tag_ids {
            if !self.tags.iter().any(|t| t.id == *tag_id) {
                return Err(StorageError::not_found(format!("tag {tag_id}")));
            }
        }
        Ok(())
    }

    fn link_event(&mut self, event_id: Uuid, department_id: Uuid, tag_ids: &[Uuid]) {
        self.event_departments.push((event_id, department_id));
        for tag_id in tag_ids {
            if !self.event_tags.contains(&(event_id, *tag_id)) {
                self.event_tags.push((event_id, *tag_id));
            }
        }
    }

    fn matches(&self, event: &Event, filter: &EventFilter) -> bool {
        if let Some(query) = filter.query.as_deref() {
            let q = query.to_lowercase();
            let hit = event.title.to_lowercase().contains(&q)
                || event.description.to_lowercase().contains(&q)
                || self
                    .departments_of(event.id)
                    .iter()
                    .any(|d| d.name.to_lowercase().contains(&q))
                || self
                    .tags_of(event.id)
                    .iter()
                    .any(|t| t.name.to_lowercase().contains(&q));
            if !hit {
                return false;
            }
        }

        if let Some(department_id) = filter.department_id {
            if !self.event_departments.contains(&(event.id, department_id)) {
                return false;
            }
        }

        if let Some(platform) = filter.platform.as_deref() {
            let p = platform.to_lowercase();
            if !self
                .links
                .iter()
                .any(|l| l.event_id == event.id && l.name.to_lowercase().contains(&p))
            {
                return false;
            }
        }

        if filter.from_date.is_some_and(|from| event.date < from) {
            return false;
        }
        if filter.to_date.is_some_and(|to| event.date > to) {
            return false;
        }

        true
    }
}

/// Case-insensitive equality with full Unicode folding, like `LOWER()`.
fn eq_folded(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Newest date first, then latest time, then id for a stable order.
fn by_date_desc(a: &Event, b: &Event) -> std::cmp::Ordering {
    b.date
        .cmp(&a.date)
        .then(b.time.cmp(&a.time))
        .then(a.id.cmp(&b.id))
}

// =============================================================================
// SimStorageBackend
// =============================================================================

/// In-memory storage backend.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct SimStorageBackend {
    state: Arc<RwLock<SimState>>,
}

impl SimStorageBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for SimStorageBackend {
    async fn get_or_create_role(&self, name: &str) -> StorageResult<Role> {
        assert!(!name.is_empty(), "role name cannot be empty");

        let mut state = self.state.write().await;
        if let Some(role) = state.roles.iter().find(|r| r.name == name) {
            return Ok(role.clone());
        }
        let role = Role::new(name);
        state.roles.push(role.clone());
        Ok(role)
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| eq_folded(&u.email, &user.email))
        {
            return Err(StorageError::conflict(format!("email {} already registered", user.email)));
        }
        if !state.roles.iter().any(|r| r.id == user.role_id) {
            return Err(StorageError::not_found(format!("role {}", user.role_id)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| eq_folded(&u.email, email))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match state.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StorageError::not_found(format!("user {}", user.id))),
        }
    }

    async fn delete_user(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.users.remove(&id).is_some();
        if removed {
            for user in state.users.values_mut() {
                if user.approved_by == Some(id) {
                    user.approved_by = None;
                }
            }
        }
        Ok(removed)
    }

    async fn list_pending_users(&self) -> StorageResult<Vec<User>> {
        let state = self.state.read().await;
        let mut pending: Vec<User> = state.users.values().filter(|u| u.is_pending()).cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn list_departments(&self) -> StorageResult<Vec<Department>> {
        let state = self.state.read().await;
        let mut departments: Vec<Department> = state.departments.values().cloned().collect();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    async fn get_department(&self, id: Uuid) -> StorageResult<Option<Department>> {
        Ok(self.state.read().await.departments.get(&id).cloned())
    }

    async fn insert_department(&self, department: &Department) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.departments.values().any(|d| d.name == department.name) {
            return Err(StorageError::conflict(format!(
                "department {} already exists",
                department.name
            )));
        }
        state.departments.insert(department.id, department.clone());
        Ok(())
    }

    async fn delete_department(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.departments.remove(&id).is_some();
        state.event_departments.retain(|(_, d)| *d != id);
        Ok(removed)
    }

    async fn get_or_create_tag(&self, name: &str) -> StorageResult<Tag> {
        let mut state = self.state.write().await;
        if let Some(tag) = state.tags.iter().find(|t| eq_folded(&t.name, name)) {
            return Ok(tag.clone());
        }
        let tag = Tag::new(name.to_string());
        state.tags.push(tag.clone());
        Ok(tag)
    }

    async fn create_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.events.contains_key(&event.id) {
            return Err(StorageError::conflict(format!("event {}", event.id)));
        }
        state.check_references(department_id, tag_ids)?;

        state.events.insert(event.id, event.clone());
        state.link_event(event.id, department_id, tag_ids);
        state.links.extend(links.iter().cloned());
        Ok(())
    }

    async fn update_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.events.contains_key(&event.id) {
            return Err(StorageError::not_found(format!("event {}", event.id)));
        }
        state.check_references(department_id, tag_ids)?;

        state.events.insert(event.id, event.clone());
        state.event_departments.retain(|(e, _)| *e != event.id);
        state.event_tags.retain(|(e, _)| *e != event.id);
        state.link_event(event.id, department_id, tag_ids);

        // Reconcile links by name, keeping the ids of surviving rows
        state
            .links
            .retain(|l| l.event_id != event.id || links.iter().any(|n| eq_folded(&n.name, &l.name)));
        for link in links {
            match state
                .links
                .iter_mut()
                .find(|l| l.event_id == event.id && eq_folded(&l.name, &link.name))
            {
                Some(existing) => existing.url = link.url.clone(),
                None => state.links.push(link.clone()),
            }
        }
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StorageResult<Option<EventDetail>> {
        let state = self.state.read().await;
        Ok(state.events.get(&id).map(|event| EventDetail {
            event: event.clone(),
            departments: state.departments_of(id),
            tags: state.tags_of(id),
            links: state.links_of(id),
        }))
    }

    async fn event_exists(
        &self,
        title: &str,
        date: NaiveDate,
        department_id: Uuid,
    ) -> StorageResult<bool> {
        let state = self.state.read().await;
        Ok(state.events.values().any(|e| {
            eq_folded(&e.title, title)
                && e.date == date
                && state.event_departments.contains(&(e.id, department_id))
        }))
    }

    async fn search_events(
        &self,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<(Vec<Event>, usize)> {
        assert!(limit > 0, "limit must be positive");
        assert!(limit <= LIST_LIMIT_MAX, "limit cannot exceed {}", LIST_LIMIT_MAX);

        let state = self.state.read().await;
        let mut matched: Vec<Event> = state
            .events
            .values()
            .filter(|e| state.matches(e, filter))
            .cloned()
            .collect();
        matched.sort_by(by_date_desc);

        let total = matched.len();
        let page = matched.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn quick_search(&self, query: &str, limit: usize) -> StorageResult<Vec<Event>> {
        assert!(limit > 0, "limit must be positive");

        let q = query.to_lowercase();
        let state = self.state.read().await;
        let mut hits: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.title.to_lowercase().contains(&q) || e.location.to_lowercase().contains(&q))
            .cloned()
            .collect();
        hits.sort_by(by_date_desc);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<Event>> {
        let state = self.state.read().await;
        let mut events: Vec<Event> = state.events.values().cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn insert_backup(&self, backup: &BackupHistory) -> StorageResult<()> {
        self.state.write().await.backups.push(backup.clone());
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> StorageResult<Option<BackupHistory>> {
        Ok(self
            .state
            .read()
            .await
            .backups
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupHistory>> {
        let state = self.state.read().await;
        let mut backups: Vec<BackupHistory> = state.backups.iter().rev().cloned().collect();
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    async fn insert_restore(&self, operation: &RestoreOperation) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.backups.iter().any(|b| b.id == operation.backup_id) {
            return Err(StorageError::not_found(format!("backup {}", operation.backup_id)));
        }
        state.restores.push(operation.clone());
        Ok(())
    }

    async fn update_restore(&self, operation: &RestoreOperation) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match state.restores.iter_mut().find(|r| r.id == operation.id) {
            Some(existing) => {
                *existing = operation.clone();
                Ok(())
            }
            None => Err(StorageError::not_found(format!("restore {}", operation.id))),
        }
    }

    async fn get_restore(&self, id: Uuid) -> StorageResult<Option<RestoreOperation>> {
        Ok(self
            .state
            .read()
            .await
            .restores
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_restores(&self) -> StorageResult<Vec<RestoreOperation>> {
        let state = self.state.read().await;
        let mut restores: Vec<RestoreOperation> = state.restores.iter().rev().cloned().collect();
        restores.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(restores)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(title: &str, on: NaiveDate) -> Event {
        Event::new(
            title.to_string(),
            format!("{title} description"),
            on,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            "Main Hall".to_string(),
            Utc::now(),
        )
    }

    async fn user(backend: &SimStorageBackend, email: &str) -> User {
        let role = backend.get_or_create_role("Staff").await.unwrap();
        let mut user = User::new(role.id, "Test User".to_string(), email.to_string(), "h".to_string(), Utc::now());
        user.is_staff = true;
        user
    }

    #[tokio::test]
    async fn test_role_get_or_create_is_idempotent() {
        let backend = SimStorageBackend::new();
        let first = backend.get_or_create_role("Staff").await.unwrap();
        let second = backend.get_or_create_role("Staff").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts_case_insensitively() {
        let backend = SimStorageBackend::new();
        backend.insert_user(&user(&backend, "ana@cit.edu").await).await.unwrap();

        let result = backend.insert_user(&user(&backend, "ANA@cit.edu").await).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        let found = backend.find_user_by_email("Ana@CIT.edu").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_case_folding_is_not_ascii_only() {
        let backend = SimStorageBackend::new();
        backend.insert_user(&user(&backend, "josé@cit.edu").await).await.unwrap();

        let result = backend.insert_user(&user(&backend, "JOSÉ@cit.edu").await).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert!(backend.find_user_by_email("José@cit.edu").await.unwrap().is_some());

        let tag = backend.get_or_create_tag("Ñandú").await.unwrap();
        assert_eq!(backend.get_or_create_tag("ñANDÚ").await.unwrap().id, tag.id);
    }

    #[tokio::test]
    async fn test_pending_users_oldest_first() {
        let backend = SimStorageBackend::new();
        let mut late = user(&backend, "late@cit.edu").await;
        late.created_at = Utc::now();
        let mut early = user(&backend, "early@cit.edu").await;
        early.created_at = late.created_at - Duration::hours(1);
        let mut active = user(&backend, "active@cit.edu").await;
        active.is_active = true;

        backend.insert_user(&late).await.unwrap();
        backend.insert_user(&early).await.unwrap();
        backend.insert_user(&active).await.unwrap();

        let pending = backend.list_pending_users().await.unwrap();
        let emails: Vec<&str> = pending.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["early@cit.edu", "late@cit.edu"]);
    }

    #[tokio::test]
    async fn test_tag_get_or_create_keeps_first_spelling() {
        let backend = SimStorageBackend::new();
        let first = backend.get_or_create_tag("Workshop").await.unwrap();
        let second = backend.get_or_create_tag("WORKSHOP").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Workshop");
    }

    #[tokio::test]
    async fn test_search_filters() {
        let backend = SimStorageBackend::new();
        let ccs = Department::new("College of Computer Studies".to_string());
        let cea = Department::new("College of Engineering".to_string());
        backend.insert_department(&ccs).await.unwrap();
        backend.insert_department(&cea).await.unwrap();
        let sdg = backend.get_or_create_tag("SDG").await.unwrap();

        let hackathon = event("Hackathon", date(2025, 3, 1));
        let fair = event("Job Fair", date(2025, 5, 1));
        let links = vec![EventLink::new(fair.id, crate::models::LinkPlatform::Facebook, "https://fb.com/x".to_string())];
        backend.create_event(&hackathon, ccs.id, &[sdg.id], &[]).await.unwrap();
        backend.create_event(&fair, cea.id, &[], &links).await.unwrap();

        let by_tag = EventFilter { query: Some("sdg".to_string()), ..Default::default() };
        let (events, total) = backend.search_events(&by_tag, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].title, "Hackathon");

        let by_dept_name = EventFilter { query: Some("engineering".to_string()), ..Default::default() };
        let (events, _) = backend.search_events(&by_dept_name, 10, 0).await.unwrap();
        assert_eq!(events[0].title, "Job Fair");

        let by_platform = EventFilter { platform: Some("face".to_string()), ..Default::default() };
        let (events, _) = backend.search_events(&by_platform, 10, 0).await.unwrap();
        assert_eq!(events.len(), 1);

        let by_range = EventFilter {
            from_date: Some(date(2025, 3, 1)),
            to_date: Some(date(2025, 3, 1)),
            ..Default::default()
        };
        let (events, _) = backend.search_events(&by_range, 10, 0).await.unwrap();
        assert_eq!(events[0].title, "Hackathon");

        let all = EventFilter::default();
        let (events, total) = backend.search_events(&all, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(events[0].title, "Job Fair", "newest date first");
    }

    #[tokio::test]
    async fn test_update_event_reconciles_links() {
        let backend = SimStorageBackend::new();
        let dept = Department::new("Marketing".to_string());
        backend.insert_department(&dept).await.unwrap();

        let ev = event("Open House", date(2025, 8, 1));
        let fb = EventLink::new(ev.id, crate::models::LinkPlatform::Facebook, "https://fb.com/a".to_string());
        let yt = EventLink::new(ev.id, crate::models::LinkPlatform::YouTube, "https://youtube.com/a".to_string());
        backend.create_event(&ev, dept.id, &[], &[fb.clone(), yt]).await.unwrap();

        let new_fb = EventLink::new(ev.id, crate::models::LinkPlatform::Facebook, "https://fb.com/b".to_string());
        backend.update_event(&ev, dept.id, &[], &[new_fb]).await.unwrap();

        let detail = backend.get_event(ev.id).await.unwrap().unwrap();
        assert_eq!(detail.links.len(), 1);
        assert_eq!(detail.links[0].id, fb.id, "existing link id kept");
        assert_eq!(detail.links[0].url, "https://fb.com/b");
    }

    #[tokio::test]
    async fn test_delete_department_cascades_associations() {
        let backend = SimStorageBackend::new();
        let dept = Department::new("Registrar".to_string());
        backend.insert_department(&dept).await.unwrap();
        let ev = event("Enrollment", date(2025, 6, 1));
        backend.create_event(&ev, dept.id, &[], &[]).await.unwrap();

        assert!(backend.delete_department(dept.id).await.unwrap());

        let detail = backend.get_event(ev.id).await.unwrap().unwrap();
        assert!(detail.departments.is_empty());
    }

    #[tokio::test]
    async fn test_create_event_requires_department() {
        let backend = SimStorageBackend::new();
        let ev = event("Orphan", date(2025, 6, 1));
        let result = backend.create_event(&ev, Uuid::new_v4(), &[], &[]).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(backend.get_event(ev.id).await.unwrap().is_none());
    }
}
