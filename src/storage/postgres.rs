//! PostgresBackend - Production Storage
//!
//! TigerStyle: Real database storage, explicit schema, explicit row mapping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PostgresBackend                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pool: sqlx::PgPool (connection pooling)                     │
//! │  Tables: "Role" "User" "Event" "Tag" "Department"            │
//! │          "EventTag" "EventDepartment" "EventLink"            │
//! │          "BackupHistory" "RestoreOperation"                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Table and column names are quoted CamelCase so that data-only dumps taken
//! from this schema replay unchanged.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::backend::{StorageBackend, LIST_LIMIT_MAX};
use super::error::{StorageError, StorageResult};
use crate::models::{
    BackupHistory, BackupStatus, Department, Event, EventDetail, EventFilter, EventLink,
    RestoreOperation, RestoreStatus, Role, Tag, User,
};

/// Maximum pooled connections
pub const POOL_CONNECTIONS_MAX: u32 = 10;

/// Schema, created idempotently on startup.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "Role" (
    "RoleID" UUID PRIMARY KEY,
    "RoleName" VARCHAR(50) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS "User" (
    "UserID" UUID PRIMARY KEY,
    "RoleID" UUID NOT NULL REFERENCES "Role"("RoleID") ON DELETE RESTRICT,
    "UserFullName" VARCHAR(255) NOT NULL,
    "UserEmail" VARCHAR(254) NOT NULL UNIQUE,
    "UserPasswordHash" VARCHAR(255) NOT NULL,
    "UserCreatedAt" TIMESTAMPTZ NOT NULL,
    "UserLastLogin" TIMESTAMPTZ,
    "isUserActive" BOOLEAN NOT NULL DEFAULT FALSE,
    "isUserAdmin" BOOLEAN NOT NULL DEFAULT FALSE,
    "isUserStaff" BOOLEAN NOT NULL DEFAULT FALSE,
    "UserApprovedBy" UUID REFERENCES "User"("UserID") ON DELETE SET NULL,
    "UserApprovedAt" TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS "User_email_lower_idx" ON "User" (LOWER("UserEmail"));

CREATE TABLE IF NOT EXISTS "Event" (
    "EventID" UUID PRIMARY KEY,
    "EventTitle" VARCHAR(255) NOT NULL,
    "EventDescription" TEXT NOT NULL,
    "EventDate" DATE NOT NULL,
    "EventTime" TIME NOT NULL,
    "EventLocation" VARCHAR(255) NOT NULL,
    "EventCreatedAt" TIMESTAMPTZ NOT NULL,
    "EventUpdatedAt" TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS "Event_date_idx" ON "Event" ("EventDate" DESC);

CREATE TABLE IF NOT EXISTS "Tag" (
    "TagID" UUID PRIMARY KEY,
    "TagName" VARCHAR(100) NOT NULL UNIQUE
);
CREATE UNIQUE INDEX IF NOT EXISTS "Tag_name_lower_idx" ON "Tag" (LOWER("TagName"));

CREATE TABLE IF NOT EXISTS "Department" (
    "DepartmentID" UUID PRIMARY KEY,
    "DepartmentName" VARCHAR(255) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS "EventTag" (
    "EventTagID" UUID PRIMARY KEY,
    "EventID" UUID NOT NULL REFERENCES "Event"("EventID") ON DELETE CASCADE,
    "TagID" UUID NOT NULL REFERENCES "Tag"("TagID") ON DELETE CASCADE,
    "EventTagAssignedAt" TIMESTAMPTZ NOT NULL,
    UNIQUE ("EventID", "TagID")
);

CREATE TABLE IF NOT EXISTS "EventDepartment" (
    "EventDepartmentID" UUID PRIMARY KEY,
    "EventID" UUID NOT NULL REFERENCES "Event"("EventID") ON DELETE CASCADE,
    "DepartmentID" UUID NOT NULL REFERENCES "Department"("DepartmentID") ON DELETE CASCADE,
    "EventDepartmentAssignedAt" TIMESTAMPTZ NOT NULL,
    UNIQUE ("EventID", "DepartmentID")
);

CREATE TABLE IF NOT EXISTS "EventLink" (
    "EventLinkID" UUID PRIMARY KEY,
    "EventID" UUID NOT NULL REFERENCES "Event"("EventID") ON DELETE CASCADE,
    "EventLinkName" VARCHAR(255) NOT NULL,
    "EventLinkURL" VARCHAR(2000) NOT NULL
);

CREATE TABLE IF NOT EXISTS "BackupHistory" (
    "BackupHistoryID" UUID PRIMARY KEY,
    "BackupName" VARCHAR(100) NOT NULL,
    "BackupStatus" VARCHAR(20) NOT NULL,
    "BackupTimestamp" TIMESTAMPTZ NOT NULL,
    "BackupSize" VARCHAR(50),
    "BackupLogFile" VARCHAR(255),
    "BackupFile" VARCHAR(255)
);

CREATE TABLE IF NOT EXISTS "RestoreOperation" (
    "RestoreID" UUID PRIMARY KEY,
    "BackupHistoryID" UUID NOT NULL REFERENCES "BackupHistory"("BackupHistoryID") ON DELETE CASCADE,
    "RestoreStatus" VARCHAR(20) NOT NULL,
    "RestoreProgress" INTEGER NOT NULL DEFAULT 0,
    "RestoreMessage" TEXT,
    "RestoreStartedAt" TIMESTAMPTZ NOT NULL,
    "RestoreCompletedAt" TIMESTAMPTZ
);
"#;

// =============================================================================
// PostgresBackend
// =============================================================================

/// PostgreSQL storage backend for production use.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect and create the schema.
    ///
    /// # Errors
    /// Returns error if connection fails or the schema cannot be created.
    pub async fn new(connection_string: &str) -> StorageResult<Self> {
        // Preconditions
        assert!(
            !connection_string.is_empty(),
            "connection string cannot be empty"
        );
        assert!(
            connection_string.starts_with("postgres://")
                || connection_string.starts_with("postgresql://"),
            "connection string must be postgres URL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(POOL_CONNECTIONS_MAX)
            .connect(connection_string)
            .await
            .map_err(|e| StorageError::connection(format!("failed to connect: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let backend = Self { pool };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Initialize database schema.
    async fn init_schema(&self) -> StorageResult<()> {
        // Plain &str runs over the simple protocol, which allows several statements.
        self.pool
            .execute(SCHEMA_SQL)
            .await
            .map_err(|e| StorageError::internal(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    /// Get the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map a write failure, surfacing constraint violations as their own kinds.
fn write_error(context: &str, err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => return StorageError::conflict(format!("{context}: {db}")),
            Some("23503") => return StorageError::not_found(format!("{context}: {db}")),
            _ => {}
        }
    }
    StorageError::write(format!("{context}: {err}"))
}

fn read_error(context: &str, err: sqlx::Error) -> StorageError {
    StorageError::read(format!("{context}: {err}"))
}

/// `%pattern%` for ILIKE with wildcards in the input escaped.
fn like_pattern(input: &str) -> String {
    let escaped = input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

// =============================================================================
// Row Mapping
// =============================================================================

fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::internal(format!("column {column}: {e}")))
}

fn row_to_role(row: &PgRow) -> StorageResult<Role> {
    Ok(Role {
        id: get(row, "RoleID")?,
        name: get(row, "RoleName")?,
    })
}

fn row_to_user(row: &PgRow) -> StorageResult<User> {
    Ok(User {
        id: get(row, "UserID")?,
        role_id: get(row, "RoleID")?,
        full_name: get(row, "UserFullName")?,
        email: get(row, "UserEmail")?,
        password_hash: get(row, "UserPasswordHash")?,
        created_at: get(row, "UserCreatedAt")?,
        last_login: get(row, "UserLastLogin")?,
        is_active: get(row, "isUserActive")?,
        is_admin: get(row, "isUserAdmin")?,
        is_staff: get(row, "isUserStaff")?,
        approved_by: get(row, "UserApprovedBy")?,
        approved_at: get(row, "UserApprovedAt")?,
    })
}

fn row_to_department(row: &PgRow) -> StorageResult<Department> {
    Ok(Department {
        id: get(row, "DepartmentID")?,
        name: get(row, "DepartmentName")?,
    })
}

fn row_to_tag(row: &PgRow) -> StorageResult<Tag> {
    Ok(Tag {
        id: get(row, "TagID")?,
        name: get(row, "TagName")?,
    })
}

fn row_to_event(row: &PgRow) -> StorageResult<Event> {
    let date: NaiveDate = get(row, "EventDate")?;
    let time: NaiveTime = get(row, "EventTime")?;
    Ok(Event {
        id: get(row, "EventID")?,
        title: get(row, "EventTitle")?,
        description: get(row, "EventDescription")?,
        date,
        time,
        location: get(row, "EventLocation")?,
        created_at: get(row, "EventCreatedAt")?,
        updated_at: get(row, "EventUpdatedAt")?,
    })
}

fn row_to_link(row: &PgRow) -> StorageResult<EventLink> {
    Ok(EventLink {
        id: get(row, "EventLinkID")?,
        event_id: get(row, "EventID")?,
        name: get(row, "EventLinkName")?,
        url: get(row, "EventLinkURL")?,
    })
}

fn row_to_backup(row: &PgRow) -> StorageResult<BackupHistory> {
    let status: String = get(row, "BackupStatus")?;
    let status = BackupStatus::from_str(&status)
        .ok_or_else(|| StorageError::internal(format!("invalid backup status: {status}")))?;
    Ok(BackupHistory {
        id: get(row, "BackupHistoryID")?,
        name: get(row, "BackupName")?,
        status,
        timestamp: get(row, "BackupTimestamp")?,
        size: get(row, "BackupSize")?,
        log_key: get(row, "BackupLogFile")?,
        file_key: get(row, "BackupFile")?,
    })
}

fn row_to_restore(row: &PgRow) -> StorageResult<RestoreOperation> {
    let status: String = get(row, "RestoreStatus")?;
    let status = RestoreStatus::from_str(&status)
        .ok_or_else(|| StorageError::internal(format!("invalid restore status: {status}")))?;
    Ok(RestoreOperation {
        id: get(row, "RestoreID")?,
        backup_id: get(row, "BackupHistoryID")?,
        status,
        progress: get(row, "RestoreProgress")?,
        message: get(row, "RestoreMessage")?,
        started_at: get(row, "RestoreStartedAt")?,
        completed_at: get(row, "RestoreCompletedAt")?,
    })
}

fn map_rows<T>(rows: &[PgRow], f: fn(&PgRow) -> StorageResult<T>) -> StorageResult<Vec<T>> {
    rows.iter().map(f).collect()
}

/// Append the WHERE clause shared by the event count and page queries.
fn push_event_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    qb.push(r#" FROM "Event" e WHERE TRUE"#);

    if let Some(query) = filter.query.as_deref() {
        let pattern = like_pattern(query);
        qb.push(r#" AND (e."EventTitle" ILIKE "#)
            .push_bind(pattern.clone())
            .push(r#" OR e."EventDescription" ILIKE "#)
            .push_bind(pattern.clone())
            .push(
                r#" OR EXISTS (SELECT 1 FROM "EventDepartment" ed
                    JOIN "Department" d ON d."DepartmentID" = ed."DepartmentID"
                    WHERE ed."EventID" = e."EventID" AND d."DepartmentName" ILIKE "#,
            )
            .push_bind(pattern.clone())
            .push(
                r#") OR EXISTS (SELECT 1 FROM "EventTag" et
                    JOIN "Tag" t ON t."TagID" = et."TagID"
                    WHERE et."EventID" = e."EventID" AND t."TagName" ILIKE "#,
            )
            .push_bind(pattern)
            .push("))");
    }

    if let Some(department_id) = filter.department_id {
        qb.push(
            r#" AND EXISTS (SELECT 1 FROM "EventDepartment" ed
                WHERE ed."EventID" = e."EventID" AND ed."DepartmentID" = "#,
        )
        .push_bind(department_id)
        .push(")");
    }

    if let Some(platform) = filter.platform.as_deref() {
        qb.push(
            r#" AND EXISTS (SELECT 1 FROM "EventLink" el
                WHERE el."EventID" = e."EventID" AND el."EventLinkName" ILIKE "#,
        )
        .push_bind(like_pattern(platform))
        .push(")");
    }

    if let Some(from) = filter.from_date {
        qb.push(r#" AND e."EventDate" >= "#).push_bind(from);
    }
    if let Some(to) = filter.to_date {
        qb.push(r#" AND e."EventDate" <= "#).push_bind(to);
    }
}

// =============================================================================
// StorageBackend Implementation
// =============================================================================

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn get_or_create_role(&self, name: &str) -> StorageResult<Role> {
        assert!(!name.is_empty(), "role name cannot be empty");

        sqlx::query(r#"INSERT INTO "Role" ("RoleID", "RoleName") VALUES ($1, $2) ON CONFLICT ("RoleName") DO NOTHING"#)
            .bind(Uuid::new_v4())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("failed to create role", e))?;

        let row = sqlx::query(r#"SELECT * FROM "Role" WHERE "RoleName" = $1"#)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| read_error("failed to get role", e))?;

        row_to_role(&row)
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO "User" ("UserID", "RoleID", "UserFullName", "UserEmail", "UserPasswordHash",
                "UserCreatedAt", "UserLastLogin", "isUserActive", "isUserAdmin", "isUserStaff",
                "UserApprovedBy", "UserApprovedAt")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id)
        .bind(user.role_id)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.last_login)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(user.is_staff)
        .bind(user.approved_by)
        .bind(user.approved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("failed to insert user", e))?;

        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM "User" WHERE "UserID" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to get user", e))?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM "User" WHERE LOWER("UserEmail") = LOWER($1)"#)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to find user", e))?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn update_user(&self, user: &User) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE "User" SET
                "RoleID" = $2, "UserFullName" = $3, "UserEmail" = $4, "UserPasswordHash" = $5,
                "UserLastLogin" = $6, "isUserActive" = $7, "isUserAdmin" = $8, "isUserStaff" = $9,
                "UserApprovedBy" = $10, "UserApprovedAt" = $11
            WHERE "UserID" = $1
            "#,
        )
        .bind(user.id)
        .bind(user.role_id)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.last_login)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(user.is_staff)
        .bind(user.approved_by)
        .bind(user.approved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("failed to update user", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query(r#"DELETE FROM "User" WHERE "UserID" = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("failed to delete user", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_users(&self) -> StorageResult<Vec<User>> {
        let rows = sqlx::query(
            r#"SELECT * FROM "User" WHERE NOT "isUserActive" AND "isUserStaff" ORDER BY "UserCreatedAt", "UserID""#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error("failed to list pending users", e))?;

        map_rows(&rows, row_to_user)
    }

    async fn list_departments(&self) -> StorageResult<Vec<Department>> {
        let rows = sqlx::query(r#"SELECT * FROM "Department" ORDER BY "DepartmentName""#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to list departments", e))?;

        map_rows(&rows, row_to_department)
    }

    async fn get_department(&self, id: Uuid) -> StorageResult<Option<Department>> {
        let row = sqlx::query(r#"SELECT * FROM "Department" WHERE "DepartmentID" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to get department", e))?;

        row.as_ref().map(row_to_department).transpose()
    }

    async fn insert_department(&self, department: &Department) -> StorageResult<()> {
        sqlx::query(r#"INSERT INTO "Department" ("DepartmentID", "DepartmentName") VALUES ($1, $2)"#)
            .bind(department.id)
            .bind(&department.name)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("failed to insert department", e))?;
        Ok(())
    }

    async fn delete_department(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query(r#"DELETE FROM "Department" WHERE "DepartmentID" = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("failed to delete department", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_or_create_tag(&self, name: &str) -> StorageResult<Tag> {
        assert!(!name.is_empty(), "tag name cannot be empty");

        sqlx::query(r#"INSERT INTO "Tag" ("TagID", "TagName") VALUES ($1, $2) ON CONFLICT DO NOTHING"#)
            .bind(Uuid::new_v4())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("failed to create tag", e))?;

        let row = sqlx::query(r#"SELECT * FROM "Tag" WHERE LOWER("TagName") = LOWER($1)"#)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| read_error("failed to get tag", e))?;

        row_to_tag(&row)
    }

    async fn create_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::connection(format!("failed to begin: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO "Event" ("EventID", "EventTitle", "EventDescription", "EventDate",
                "EventTime", "EventLocation", "EventCreatedAt", "EventUpdatedAt")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(event.time)
        .bind(&event.location)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error("failed to insert event", e))?;

        insert_associations(&mut tx, event, department_id, tag_ids).await?;

        for link in links {
            insert_link(&mut tx, link).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::write(format!("failed to commit event: {e}")))
    }

    async fn update_event(
        &self,
        event: &Event,
        department_id: Uuid,
        tag_ids: &[Uuid],
        links: &[EventLink],
    ) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::connection(format!("failed to begin: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE "Event" SET "EventTitle" = $2, "EventDescription" = $3, "EventDate" = $4,
                "EventTime" = $5, "EventLocation" = $6, "EventUpdatedAt" = $7
            WHERE "EventID" = $1
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(event.time)
        .bind(&event.location)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error("failed to update event", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("event {}", event.id)));
        }

        sqlx::query(r#"DELETE FROM "EventDepartment" WHERE "EventID" = $1"#)
            .bind(event.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("failed to clear departments", e))?;
        sqlx::query(r#"DELETE FROM "EventTag" WHERE "EventID" = $1"#)
            .bind(event.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("failed to clear tags", e))?;

        insert_associations(&mut tx, event, department_id, tag_ids).await?;

        let keep: Vec<String> = links.iter().map(|l| l.name.to_lowercase()).collect();
        sqlx::query(r#"DELETE FROM "EventLink" WHERE "EventID" = $1 AND NOT (LOWER("EventLinkName") = ANY($2))"#)
            .bind(event.id)
            .bind(&keep)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("failed to prune links", e))?;

        for link in links {
            let updated = sqlx::query(
                r#"UPDATE "EventLink" SET "EventLinkURL" = $3 WHERE "EventID" = $1 AND LOWER("EventLinkName") = LOWER($2)"#,
            )
            .bind(event.id)
            .bind(&link.name)
            .bind(&link.url)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("failed to update link", e))?;

            if updated.rows_affected() == 0 {
                insert_link(&mut tx, link).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::write(format!("failed to commit event: {e}")))
    }

    async fn get_event(&self, id: Uuid) -> StorageResult<Option<EventDetail>> {
        let Some(row) = sqlx::query(r#"SELECT * FROM "Event" WHERE "EventID" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to get event", e))?
        else {
            return Ok(None);
        };
        let event = row_to_event(&row)?;

        let departments = sqlx::query(
            r#"SELECT d.* FROM "Department" d JOIN "EventDepartment" ed ON ed."DepartmentID" = d."DepartmentID"
               WHERE ed."EventID" = $1 ORDER BY ed."EventDepartmentAssignedAt""#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error("failed to load departments", e))?;

        let tags = sqlx::query(
            r#"SELECT t.* FROM "Tag" t JOIN "EventTag" et ON et."TagID" = t."TagID"
               WHERE et."EventID" = $1 ORDER BY et."EventTagAssignedAt", t."TagName""#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error("failed to load tags", e))?;

        let links = sqlx::query(r#"SELECT * FROM "EventLink" WHERE "EventID" = $1 ORDER BY "EventLinkName""#)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to load links", e))?;

        Ok(Some(EventDetail {
            event,
            departments: map_rows(&departments, row_to_department)?,
            tags: map_rows(&tags, row_to_tag)?,
            links: map_rows(&links, row_to_link)?,
        }))
    }

    async fn event_exists(
        &self,
        title: &str,
        date: NaiveDate,
        department_id: Uuid,
    ) -> StorageResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM "Event" e
                JOIN "EventDepartment" ed ON ed."EventID" = e."EventID"
                WHERE LOWER(e."EventTitle") = LOWER($1) AND e."EventDate" = $2 AND ed."DepartmentID" = $3
            )
            "#,
        )
        .bind(title)
        .bind(date)
        .bind(department_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| read_error("failed duplicate check", e))
    }

    async fn search_events(
        &self,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<(Vec<Event>, usize)> {
        assert!(limit > 0, "limit must be positive");
        assert!(limit <= LIST_LIMIT_MAX, "limit cannot exceed {}", LIST_LIMIT_MAX);

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_event_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| read_error("failed to count events", e))?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT e.*");
        push_event_filter(&mut qb, filter);
        qb.push(r#" ORDER BY e."EventDate" DESC, e."EventTime" DESC, e."EventID" LIMIT "#)
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to search events", e))?;

        let events = map_rows(&rows, row_to_event)?;

        // Postcondition
        assert!(events.len() <= limit, "result count {} exceeds limit {}", events.len(), limit);

        Ok((events, usize::try_from(total).unwrap_or(0)))
    }

    async fn quick_search(&self, query: &str, limit: usize) -> StorageResult<Vec<Event>> {
        assert!(limit > 0, "limit must be positive");

        let pattern = like_pattern(query);
        let rows = sqlx::query(
            r#"
            SELECT * FROM "Event"
            WHERE "EventTitle" ILIKE $1 OR "EventLocation" ILIKE $1
            ORDER BY "EventDate" DESC, "EventTime" DESC, "EventID"
            LIMIT $2
            "#,
        )
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| read_error("failed to search", e))?;

        map_rows(&rows, row_to_event)
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query(r#"SELECT * FROM "Event" ORDER BY "EventCreatedAt" DESC, "EventID" LIMIT $1"#)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to list recent events", e))?;

        map_rows(&rows, row_to_event)
    }

    async fn insert_backup(&self, backup: &BackupHistory) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO "BackupHistory" ("BackupHistoryID", "BackupName", "BackupStatus",
                "BackupTimestamp", "BackupSize", "BackupLogFile", "BackupFile")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(backup.id)
        .bind(&backup.name)
        .bind(backup.status.as_str())
        .bind(backup.timestamp)
        .bind(&backup.size)
        .bind(&backup.log_key)
        .bind(&backup.file_key)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("failed to record backup", e))?;
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> StorageResult<Option<BackupHistory>> {
        let row = sqlx::query(r#"SELECT * FROM "BackupHistory" WHERE "BackupHistoryID" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to get backup", e))?;

        row.as_ref().map(row_to_backup).transpose()
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupHistory>> {
        let rows = sqlx::query(r#"SELECT * FROM "BackupHistory" ORDER BY "BackupTimestamp" DESC"#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to list backups", e))?;

        map_rows(&rows, row_to_backup)
    }

    async fn insert_restore(&self, operation: &RestoreOperation) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO "RestoreOperation" ("RestoreID", "BackupHistoryID", "RestoreStatus",
                "RestoreProgress", "RestoreMessage", "RestoreStartedAt", "RestoreCompletedAt")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(operation.id)
        .bind(operation.backup_id)
        .bind(operation.status.as_str())
        .bind(operation.progress)
        .bind(&operation.message)
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("failed to record restore", e))?;
        Ok(())
    }

    async fn update_restore(&self, operation: &RestoreOperation) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE "RestoreOperation" SET "RestoreStatus" = $2, "RestoreProgress" = $3,
                "RestoreMessage" = $4, "RestoreCompletedAt" = $5
            WHERE "RestoreID" = $1
            "#,
        )
        .bind(operation.id)
        .bind(operation.status.as_str())
        .bind(operation.progress)
        .bind(&operation.message)
        .bind(operation.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("failed to update restore", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("restore {}", operation.id)));
        }
        Ok(())
    }

    async fn get_restore(&self, id: Uuid) -> StorageResult<Option<RestoreOperation>> {
        let row = sqlx::query(r#"SELECT * FROM "RestoreOperation" WHERE "RestoreID" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| read_error("failed to get restore", e))?;

        row.as_ref().map(row_to_restore).transpose()
    }

    async fn list_restores(&self) -> StorageResult<Vec<RestoreOperation>> {
        let rows = sqlx::query(r#"SELECT * FROM "RestoreOperation" ORDER BY "RestoreStartedAt" DESC"#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| read_error("failed to list restores", e))?;

        map_rows(&rows, row_to_restore)
    }
}

async fn insert_associations(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    event: &Event,
    department_id: Uuid,
    tag_ids: &[Uuid],
) -> StorageResult<()> {
    let assigned_at: DateTime<Utc> = event.updated_at;

    sqlx::query(
        r#"INSERT INTO "EventDepartment" ("EventDepartmentID", "EventID", "DepartmentID", "EventDepartmentAssignedAt")
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(Uuid::new_v4())
    .bind(event.id)
    .bind(department_id)
    .bind(assigned_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error("failed to link department", e))?;

    for tag_id in tag_ids {
        sqlx::query(
            r#"INSERT INTO "EventTag" ("EventTagID", "EventID", "TagID", "EventTagAssignedAt")
               VALUES ($1, $2, $3, $4) ON CONFLICT ("EventID", "TagID") DO NOTHING"#,
        )
        .bind(Uuid::new_v4())
        .bind(event.id)
        .bind(tag_id)
        .bind(assigned_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| write_error("failed to link tag", e))?;
    }

    Ok(())
}

async fn insert_link(tx: &mut sqlx::Transaction<'_, Postgres>, link: &EventLink) -> StorageResult<()> {
    sqlx::query(
        r#"INSERT INTO "EventLink" ("EventLinkID", "EventID", "EventLinkName", "EventLinkURL")
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(link.id)
    .bind(link.event_id)
    .bind(&link.name)
    .bind(&link.url)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error("failed to insert link", e))?;
    Ok(())
}

// =============================================================================
// Tests (require running Postgres)
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Get test database URL from environment.
    fn test_db_url() -> Option<String> {
        env::var("TEST_POSTGRES_URL").ok()
    }

    /// Skip test if no database available.
    macro_rules! require_db {
        () => {
            match test_db_url() {
                Some(url) => url,
                None => {
                    eprintln!("Skipping test: TEST_POSTGRES_URL not set");
                    return;
                }
            }
        };
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }

    #[tokio::test]
    async fn test_postgres_backend_connection() {
        let url = require_db!();

        let backend = PostgresBackend::new(&url).await;
        assert!(backend.is_ok(), "should connect to database");

        backend.unwrap().close().await;
    }

    #[tokio::test]
    async fn test_postgres_department_and_event_roundtrip() {
        let url = require_db!();
        let backend = PostgresBackend::new(&url).await.unwrap();

        let department = Department::new(format!("Dept {}", Uuid::new_v4()));
        backend.insert_department(&department).await.unwrap();

        let duplicate = Department {
            id: Uuid::new_v4(),
            name: department.name.clone(),
        };
        assert!(matches!(
            backend.insert_department(&duplicate).await,
            Err(StorageError::Conflict(_))
        ));

        let tag = backend.get_or_create_tag(&format!("tag-{}", Uuid::new_v4())).await.unwrap();
        let event = Event::new(
            "Roundtrip".to_string(),
            "Stored and loaded".to_string(),
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            "Auditorium".to_string(),
            Utc::now(),
        );
        backend.create_event(&event, department.id, &[tag.id], &[]).await.unwrap();

        let detail = backend.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(detail.event.title, "Roundtrip");
        assert_eq!(detail.departments, vec![department.clone()]);
        assert_eq!(detail.tags, vec![tag]);

        assert!(backend
            .event_exists("ROUNDTRIP", event.date, department.id)
            .await
            .unwrap());

        backend.delete_department(department.id).await.unwrap();
        backend.close().await;
    }
}
