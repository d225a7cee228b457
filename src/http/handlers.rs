//! Route handlers. Each one is a thin adapter over a service call.

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::extract::{AdminUser, CurrentUser, MaybeUser};
use super::SharedState;
use crate::accounts::RegisterForm;
use crate::backup::OutcomeStatus;
use crate::error::AppResult;
use crate::events::{EventForm, ListQuery};
use crate::models::User;

pub const MSG_REGISTERED: &str =
    "Registration successful. Your account is pending administrator approval.";
pub const MSG_RESET_REQUESTED: &str =
    "If an account exists for this email, you will receive password reset instructions.";
pub const MSG_RESET_DONE: &str = "Your password has been set. You may go ahead and log in now.";
pub const MSG_EVENT_CREATED: &str = "Event created successfully.";
pub const MSG_EVENT_UPDATED: &str = "Event updated successfully.";
pub const MSG_RESTORE_STARTED: &str = "Restore started.";

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password1: String,
    #[serde(default)]
    pub new_password2: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub backup_id: Uuid,
}

// =============================================================================
// Health
// =============================================================================

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// =============================================================================
// Users
// =============================================================================

pub async fn register(
    State(state): State<SharedState>,
    Json(form): Json<RegisterForm>,
) -> AppResult<impl IntoResponse> {
    let user = state.accounts.register(form).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": MSG_REGISTERED, "user": user })),
    ))
}

pub async fn login(
    State(state): State<SharedState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.accounts.login(&request.email, &request.password).await?;
    Ok(Json(outcome))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn password_reset(
    State(state): State<SharedState>,
    Json(request): Json<PasswordResetRequest>,
) -> AppResult<impl IntoResponse> {
    state.accounts.request_password_reset(&request.email).await?;
    Ok(Json(json!({ "message": MSG_RESET_REQUESTED })))
}

pub async fn password_reset_confirm(
    State(state): State<SharedState>,
    Json(request): Json<PasswordResetConfirm>,
) -> AppResult<impl IntoResponse> {
    state
        .accounts
        .confirm_password_reset(
            &request.uid,
            &request.token,
            &request.new_password1,
            &request.new_password2,
        )
        .await?;
    Ok(Json(json!({ "message": MSG_RESET_DONE })))
}

// =============================================================================
// Events
// =============================================================================

pub async fn list_events(
    State(state): State<SharedState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let listing = state.events.list(viewer.as_ref(), &query).await?;
    Ok(Json(listing))
}

pub async fn search_events(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<impl IntoResponse> {
    let results = state.events.quick_search(&query.q).await?;
    Ok(Json(json!({ "results": results })))
}

pub async fn get_event(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.events.get(id).await?))
}

pub async fn add_event(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(form): Json<EventForm>,
) -> AppResult<impl IntoResponse> {
    let event = state.events.create(&user, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": MSG_EVENT_CREATED, "event": event })),
    ))
}

pub async fn edit_event(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(form): Json<EventForm>,
) -> AppResult<impl IntoResponse> {
    let event = state.events.edit(&user, id, form).await?;
    Ok(Json(json!({ "message": MSG_EVENT_UPDATED, "event": event })))
}

// =============================================================================
// Admin approval
// =============================================================================

pub async fn pending_applications(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    let applications = state.accounts.pending_applications().await?;
    Ok(Json(json!({ "applications": applications })))
}

pub async fn approve_application(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let user = state.accounts.approve(&admin, user_id).await?;
    Ok(Json(json!({
        "message": format!(
            "Account for {} approved successfully. Approval email has been queued.",
            user.full_name
        ),
        "user": user,
    })))
}

pub async fn reject_application(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let user = state.accounts.reject(&admin, user_id).await?;
    Ok(Json(json!({
        "message": format!(
            "Account for {} rejected. Rejection email has been queued.",
            user.full_name
        ),
    })))
}

// =============================================================================
// Backups and restores
// =============================================================================

pub async fn backup_history(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    let backups = state.backups.list().await?;
    Ok(Json(json!({ "backups": backups })))
}

pub async fn backup_dashboard(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.backups.dashboard().await?))
}

pub async fn run_backup(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    tracing::info!(admin_id = %admin.id, "backup requested");
    let outcome = state.backups.run_backup().await?;
    let status = match outcome.status {
        OutcomeStatus::Success => StatusCode::OK,
        OutcomeStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)))
}

pub async fn download_backup(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let file = state.backups.download(id).await?;
    let disposition = format!("attachment; filename=\"{}\"", file.filename.replace('"', ""));
    Ok((
        [
            (CONTENT_TYPE, "application/sql".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

pub async fn view_log(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let text = state.backups.view_log(id).await?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

pub async fn restore_operations(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    let operations = state.restores.operations().await?;
    let backups = state.backups.restorable().await?;
    Ok(Json(json!({ "operations": operations, "backups": backups })))
}

pub async fn restore_full(
    State(state): State<SharedState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<RestoreRequest>,
) -> AppResult<impl IntoResponse> {
    let started = state.restores.start_restore(&admin, request.backup_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": MSG_RESTORE_STARTED,
            "restore_id": started.operation.id,
            "status": started.operation.status,
        })),
    ))
}

pub async fn check_restore_status(
    State(state): State<SharedState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.restores.status(id).await?))
}

// =============================================================================
// Departments
// =============================================================================

pub async fn list_departments(State(state): State<SharedState>) -> AppResult<impl IntoResponse> {
    let departments = state.events.departments().await?;
    Ok(Json(json!({ "departments": departments })))
}

pub async fn add_department(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<DepartmentRequest>,
) -> AppResult<impl IntoResponse> {
    let department = state.events.add_department(&user, &request.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Department '{}' added.", department.name),
            "department": department,
        })),
    ))
}

pub async fn delete_department(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    state.events.delete_department(&user, id).await?;
    Ok(Json(json!({ "message": "Department deleted." })))
}
