//! HTTP API
//!
//! TigerStyle: JSON in and out, stateless bearer tokens, one error type.

mod extract;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::AccountService;
use crate::backup::BackupService;
use crate::events::EventService;
use crate::restore::RestoreService;

pub use extract::{AdminUser, CurrentUser, MaybeUser};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Default HTTP bind address
pub const HTTP_BIND_ADDRESS_DEFAULT: &str = "127.0.0.1:8000";

/// How long browsers may cache a CORS preflight
pub const CORS_MAX_AGE_SECS: u64 = 60 * 60;

// =============================================================================
// State
// =============================================================================

/// Everything a handler can reach.
pub struct AppState {
    pub accounts: AccountService,
    pub events: EventService,
    pub backups: BackupService,
    pub restores: Arc<RestoreService>,
}

pub type SharedState = Arc<AppState>;

// =============================================================================
// Router
// =============================================================================

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECS));

    Router::new()
        .route("/health", get(handlers::health))
        // Accounts
        .route("/users/register", post(handlers::register))
        .route("/users/login", post(handlers::login))
        .route("/users/me", get(handlers::me))
        .route("/users/password-reset", post(handlers::password_reset))
        .route(
            "/users/password-reset/confirm",
            post(handlers::password_reset_confirm),
        )
        // Events
        .route("/events/", get(handlers::list_events))
        .route("/events/search/", get(handlers::search_events))
        .route("/events/add/", post(handlers::add_event))
        .route("/events/:id/", get(handlers::get_event))
        .route("/events/edit/:id/", post(handlers::edit_event))
        // Admin approval
        .route(
            "/events/admin-approval/",
            get(handlers::pending_applications),
        )
        .route(
            "/events/admin-approval/approve/:id/",
            post(handlers::approve_application),
        )
        .route(
            "/events/admin-approval/reject/:id/",
            post(handlers::reject_application),
        )
        // Backups and restores
        .route("/events/backup-history/", get(handlers::backup_history))
        .route("/events/backup-dashboard/", get(handlers::backup_dashboard))
        .route("/events/run-backup/", post(handlers::run_backup))
        .route(
            "/events/download-backup/:id/",
            get(handlers::download_backup),
        )
        .route("/events/view-log/:id/", get(handlers::view_log))
        .route("/events/restore/", get(handlers::restore_operations))
        .route("/events/restore-full/", post(handlers::restore_full))
        .route(
            "/events/check-restore-status/:id/",
            get(handlers::check_restore_status),
        )
        // Departments
        .route("/events/departments/", get(handlers::list_departments))
        .route("/events/departments/add/", post(handlers::add_department))
        .route(
            "/events/departments/delete/:id/",
            post(handlers::delete_department),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
