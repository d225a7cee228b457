//! Arcasys - Marketing Event Archive
//!
//! Binary entry point: loads `.env`, reads configuration, wires the backends,
//! and runs one subcommand.
//!
//! Without a database the server runs on the in-memory backend, which is
//! enough to click through the UI but loses everything on exit.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use arcasys::accounts::{AccountService, AccountSettings, TokenSigner};
use arcasys::backup::{BackupService, BackupSettings, Dumper, OutcomeStatus, PgDump, UnconfiguredDumper};
use arcasys::clock::{Clock, SystemClock};
use arcasys::config::{Config, ObjectStoreConfig};
use arcasys::events::EventService;
use arcasys::http::{self, AppState, HTTP_BIND_ADDRESS_DEFAULT};
use arcasys::mail::{LogMailer, Mailer, SendGridMailer};
use arcasys::objstore::{FsObjectStore, ObjectStore, S3ObjectStore, UnconfiguredObjectStore};
use arcasys::restore::{PostgresRestoreTarget, RestoreService, RestoreTarget, UnconfiguredRestoreTarget};
use arcasys::storage::{PostgresBackend, SimStorageBackend, StorageBackend};
use arcasys::{APP_NAME, APP_VERSION};

// =============================================================================
// CLI
// =============================================================================

/// Arcasys - Marketing Event Archive
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Marketing event archive with staff approval and database backups")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// HTTP API bind address
        #[arg(short, long, default_value = HTTP_BIND_ADDRESS_DEFAULT)]
        bind: String,
    },

    /// Take one backup now and exit
    Backup,

    /// Create an active administrator account
    CreateAdmin {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        /// Read from ARCASYS_ADMIN_PASSWORD when omitted
        #[arg(long, env = "ARCASYS_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Connect to the database and create the schema
    InitDb,
}

// =============================================================================
// Wiring
// =============================================================================

/// Storage plus the pieces that need a real database.
struct Backends {
    storage: Arc<dyn StorageBackend>,
    dumper: Arc<dyn Dumper>,
    restore_target: Arc<dyn RestoreTarget>,
}

async fn connect_backends(config: &Config) -> anyhow::Result<Backends> {
    match &config.database {
        Some(params) => {
            tracing::info!(host = %params.host, database = %params.name, "Using PostgreSQL storage");
            let backend = PostgresBackend::new(&params.url())
                .await
                .context("failed to connect to PostgreSQL")?;
            let pool = backend.pool().clone();
            Ok(Backends {
                storage: Arc::new(backend),
                dumper: Arc::new(PgDump::new(config.pg_dump_path.clone(), params.clone())),
                restore_target: Arc::new(PostgresRestoreTarget::new(pool)),
            })
        }
        None => {
            tracing::warn!(
                "No database configured (DATABASE_URL or DB_HOST/DB_NAME); using in-memory storage. \
                 Backups and restores are disabled."
            );
            Ok(Backends {
                storage: Arc::new(SimStorageBackend::new()),
                dumper: Arc::new(UnconfiguredDumper),
                restore_target: Arc::new(UnconfiguredRestoreTarget),
            })
        }
    }
}

fn object_store(config: &Config, clock: Arc<dyn Clock>) -> Arc<dyn ObjectStore> {
    match &config.object_store {
        ObjectStoreConfig::S3(s3) => {
            tracing::info!(bucket = %s3.bucket, region = %s3.region, "Using S3 object storage");
            Arc::new(S3ObjectStore::new(s3.clone(), clock))
        }
        ObjectStoreConfig::Filesystem(root) => {
            tracing::info!(root = %root.display(), "Using filesystem object storage");
            Arc::new(FsObjectStore::new(root.clone()))
        }
        ObjectStoreConfig::Unconfigured => {
            tracing::warn!("AWS credentials or bucket missing; backup uploads will fail");
            Arc::new(UnconfiguredObjectStore)
        }
    }
}

fn mailer(config: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    match &config.sendgrid_api_key {
        Some(key) => {
            let mailer = SendGridMailer::new(key.clone(), config.default_from_email.clone())
                .context("failed to build SendGrid client")?;
            Ok(Arc::new(mailer))
        }
        None => {
            tracing::warn!("SENDGRID_API_KEY not set; emails will be logged, not sent");
            Ok(Arc::new(LogMailer))
        }
    }
}

async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = connect_backends(config).await?;
    let objects = object_store(config, clock.clone());

    let accounts = AccountService::new(
        backends.storage.clone(),
        mailer(config)?,
        clock.clone(),
        TokenSigner::new(&config.secret_key),
        AccountSettings {
            allowed_email_domains: config.allowed_email_domains.clone(),
            session_ttl_secs: config.session_ttl_secs,
            password_reset_ttl_secs: config.password_reset_ttl_secs,
            public_base_url: config.public_base_url.clone(),
            display_offset: config.display_offset,
        },
    );
    let events = EventService::new(backends.storage.clone(), clock.clone());
    let backups = BackupService::new(
        backends.storage.clone(),
        objects.clone(),
        backends.dumper,
        clock.clone(),
        BackupSettings {
            backup_dir: config.backup_dir.clone(),
            log_dir: config.log_dir.clone(),
            display_offset: config.display_offset,
        },
    );
    let restores = Arc::new(RestoreService::new(
        backends.storage,
        objects,
        backends.restore_target,
        clock,
    ));

    Ok(AppState {
        accounts,
        events,
        backups,
        restores,
    })
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info,tower_http=debug",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    tracing::info!("Arcasys v{}", APP_VERSION);

    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Serve { bind } => {
            let state = Arc::new(build_state(&config).await?);

            let recovered = state.restores.recover_interrupted().await?;
            if recovered > 0 {
                tracing::warn!(recovered, "Marked interrupted restores as failed");
            }

            let addr: std::net::SocketAddr = bind.parse().context("invalid bind address")?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("Starting HTTP server on {}", addr);
            http::serve(listener, state).await?;
        }
        Command::Backup => {
            let state = build_state(&config).await?;
            let outcome = state.backups.run_backup().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.status == OutcomeStatus::Error {
                anyhow::bail!("{}", outcome.message);
            }
        }
        Command::CreateAdmin {
            email,
            name,
            password,
        } => {
            let state = build_state(&config).await?;
            let user = state.accounts.create_admin(&email, &name, &password).await?;
            println!("Created administrator {} ({})", user.full_name, user.email);
        }
        Command::InitDb => {
            anyhow::ensure!(
                config.database.is_some(),
                "no database configured; set DATABASE_URL or DB_HOST and DB_NAME"
            );
            // Connecting creates the schema.
            connect_backends(&config).await?;
            tracing::info!("Database schema is up to date");
        }
    }

    Ok(())
}
