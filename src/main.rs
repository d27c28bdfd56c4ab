use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_store::{
    api,
    config::Config,
    migration::{MigrationEngine, MigrationOptions, MigrationSummary},
    object_store::LocalStore,
    reconcile::reconcile,
    router::DirectoryRouter,
    service::MediaService,
    storage::Database,
    AppState,
};

/// Content-addressable media store
#[derive(Parser)]
#[command(name = "media-store")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Unify the legacy image and document tables, or undo it
    Migrate {
        /// Drop the unified table and remove the completion marker instead
        #[arg(long)]
        rollback: bool,

        /// Do not take a backup first; a failure will not be restored
        #[arg(long)]
        skip_backup: bool,
    },

    /// Audit the datastore without changing it
    Verify {
        /// Check the post-rollback state instead of the post-migration state
        #[arg(long)]
        after_rollback: bool,
    },

    /// Manage datastore backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Report rows without files and files without rows
    Reconcile,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Copy the live datastore to a new backup
    Create,
    /// List backups, newest first
    List,
    /// Replace the live datastore with a backup
    Restore {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Delete a backup
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Migrate {
            rollback,
            skip_backup,
        } => {
            let engine = MigrationEngine::new(&config);
            let options = MigrationOptions { skip_backup };
            let summary = if rollback {
                engine.rollback(options)?
            } else {
                engine.run(options)?
            };
            report_migration(&summary)
        }
        Commands::Verify { after_rollback } => {
            let report = MigrationEngine::new(&config).verify(after_rollback)?;
            println!("{report}");
            if !report.passed() {
                bail!("verification failed");
            }
            Ok(())
        }
        Commands::Backup { command } => {
            let engine = MigrationEngine::new(&config);
            let backups = engine.backups();
            match command {
                BackupCommands::Create => println!("{}", backups.create()?),
                BackupCommands::List => {
                    let list = backups.list()?;
                    if list.is_empty() {
                        println!("no backups in {}", backups.backup_dir().display());
                    }
                    for backup in list {
                        println!("{backup}");
                    }
                }
                BackupCommands::Restore { name } => {
                    let report = backups.restore(&name)?;
                    println!("restored {}", report.restored);
                    if let Some(previous) = report.previous_state {
                        println!("previous state saved as {previous}");
                    }
                }
                BackupCommands::Delete { name } => {
                    backups.delete(&name)?;
                    println!("deleted {name}");
                }
            }
            Ok(())
        }
        Commands::Reconcile => {
            let db = Database::open(&config.node.data_dir)?;
            let router = DirectoryRouter::new(
                &config.storage.storage_path,
                &config.storage.public_base_url,
            );
            let report = reconcile(&db, &router)?;
            println!("{report}");
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn report_migration(summary: &MigrationSummary) -> Result<()> {
    println!("state: {}", summary.state);
    println!(
        "images migrated: {}, docs migrated: {}, already present: {}",
        summary.record.images_migrated, summary.record.docs_migrated, summary.record.already_present
    );
    match &summary.backup {
        Some(backup) => println!("backup: {backup}"),
        None => println!("backup: skipped"),
    }
    println!("{}", summary.verification);
    if !summary.verification.passed() {
        bail!("{} completed but verification failed", summary.state);
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "media-store starting");

    // Initialize database
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", db.path().display());

    let object_store = LocalStore::new(&config.storage.storage_path)?;
    info!(
        "Using local storage backend at: {}",
        config.storage.storage_path
    );
    let router = DirectoryRouter::new(
        &config.storage.storage_path,
        &config.storage.public_base_url,
    );
    let media = MediaService::new(db.clone(), Arc::new(object_store), router);

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        media,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
