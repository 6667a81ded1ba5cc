//! rqs-scanner - receipt QR scanner service
//!
//! Accepts decoded fiscal QR texts over HTTP, stores them and keeps fetching
//! the full receipts from the tax authorities in the background.

use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rqs_common::config::{self, TomlConfig};
use rqs_common::db::{init_database, ReceiptStore};
use rqs_common::events::EventBus;
use rqs_common::receipts::DomainCode;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rqs_scanner::api::health::BUILD_INFO;
use rqs_scanner::clients::ru_fns::DeviceIdentity;
use rqs_scanner::clients::ru_fns_session::SessionStore;
use rqs_scanner::clients::{
    ClientRegistry, FetchClient, KgGnsClient, KzJusClient, KzKtcClient, KzTtcClient, RuFnsClient,
};
use rqs_scanner::domains::DomainRegistry;
use rqs_scanner::scheduler::Scheduler;
use rqs_scanner::{AppState, EVENT_BUS_CAPACITY};

/// Command-line arguments for rqs-scanner
#[derive(Parser, Debug)]
#[command(name = "rqs-scanner")]
#[command(about = "Receipt QR scanner: stores fiscal QR references and fetches the receipts")]
#[command(version)]
struct Args {
    /// Folder with the database and the ru-fns session
    #[arg(long, global = true)]
    data_folder: Option<PathBuf>,

    /// Config file (default: <config dir>/rqs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and the scheduler (default)
    Serve,
    /// Create the ru-fns session from a mobile app refresh token
    InitSession {
        refresh_token: String,
        client_secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(args.config.as_deref()).context("Failed to load config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_folder = config::resolve_data_folder(args.data_folder.as_deref(), &config);
    info!("Data folder: {}", data_folder.display());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &data_folder, args.addr.as_deref()).await,
        Command::InitSession {
            refresh_token,
            client_secret,
        } => init_session(&config, &data_folder, &refresh_token, &client_secret).await,
    }
}

async fn init_session(config: &TomlConfig, data_folder: &Path, refresh_token: &str, client_secret: &str) -> Result<()> {
    let store = SessionStore::in_folder(data_folder);
    let client = RuFnsClient::new(DeviceIdentity::resolve(&config.ru_fns), store.clone())
        .context("Failed to build ru-fns client")?;

    client
        .init_session(refresh_token, client_secret)
        .await
        .context("Failed to initialise ru-fns session")?;

    info!("ru-fns session saved to {}", store.path().display());
    Ok(())
}

async fn serve(config: &TomlConfig, data_folder: &Path, addr_arg: Option<&str>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = BUILD_INFO.git_hash,
        built = BUILD_INFO.timestamp,
        profile = BUILD_INFO.profile,
        "Starting rqs-scanner"
    );

    let domains = DomainRegistry::new(config.enabled_domains()).context("Invalid domain list")?;
    info!(domains = ?domains.codes(), "Enabled domains");

    let db_path = config::database_path(data_folder);
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let store = ReceiptStore::new(pool);

    let clients = build_clients(config, data_folder, domains.codes()).await?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let scheduler = Scheduler::new(store.clone(), clients, event_bus.clone())
        .with_batch_size(config.scheduler.batch_size);
    let scheduler_handle = scheduler.handle();
    let mut scheduler_task = tokio::spawn(scheduler.run());

    let state = AppState::new(store, event_bus, scheduler_handle, domains);
    let app = rqs_scanner::build_router(state);

    let addr = config::resolve_listen_addr(addr_arg, config);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => {
            result.context("Server error")?;
            info!("Server shutdown complete");
            Ok(())
        }
        joined = &mut scheduler_task => {
            let reason = match joined {
                Ok(Ok(())) => "scheduler stopped".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("scheduler task failed: {}", e),
            };
            error!(reason = %reason, "Scheduler stopped, shutting down");
            anyhow::bail!("scheduler stopped: {}", reason)
        }
    }
}

async fn build_clients(config: &TomlConfig, data_folder: &Path, domains: &[DomainCode]) -> Result<ClientRegistry> {
    let mut clients: Vec<Arc<dyn FetchClient>> = Vec::with_capacity(domains.len());

    for &domain in domains {
        let client: Arc<dyn FetchClient> = match domain {
            DomainCode::RuFns => {
                let client = RuFnsClient::new(
                    DeviceIdentity::resolve(&config.ru_fns),
                    SessionStore::in_folder(data_folder),
                )
                .context("Failed to build ru-fns client")?;
                match client.load_session().await {
                    Ok(true) => info!("ru-fns session loaded"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "ru-fns session unusable, ru-fns receipts will wait"),
                }
                Arc::new(client)
            }
            DomainCode::KgGns => Arc::new(KgGnsClient::new().context("Failed to build kg-gns client")?),
            DomainCode::KzKtc => Arc::new(KzKtcClient::new().context("Failed to build kz-ktc client")?),
            DomainCode::KzJus => Arc::new(KzJusClient::new().context("Failed to build kz-jus client")?),
            DomainCode::KzTtc => Arc::new(KzTtcClient::new().context("Failed to build kz-ttc client")?),
        };
        clients.push(client);
    }

    ClientRegistry::new(clients).context("Failed to build client registry")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
