use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qg_core::AdmissionPolicy;

mod api;
mod audit;
mod cache;
mod config;
mod executor;
mod gate;
mod ledger;
mod router;

use audit::AuditLog;
use cache::ResultCache;
use config::Config;
use executor::memory::MemoryExecutor;
use executor::pool::PooledExecutor;
use executor::QueryExecutor;
use gate::credentials::MemoryCredentialStore;
use gate::AccessGate;
use ledger::{JobLedger, MemoryLedger};
use router::ExecutionRouter;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "qg-hub",
    version = "0.1.0",
    about = "QUERYGATE admission control and routing service"
)]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "qg-hub.toml")]
    config: PathBuf,

    /// JSON table fixtures served by the in-memory executor
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    start_time: Instant,
    router: ExecutionRouter,
    ledger: Arc<dyn JobLedger>,
    credentials: Arc<MemoryCredentialStore>,
    cache: Arc<ResultCache>,
    executor: Arc<PooledExecutor>,
    audit: Arc<AuditLog>,
}

impl AppState {
    /// Wire every component from `config` around `backend`.
    pub async fn from_config(
        config: &Config,
        backend: Arc<dyn QueryExecutor>,
    ) -> Result<Self, String> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        for seed in &config.credentials {
            credentials
                .upsert(&seed.enterprise, &seed.service, &seed.token, seed.active)
                .await
                .map_err(|e| format!("credential {}/{}: {}", seed.enterprise, seed.service, e))?;
        }

        let gate = Arc::new(AccessGate::new(
            config.access.labels.clone(),
            config.integrations.clone(),
            credentials.clone(),
        ));
        let cache = Arc::new(ResultCache::in_memory(config.cache.ttl()));
        let executor = Arc::new(PooledExecutor::new(
            backend,
            config.executor.max_connections,
            Duration::from_millis(config.executor.timeout_ms),
        ));
        let ledger: Arc<dyn JobLedger> = Arc::new(MemoryLedger::new());
        let audit = Arc::new(AuditLog::new(config.audit.capacity));

        let router = ExecutionRouter::new(
            gate,
            Arc::new(config.signals.extractor()),
            AdmissionPolicy::new(config.admission.realtime_threshold_secs),
            cache.clone(),
            executor.clone(),
            ledger.clone(),
            audit.clone(),
        );

        Ok(Self {
            start_time: Instant::now(),
            router,
            ledger,
            credentials,
            cache,
            executor,
            audit,
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "qg_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let backend: Arc<dyn QueryExecutor> = match &args.fixtures {
        Some(path) => match MemoryExecutor::from_json_file(path) {
            Ok(executor) => {
                tracing::info!(tables = ?executor.table_names().await, "Loaded fixtures");
                Arc::new(executor)
            }
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("No --fixtures given, every table lookup will fail");
            Arc::new(MemoryExecutor::new())
        }
    };

    let state = match AppState::from_config(&config, backend).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to initialise: {}", e);
            std::process::exit(1);
        }
    };

    cache::spawn_sweeper(state.cache.clone(), config.cache.sweep_interval());

    let app = api::routes(state);

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {}", args.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  QUERYGATE v0.1.0");
    tracing::info!("  API:        http://{}/api/status", addr);
    tracing::info!("  Submit:     http://{}/api/v1/sql-query/execute", addr);
    tracing::info!("  Real-time:  <= {}s", config.admission.realtime_threshold_secs);
    tracing::info!("  Cache TTL:  {}s", config.cache.ttl_secs);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
