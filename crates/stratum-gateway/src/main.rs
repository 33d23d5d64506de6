//! Stratum gateway binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stratum_core::storage::RecordStore;
use stratum_core::{compile, MemoryStore, PoolConfig, RecordService, StoragePool};
use stratum_gateway::{create_router, AppState, Args, GatewayConfig, StorageBackend};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = GatewayConfig::from(&args);

    let schema = config.load_schema()?;
    let app = Arc::new(compile(&schema).context("compiling schema")?);
    let plan = app.migration_plan();

    if config.print_ddl {
        println!("{plan}");
        return Ok(());
    }

    if config.pool_size == 0 {
        anyhow::bail!("pool_size must be at least 1");
    }

    let store: Arc<dyn RecordStore> = match &config.storage {
        StorageBackend::Memory => {
            warn!("using in-memory storage; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres(url) => {
            let store = stratum_core::storage::PgStore::connect(url, config.pool_size as u32).await?;
            store.migrate(&plan).await?;
            Arc::new(store)
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres(_) => {
            anyhow::bail!("PostgreSQL storage requires the `postgres` feature");
        }
    };

    let pool_config = PoolConfig::default()
        .with_max_leases(config.pool_size)
        .with_acquire_timeout(config.acquire_timeout)
        .with_call_timeout(config.call_timeout);
    let service = RecordService::new(app.clone(), StoragePool::new(store, pool_config));

    if config.jwt_secret.is_none() {
        warn!("no JWT secret configured; only anonymous requests are accepted");
    }

    let state = AppState::new(service, &config);
    let router = create_router(state);

    info!(
        listen = %config.listen_addr,
        app = %app.name(),
        tables = app.tables().len(),
        "Starting Stratum gateway"
    );
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
