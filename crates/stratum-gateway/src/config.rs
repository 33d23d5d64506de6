//! Gateway configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use stratum_core::AppSchema;

/// Stratum record API command line arguments.
#[derive(Debug, Parser)]
#[command(name = "stratum-gateway")]
#[command(about = "HTTP record API for Stratum applications")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Path of the application schema (JSON).
    #[arg(short, long)]
    pub schema: PathBuf,

    /// HS256 secret used to verify bearer tokens.
    #[arg(long, env = "STRATUM_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Storage backend: `memory` or a `postgres://` URL.
    #[arg(long, default_value = "memory")]
    pub storage: StorageBackend,

    /// Maximum number of concurrent storage leases.
    #[arg(long, default_value_t = 16)]
    pub pool_size: usize,

    /// Timeout (ms) when acquiring a storage lease.
    #[arg(long, default_value_t = 5_000)]
    pub acquire_timeout_ms: u64,

    /// Timeout (ms) of a single storage call.
    #[arg(long, default_value_t = 10_000)]
    pub call_timeout_ms: u64,

    /// Print the migration plan for the schema and exit.
    #[arg(long)]
    pub print_ddl: bool,
}

/// Where records are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory; lost on restart.
    Memory,
    /// PostgreSQL at the given URL.
    Postgres(String),
}

/// A storage value that is neither `memory` nor a PostgreSQL URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported storage backend {0:?}: expected `memory` or a postgres:// URL")]
pub struct UnsupportedStorage(pub String);

impl FromStr for StorageBackend {
    type Err = UnsupportedStorage;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "memory" {
            Ok(StorageBackend::Memory)
        } else if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            Ok(StorageBackend::Postgres(raw.to_string()))
        } else {
            Err(UnsupportedStorage(raw.to_string()))
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Path of the application schema.
    pub schema_path: PathBuf,
    /// Bearer token secret; without one every request is anonymous.
    pub jwt_secret: Option<String>,
    /// Storage backend.
    pub storage: StorageBackend,
    /// Maximum number of concurrent storage leases.
    pub pool_size: usize,
    /// Timeout when acquiring a storage lease.
    pub acquire_timeout: Duration,
    /// Timeout of a single storage call.
    pub call_timeout: Duration,
    /// Print the migration plan and exit.
    pub print_ddl: bool,
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            schema_path: args.schema.clone(),
            jwt_secret: args.jwt_secret.clone().filter(|s| !s.is_empty()),
            storage: args.storage.clone(),
            pool_size: args.pool_size,
            acquire_timeout: Duration::from_millis(args.acquire_timeout_ms),
            call_timeout: Duration::from_millis(args.call_timeout_ms),
            print_ddl: args.print_ddl,
        }
    }
}

impl GatewayConfig {
    /// Read and parse the application schema at `schema_path`.
    pub fn load_schema(&self) -> anyhow::Result<AppSchema> {
        let raw = std::fs::read_to_string(&self.schema_path)
            .with_context(|| format!("reading schema {}", self.schema_path.display()))?;
        AppSchema::from_json(&raw)
            .with_context(|| format!("parsing schema {}", self.schema_path.display()))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            schema_path: PathBuf::from("schema.json"),
            jwt_secret: None,
            storage: StorageBackend::Memory,
            pool_size: 16,
            acquire_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            print_ddl: false,
        }
    }
}
