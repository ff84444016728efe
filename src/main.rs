use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use perfserver::core::shared::utils::{create_conn, redact_database_url, run_migrations};
use perfserver::performance::{MemoryStore, PerformanceStore, PgStore};
use perfserver::security::{issue_token, RoleCapabilities};
use perfserver::{run_server, AppConfig, AppState};

#[derive(Parser)]
#[command(name = "perfserver")]
#[command(about = "Performance reviews and goal tracking service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to performance.toml)
    #[arg(long, env = "PERFORMANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,

    /// Keep records in memory instead of PostgreSQL
    #[arg(long)]
    memory: bool,

    /// Seed an employee into the in-memory store, as "First Last" (repeatable)
    #[arg(long = "employee", requires = "memory")]
    employees: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a signed bearer token for local testing
    Token {
        #[arg(long)]
        sub: String,

        #[arg(long = "role")]
        roles: Vec<String>,

        #[arg(long = "capability")]
        capabilities: Vec<String>,

        #[arg(long, default_value = "60")]
        ttl_minutes: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.check_jwt_secret(cli.memory)?;
    if config.uses_dev_secret() {
        warn!("No jwt_secret configured, using the built-in development secret for the in-memory store");
    }

    if let Some(Commands::Token {
        sub,
        roles,
        capabilities,
        ttl_minutes,
    }) = cli.command
    {
        let token = issue_token(
            config.jwt_secret(),
            &sub,
            &roles,
            &capabilities,
            chrono::Duration::minutes(ttl_minutes),
        )
        .context("Failed to sign token")?;
        println!("{}", token);
        return Ok(());
    }

    let store: Arc<dyn PerformanceStore> = if cli.memory {
        let store = MemoryStore::new();
        for employee in &cli.employees {
            let (first, last) = employee.split_once(' ').unwrap_or((employee.as_str(), ""));
            let id = store.add_employee(first.trim(), last.trim()).await;
            info!("Seeded employee {} ({})", employee, id);
        }
        info!("Using in-memory store");
        Arc::new(store)
    } else {
        let database_url = config
            .database_url
            .clone()
            .context("database_url is not configured (set PERFORMANCE_DATABASE_URL or DATABASE_URL, or pass --memory)")?;
        let pool = create_conn(&database_url, config.max_connections)?;
        info!("Connected to {}", redact_database_url(&database_url));
        if config.run_migrations {
            run_migrations(&pool)?;
        }
        Arc::new(PgStore::new(pool))
    };

    let capabilities = Arc::new(RoleCapabilities::new(&config.role_capabilities));
    let state = Arc::new(AppState::new(config, store, capabilities));

    run_server(state).await
}
