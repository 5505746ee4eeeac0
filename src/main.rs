//! BANKROLL: Betting Ledger & Settlement Engine
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the SQLite ledger, and runs the outcome scheduler until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use bankroll::config::AppConfig;
use bankroll::engine::scheduler::OutcomeScheduler;
use bankroll::engine::BettingEngine;
use bankroll::storage::{LedgerStore, SqliteStore};

const BANNER: &str = r#"
 ___   _   _  _ _  _____  ___  _    _
| _ ) /_\ | \| | |/ / _ \/ _ \| |  | |
| _ \/ _ \| .` | ' <|   / (_) | |__| |__
|___/_/ \_\_|\_|_|\_\_|_\\___/|____|____|

  Betting Ledger & Settlement Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path = std::env::var("BANKROLL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load_or_default(&config_path)?;

    println!("{BANNER}");
    info!(
        config = %config_path,
        database_url = %cfg.ledger.database_url,
        opening_balance = %cfg.ledger.opening_balance,
        "BANKROLL starting up"
    );

    // -- Ledger ----------------------------------------------------------

    let store = SqliteStore::connect(
        &cfg.ledger.database_url,
        cfg.ledger.max_connections,
        cfg.ledger.lock_timeout(),
    )
    .await
    .with_context(|| format!("Failed to open ledger at {}", cfg.ledger.database_url))?;
    let store: Arc<dyn LedgerStore> = Arc::new(store);

    let pending = store.list_pending().await.context("Failed to read pending wagers")?;
    info!(pending = pending.len(), "Ledger opened");

    let engine = Arc::new(BettingEngine::with_config(store, cfg.engine_config()));

    // -- Scheduler -------------------------------------------------------

    let scheduler = if cfg.scheduler.enabled {
        let oracle = cfg.build_oracle()?;
        Some(OutcomeScheduler::start(engine.clone(), oracle, cfg.scheduler_config()))
    } else {
        warn!("Outcome scheduler disabled; wagers resolve only through manual settlement");
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    if let Some(handle) = scheduler {
        handle.stop().await;
    }

    info!("BANKROLL shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bankroll=info"));

    let json_logging = std::env::var("BANKROLL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
