// =============================================================================
// Meridian Futures Engine — Main Entry Point
// =============================================================================
//
// Without a linked brokerage SDK the engine runs against the in-process
// simulated broker, which accepts the whole login sequence and queues every
// order. The production transport binding replaces `SimBroker` at the
// `BrokerTransport` seam; nothing else changes.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alert;
mod audit;
mod clock;
mod config;
mod emergency;
mod engine;
mod market;
mod monitor;
mod session;
mod strategy;
mod types;
mod validator;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::AuditLog;
use crate::config::Settings;
use crate::engine::TradingEngine;
use crate::session::transport::SimBroker;

const SETTINGS_PATH: &str = "meridian.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Futures Engine — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut settings = Settings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        Settings::default()
    });

    // Credential overrides from the environment.
    if let Ok(investor_id) = std::env::var("MERIDIAN_INVESTOR_ID") {
        settings.connection.investor_id = investor_id;
    }
    if let Ok(password) = std::env::var("MERIDIAN_PASSWORD") {
        settings.connection.password = password;
    }
    if let Ok(broker_id) = std::env::var("MERIDIAN_BROKER_ID") {
        settings.connection.broker_id = broker_id;
    }
    if let Ok(front) = std::env::var("MERIDIAN_TRADE_FRONT") {
        settings.connection.trade_front = front;
    }

    info!(
        broker_id = %settings.connection.broker_id,
        trade_front = %settings.connection.trade_front,
        ofi_instrument = %settings.strategy.ofi.instrument_id,
        staged_instrument = %settings.strategy.staged.instrument_id,
        "configuration loaded"
    );

    // ── 2. Audit log (constructed once, passed down) ─────────────────────
    let audit = Arc::new(AuditLog::new(
        settings.log.log_dir.clone(),
        settings.log.retention_days,
    )?);

    // ── 3. Transport & engine assembly ───────────────────────────────────
    let transport = Arc::new(SimBroker::new());
    let engine = TradingEngine::new(settings, transport, None, audit.clone());

    // ── 4. Login sequence & validator priming ────────────────────────────
    if let Err(e) = engine.start().await {
        error!(error = %e, "engine start failed");
        engine.shutdown();
        anyhow::bail!("engine start failed: {e}");
    }

    // ── 5. Market-data and fill pipelines ────────────────────────────────
    engine.spawn_pipelines();
    info!("market data and trade pipelines running");

    // ── 6. Periodic status heartbeat ─────────────────────────────────────
    let status_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        interval.tick().await; // swallow the immediate first tick
        loop {
            interval.tick().await;
            if !status_engine.is_running() {
                break;
            }
            let status = status_engine.get_system_status();
            info!(
                connection = %status["connection"]["current_state"],
                orders = %status["order_stats"]["total_order_count"],
                cancels = %status["order_stats"]["total_cancel_count"],
                paused = %status["emergency"]["trading_paused"],
                "status heartbeat"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    engine.shutdown();
    audit.system("process exiting", None);
    info!("Meridian Futures Engine shut down complete.");
    Ok(())
}
