// =============================================================================
// TradingEngine — assembly, routing, and the operator surface
// =============================================================================
//
// Owns every subsystem and the wiring between them:
//
//   session ticks ─► data plane (tick cache / bars / depth) ─► strategies
//   strategy intents ─► validator ─► order monitor ─► session submit
//   monitor events ─► threshold manager ─► alert service
//   session trades ─► order monitor
//
// The submit path enforces the ordering contract: a paused engine submits
// nothing; a validation failure raises a warning alert and never touches
// the counters; the counters are incremented before the transport send, so
// a send failure leaves them incremented (reconciled via the audit log).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use crate::alert::{AlertLevel, AlertService};
use crate::audit::AuditLog;
use crate::clock::TradingClock;
use crate::config::Settings;
use crate::emergency::EmergencyHandler;
use crate::market::bar::DEFAULT_BAR_CAPACITY;
use crate::market::depth::DEFAULT_DEPTH_HISTORY;
use crate::market::tick_cache::DEFAULT_TICK_CAPACITY;
use crate::market::{BarAggregator, BarBuffer, DepthBuffer, TickCache};
use crate::monitor::{ConnectionMonitor, OrderMonitor, ReconnectPolicy, ThresholdManager};
use crate::session::transport::BrokerTransport;
use crate::session::ExchangeSession;
use crate::strategy::ofi::OfiStrategy;
use crate::strategy::staged::{Predictor, StagedStrategy};
use crate::strategy::{ofi, staged, OrderIntent};
use crate::types::{Direction, Offset, Tick};
use crate::validator::OrderValidator;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLEMENT_TIMEOUT: Duration = Duration::from_secs(10);
const INSTRUMENT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-instrument market-data state, owned by the engine's tick task.
struct InstrumentData {
    tick_cache: TickCache,
    depth: DepthBuffer,
    aggregator: BarAggregator,
    bars: BarBuffer,
}

impl InstrumentData {
    fn new() -> Self {
        Self {
            tick_cache: TickCache::new(DEFAULT_TICK_CAPACITY),
            // The feed carries one visible book level.
            depth: DepthBuffer::new(1, DEFAULT_DEPTH_HISTORY),
            aggregator: BarAggregator::new(),
            bars: BarBuffer::new(DEFAULT_BAR_CAPACITY),
        }
    }
}

// =============================================================================
// TradingEngine
// =============================================================================

pub struct TradingEngine {
    settings: Settings,
    clock: TradingClock,
    audit: Arc<AuditLog>,

    pub session: Arc<ExchangeSession>,
    pub validator: Arc<OrderValidator>,
    pub monitor: Arc<OrderMonitor>,
    pub thresholds: Arc<ThresholdManager>,
    pub alerts: Arc<AlertService>,
    pub emergency: Arc<EmergencyHandler>,
    pub connection: Arc<ConnectionMonitor>,

    market: Mutex<HashMap<String, InstrumentData>>,
    ofi: Mutex<OfiStrategy>,
    staged: Mutex<StagedStrategy>,

    running: AtomicBool,
}

impl TradingEngine {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn BrokerTransport>,
        predictor: Option<Arc<dyn Predictor>>,
        audit: Arc<AuditLog>,
    ) -> Arc<Self> {
        let session = ExchangeSession::new(transport, settings.connection.clone(), audit.clone());
        let validator = Arc::new(OrderValidator::new(
            settings.threshold.max_order_volume,
            audit.clone(),
        ));
        let monitor = Arc::new(OrderMonitor::new(audit.clone()));
        let thresholds = Arc::new(ThresholdManager::new(
            settings.threshold.clone(),
            audit.clone(),
        ));
        let alerts = Arc::new(AlertService::new(&settings.alert, audit.clone()));
        let emergency = Arc::new(EmergencyHandler::new(
            session.clone(),
            alerts.clone(),
            audit.clone(),
        ));
        let connection = Arc::new(ConnectionMonitor::new(
            session.clone(),
            ReconnectPolicy::default(),
            audit.clone(),
        ));

        // Counter events drive threshold checks...
        let threshold_hook = thresholds.clone();
        monitor.register_listener(move |action, instrument_id, snapshot| {
            threshold_hook.on_order_event(action, instrument_id, snapshot);
        });

        // ...and threshold breaches surface as operator alerts.
        let alert_hook = alerts.clone();
        thresholds.register_listener(move |alert| {
            alert_hook.send(
                if alert.critical {
                    AlertLevel::Critical
                } else {
                    AlertLevel::Warning
                },
                &format!("threshold breach: {}", alert.kind.as_str()),
                &alert.message,
                "threshold",
                json!({
                    "current_value": alert.current_value,
                    "threshold_value": alert.threshold_value,
                    "instrument_id": alert.instrument_id,
                }),
            );
        });

        let ofi_strategy = OfiStrategy::new(settings.strategy.ofi.clone(), audit.clone());
        let staged_strategy =
            StagedStrategy::new(settings.strategy.staged.clone(), predictor, audit.clone());
        emergency.register_strategy(ofi::STRATEGY_ID, ofi_strategy.run_flag());
        emergency.register_strategy(staged::STRATEGY_ID, staged_strategy.run_flag());

        Arc::new(Self {
            settings,
            clock: TradingClock::new(),
            audit,
            session,
            validator,
            monitor,
            thresholds,
            alerts,
            emergency,
            connection,
            market: Mutex::new(HashMap::new()),
            ofi: Mutex::new(ofi_strategy),
            staged: Mutex::new(staged_strategy),
            running: AtomicBool::new(false),
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect, authenticate, log in, confirm settlement, and prime the
    /// validator's snapshots.
    pub async fn start(self: &Arc<Self>) -> Result<(), crate::session::SessionError> {
        self.audit.system("trading engine starting", None);
        self.connection.start();

        self.session.connect(CONNECT_TIMEOUT).await.map_err(|e| {
            self.alerts
                .critical("connect failed", &e.to_string(), "engine");
            e
        })?;
        self.session.authenticate(AUTH_TIMEOUT).await.map_err(|e| {
            self.alerts
                .critical("authentication failed", &e.to_string(), "engine");
            e
        })?;
        self.session.login(LOGIN_TIMEOUT).await.map_err(|e| {
            self.alerts.critical("login failed", &e.to_string(), "engine");
            e
        })?;

        if let Err(e) = self.session.confirm_settlement(SETTLEMENT_TIMEOUT).await {
            warn!(error = %e, "settlement confirmation failed");
        }

        match self.session.query_instruments(INSTRUMENT_QUERY_TIMEOUT).await {
            Ok(instruments) => {
                info!(count = instruments.len(), "instrument catalogue loaded");
                self.validator.update_instruments(instruments);
            }
            Err(e) => warn!(error = %e, "instrument query failed"),
        }
        if let Ok(Some(account)) = self.session.query_account().await {
            self.validator.update_account(account);
        }
        if let Ok(positions) = self.session.query_positions().await {
            self.validator.update_positions(positions);
        }

        self.running.store(true, Ordering::SeqCst);
        self.audit.system("trading engine started", None);
        self.alerts
            .info("engine started", "session logged in and primed", "engine");
        Ok(())
    }

    /// Subscribe the tick and trade pipelines onto background tasks.
    pub fn spawn_pipelines(self: &Arc<Self>) {
        let engine = self.clone();
        let mut ticks = self.session.subscribe_ticks();
        tokio::spawn(async move {
            loop {
                match ticks.recv().await {
                    Ok(tick) => engine.on_tick(&tick),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "tick pipeline lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let engine = self.clone();
        let mut trades = self.session.subscribe_trades();
        tokio::spawn(async move {
            loop {
                match trades.recv().await {
                    Ok(fill) => {
                        engine.monitor.record_trade(&fill.instrument_id, fill.volume);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Reconciliation: refresh the validator's account and position
        // snapshots from the session once a minute.
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !engine.is_running() {
                    break;
                }
                if !engine.session.is_logged_in() {
                    continue;
                }
                match engine.session.query_account().await {
                    Ok(Some(account)) => engine.validator.update_account(account),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "account reconciliation failed"),
                }
                match engine.session.query_positions().await {
                    Ok(positions) => engine.validator.update_positions(positions),
                    Err(e) => warn!(error = %e, "position reconciliation failed"),
                }
            }
        });
    }

    /// Ordered shutdown: stop the health monitor, close the session.
    pub fn shutdown(&self) {
        self.audit.system("trading engine shutting down", None);
        self.running.store(false, Ordering::SeqCst);
        self.connection.stop();
        self.session.close();
        self.audit.system("trading engine shut down", None);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Tick fan-in (runs on the tick pipeline task)
    // -------------------------------------------------------------------------

    pub fn on_tick(&self, tick: &Tick) {
        {
            let mut market = self.market.lock();
            let data = market
                .entry(tick.instrument_id.clone())
                .or_insert_with(InstrumentData::new);
            data.tick_cache.push(tick.clone());
            data.depth.update_from_tick(tick);
            if let Some(bar) = data.aggregator.on_tick(tick) {
                data.bars.push(bar);
            }
        }

        let mut intents = self.ofi.lock().on_tick(tick);
        intents.extend(self.staged.lock().on_tick(tick));

        for intent in intents {
            // Strategy orders are validated against the exchange timestamp
            // that produced them.
            self.execute_intent(&intent, tick.timestamp);
        }
    }

    fn execute_intent(&self, intent: &OrderIntent, now: NaiveDateTime) -> Option<String> {
        self.submit_order_at(
            intent.direction,
            intent.offset,
            &intent.instrument_id,
            intent.price,
            intent.volume,
            intent.strategy_id,
            now,
        )
    }

    // -------------------------------------------------------------------------
    // The validated submit path
    // -------------------------------------------------------------------------

    fn submit_order_at(
        &self,
        direction: Direction,
        offset: Offset,
        instrument_id: &str,
        price: f64,
        volume: i64,
        source: &str,
        now: NaiveDateTime,
    ) -> Option<String> {
        if self.emergency.is_trading_paused() {
            self.audit.monitor(
                "submission blocked: trading paused",
                Some(json!({ "instrument_id": instrument_id, "source": source })),
            );
            return None;
        }

        let result =
            self.validator
                .validate_order_at(instrument_id, direction, offset, price, volume, now);
        if !result.valid {
            self.alerts
                .warning("order validation failed", &result.message, source);
            return None;
        }

        // Counted before the send; a rejected send leaves the count in place.
        if offset.is_open() {
            self.monitor.record_open(instrument_id);
        } else {
            self.monitor.record_close(instrument_id);
        }

        match self
            .session
            .submit(direction, offset, instrument_id, price, volume)
        {
            Ok(order_ref) => Some(order_ref),
            Err(e) => {
                self.audit.error(
                    "order submission failed after counting",
                    Some(json!({
                        "instrument_id": instrument_id,
                        "source": source,
                        "error": e.to_string(),
                    })),
                );
                self.alerts
                    .warning("submit-failed", &e.to_string(), source);
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Operator surface
    // -------------------------------------------------------------------------

    pub fn open_long(&self, instrument_id: &str, price: f64, volume: i64) -> Option<String> {
        self.submit_order_at(
            Direction::Buy,
            Offset::Open,
            instrument_id,
            price,
            volume,
            "operator",
            self.clock.now_naive(),
        )
    }

    pub fn open_short(&self, instrument_id: &str, price: f64, volume: i64) -> Option<String> {
        self.submit_order_at(
            Direction::Sell,
            Offset::Open,
            instrument_id,
            price,
            volume,
            "operator",
            self.clock.now_naive(),
        )
    }

    pub fn close_long(
        &self,
        instrument_id: &str,
        price: f64,
        volume: i64,
        close_today: bool,
    ) -> Option<String> {
        self.submit_order_at(
            Direction::Sell,
            if close_today {
                Offset::CloseToday
            } else {
                Offset::Close
            },
            instrument_id,
            price,
            volume,
            "operator",
            self.clock.now_naive(),
        )
    }

    pub fn close_short(
        &self,
        instrument_id: &str,
        price: f64,
        volume: i64,
        close_today: bool,
    ) -> Option<String> {
        self.submit_order_at(
            Direction::Buy,
            if close_today {
                Offset::CloseToday
            } else {
                Offset::Close
            },
            instrument_id,
            price,
            volume,
            "operator",
            self.clock.now_naive(),
        )
    }

    /// Cancel by reference. Counted before the send, like submissions.
    pub fn cancel_order(&self, instrument_id: &str, order_ref: &str) -> bool {
        self.monitor.record_cancel(instrument_id);
        let (exchange_id, order_sys_id) = self
            .session
            .get_order(order_ref)
            .map(|o| (o.exchange_id, o.order_sys_id))
            .unwrap_or_default();
        self.session
            .cancel(instrument_id, order_ref, &exchange_id, &order_sys_id)
            .is_ok()
    }

    pub fn pause_trading(&self, reason: &str) -> bool {
        self.emergency.pause_trading(reason)
    }

    pub fn resume_trading(&self, reason: &str) -> bool {
        self.emergency.resume_trading(reason)
    }

    pub async fn cancel_all_orders(&self, reason: &str) -> HashMap<String, bool> {
        self.emergency.cancel_all(reason).await
    }

    pub async fn emergency_stop(&self, reason: &str) {
        self.emergency.emergency_stop(reason).await;
    }

    pub fn get_system_status(&self) -> serde_json::Value {
        let (info, warning, critical) = self.alerts.counts();
        json!({
            "running": self.is_running(),
            "uptime_secs": self.clock.uptime_secs(),
            "trading_day": self.session.trading_day(),
            "connection": self.connection.status_report(),
            "order_stats": self.monitor.summary_report(),
            "thresholds": self.thresholds.current_thresholds(),
            "emergency": self.emergency.status_report(),
            "market_data": self.market_snapshot(),
            "strategies": {
                "ofi": self.ofi.lock().status(),
                "staged": self.staged.lock().status(),
            },
            "alert_counts": {
                "info": info,
                "warning": warning,
                "critical": critical,
            },
        })
    }

    /// Per-instrument view of the engine-owned market caches.
    fn market_snapshot(&self) -> serde_json::Value {
        let market = self.market.lock();
        let mut instruments = serde_json::Map::new();
        for (instrument_id, data) in market.iter() {
            instruments.insert(
                instrument_id.clone(),
                json!({
                    "last_price": data.tick_cache.latest().map(|t| t.last_price),
                    "tick_window": data.tick_cache.len(),
                    "window_imbalance": data.tick_cache.imbalance(),
                    "volatility": data.tick_cache.volatility(),
                    "obi": data.depth.imbalance(),
                    "spread": data.depth.spread(),
                    "mid_price": data.depth.mid_price(),
                    "completed_bars": data.bars.len(),
                    "current_bar_close": data.aggregator.current_bar().map(|b| b.close),
                    "features_ready": data.tick_cache.is_ready(),
                }),
            );
        }
        serde_json::Value::Object(instruments)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("running", &self.is_running())
            .field("session", &self.session)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
