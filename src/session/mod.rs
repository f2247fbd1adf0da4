// =============================================================================
// ExchangeSession — brokerage session state machine and event fan-out
// =============================================================================
//
// Drives connect → authenticate → login → confirm-settlement → queries, each
// step bounded by a caller-supplied timeout. A failed step leaves the
// session in the last-attained state and surfaces a typed error.
//
// All asynchronous callbacks arrive through `handle_event` on the
// transport's delivery thread. The session updates its caches there and
// republishes through typed broadcast channels (ticks, orders, trades,
// session events); subscribers run on their own tasks, so a slow or
// panicking subscriber cannot stall the delivery thread.
//
// Request ids and order references are allocated monotonically under a
// mutex; order references are seeded from the `max_order_ref` returned at
// login and rendered as decimal strings.
// =============================================================================

pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditLevel, AuditLog};
use crate::config::ConnectionConfig;
use crate::types::{
    AccountSnapshot, Direction, InstrumentInfo, Offset, Order, OrderStatus, PositionRecord, Tick,
    TradeFill,
};
use transport::{
    BrokerTransport, CancelRequest, DisconnectReason, OrderRequest, TransportEvent,
    TransportListener,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed failures of the blocking session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: front not connected within {0:?}")]
    ConnectionFailed(Duration),

    #[error("authentication failed: [{code}] {msg}")]
    AuthFailed { code: i32, msg: String },

    #[error("login failed: [{code}] {msg}")]
    LoginFailed { code: i32, msg: String },

    #[error("transport rejected the request (code {0})")]
    SendRejected(i32),

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("session is not connected")]
    NotConnected,

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("session is not logged in")]
    NotLoggedIn,

    #[error("trading is disabled")]
    TradingDisabled,
}

// ---------------------------------------------------------------------------
// Session events (bus)
// ---------------------------------------------------------------------------

/// Lifecycle and error events republished to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected { reason: i32 },
    HeartbeatWarning { lapse_secs: i32 },
    OrderInsertError {
        order_ref: String,
        error_id: i32,
        error_msg: String,
    },
    OrderActionError {
        order_ref: String,
        error_id: i32,
        error_msg: String,
    },
}

#[derive(Debug, Clone, Default)]
struct LoginInfo {
    front_id: i32,
    session_id: i32,
    trading_day: String,
}

#[derive(Debug, Clone)]
struct LoginOutcome {
    error_id: i32,
    error_msg: String,
}

const TICK_CHANNEL_CAPACITY: usize = 1024;
const ORDER_CHANNEL_CAPACITY: usize = 256;
const TRADE_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Fixed wait used by the account and position queries; responses stream in
/// asynchronously and the cache is read after this delay.
const QUERY_SETTLE_WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// ExchangeSession
// ---------------------------------------------------------------------------

pub struct ExchangeSession {
    transport: Arc<dyn BrokerTransport>,
    config: ConnectionConfig,
    audit: Arc<AuditLog>,

    // ── state flags ─────────────────────────────────────────────────────
    connected: AtomicBool,
    authenticated: AtomicBool,
    logged_in: AtomicBool,
    settlement_confirmed: AtomicBool,
    trading_enabled: AtomicBool,
    closed: AtomicBool,
    instrument_query_done: AtomicBool,

    // ── id allocation ───────────────────────────────────────────────────
    request_id: Mutex<i32>,
    order_ref: Mutex<i64>,

    login_info: RwLock<LoginInfo>,

    // ── per-operation completion gates ──────────────────────────────────
    connect_gate: Notify,
    auth_gate: Notify,
    auth_result: Mutex<Option<(i32, String)>>,
    login_gate: Notify,
    login_result: Mutex<Option<LoginOutcome>>,
    settlement_gate: Notify,
    instrument_gate: Notify,

    // ── caches ──────────────────────────────────────────────────────────
    instruments: RwLock<HashMap<String, InstrumentInfo>>,
    account: RwLock<Option<AccountSnapshot>>,
    positions: RwLock<HashMap<String, PositionRecord>>,
    orders: RwLock<HashMap<String, Order>>,

    // ── typed broadcast bus ─────────────────────────────────────────────
    tick_tx: broadcast::Sender<Tick>,
    order_tx: broadcast::Sender<Order>,
    trade_tx: broadcast::Sender<TradeFill>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ExchangeSession {
    /// Build the session and register it as the transport's listener.
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        config: ConnectionConfig,
        audit: Arc<AuditLog>,
    ) -> Arc<Self> {
        let (tick_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        let (order_tx, _) = broadcast::channel(ORDER_CHANNEL_CAPACITY);
        let (trade_tx, _) = broadcast::channel(TRADE_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let session = Arc::new(Self {
            transport: transport.clone(),
            config,
            audit,
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            settlement_confirmed: AtomicBool::new(false),
            trading_enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            instrument_query_done: AtomicBool::new(false),
            request_id: Mutex::new(0),
            order_ref: Mutex::new(0),
            login_info: RwLock::new(LoginInfo::default()),
            connect_gate: Notify::new(),
            auth_gate: Notify::new(),
            auth_result: Mutex::new(None),
            login_gate: Notify::new(),
            login_result: Mutex::new(None),
            settlement_gate: Notify::new(),
            instrument_gate: Notify::new(),
            instruments: RwLock::new(HashMap::new()),
            account: RwLock::new(None),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            tick_tx,
            order_tx,
            trade_tx,
            event_tx,
        });

        transport.register_listener(session.clone() as Arc<dyn TransportListener>);
        session
    }

    fn next_request_id(&self) -> i32 {
        let mut id = self.request_id.lock();
        *id += 1;
        *id
    }

    fn next_order_ref(&self) -> String {
        let mut r = self.order_ref.lock();
        *r += 1;
        r.to_string()
    }

    /// Wait on `gate` until `done` returns true or the deadline passes.
    async fn wait_until<F>(&self, gate: &Notify, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = tokio::time::timeout(deadline - now, gate.notified()).await;
        }
    }

    // -------------------------------------------------------------------------
    // Connection sequence
    // -------------------------------------------------------------------------

    /// Bind to the configured front and wait for the connected callback.
    pub async fn connect(&self, timeout: Duration) -> Result<(), SessionError> {
        self.audit.system(
            "connecting to trading front",
            Some(json!({ "trade_front": self.config.trade_front })),
        );

        self.transport.register_front(&self.config.trade_front);
        let ret = self.transport.init();
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }

        let connected = self
            .wait_until(&self.connect_gate, timeout, || {
                self.connected.load(Ordering::SeqCst)
            })
            .await;
        if connected {
            Ok(())
        } else {
            self.audit.error("connect timed out", None);
            Err(SessionError::ConnectionFailed(timeout))
        }
    }

    /// Send broker/user/app credentials and wait for the response.
    pub async fn authenticate(&self, timeout: Duration) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        *self.auth_result.lock() = None;
        let ret = self.transport.req_authenticate(
            &self.config.broker_id,
            &self.config.investor_id,
            &self.config.app_id,
            &self.config.auth_code,
            self.next_request_id(),
        );
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }

        let responded = self
            .wait_until(&self.auth_gate, timeout, || self.auth_result.lock().is_some())
            .await;
        if !responded {
            return Err(SessionError::Timeout {
                op: "authenticate",
                timeout,
            });
        }

        match self.auth_result.lock().take() {
            Some((0, _)) => Ok(()),
            Some((code, msg)) => Err(SessionError::AuthFailed { code, msg }),
            None => Err(SessionError::Timeout {
                op: "authenticate",
                timeout,
            }),
        }
    }

    /// Send user/password and wait; captures front id, session id, trading
    /// day, and the order-reference seed on success.
    pub async fn login(&self, timeout: Duration) -> Result<(), SessionError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(SessionError::NotAuthenticated);
        }

        *self.login_result.lock() = None;
        let ret = self.transport.req_user_login(
            &self.config.broker_id,
            &self.config.investor_id,
            &self.config.password,
            self.next_request_id(),
        );
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }

        let responded = self
            .wait_until(&self.login_gate, timeout, || {
                self.login_result.lock().is_some()
            })
            .await;
        if !responded {
            return Err(SessionError::Timeout {
                op: "login",
                timeout,
            });
        }

        match self.login_result.lock().take() {
            Some(outcome) if outcome.error_id == 0 => Ok(()),
            Some(outcome) => Err(SessionError::LoginFailed {
                code: outcome.error_id,
                msg: outcome.error_msg,
            }),
            None => Err(SessionError::Timeout {
                op: "login",
                timeout,
            }),
        }
    }

    /// Daily settlement confirmation; idempotent.
    pub async fn confirm_settlement(&self, timeout: Duration) -> Result<(), SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }
        if self.settlement_confirmed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let ret = self.transport.req_settlement_confirm(
            &self.config.broker_id,
            &self.config.investor_id,
            self.next_request_id(),
        );
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }

        let confirmed = self
            .wait_until(&self.settlement_gate, timeout, || {
                self.settlement_confirmed.load(Ordering::SeqCst)
            })
            .await;
        if confirmed {
            Ok(())
        } else {
            Err(SessionError::Timeout {
                op: "confirm_settlement",
                timeout,
            })
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Query the instrument catalogue; accumulates paged responses until the
    /// last page is observed.
    pub async fn query_instruments(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, InstrumentInfo>, SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }

        self.instruments.write().clear();
        self.instrument_query_done.store(false, Ordering::SeqCst);

        let ret = self.transport.req_qry_instruments(self.next_request_id());
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }

        let done = self
            .wait_until(&self.instrument_gate, timeout, || {
                self.instrument_query_done.load(Ordering::SeqCst)
            })
            .await;
        if !done {
            return Err(SessionError::Timeout {
                op: "query_instruments",
                timeout,
            });
        }
        Ok(self.instruments.read().clone())
    }

    /// Query the trading account. The response is asynchronous; the cache is
    /// read after a short fixed wait.
    pub async fn query_account(&self) -> Result<Option<AccountSnapshot>, SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }
        let ret = self.transport.req_qry_account(
            &self.config.broker_id,
            &self.config.investor_id,
            self.next_request_id(),
        );
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }
        tokio::time::sleep(QUERY_SETTLE_WAIT).await;
        Ok(self.account.read().clone())
    }

    /// Query investor positions, keyed `{instrument}_{side-code}`.
    pub async fn query_positions(
        &self,
    ) -> Result<HashMap<String, PositionRecord>, SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }
        self.positions.write().clear();
        let ret = self.transport.req_qry_positions(
            &self.config.broker_id,
            &self.config.investor_id,
            self.next_request_id(),
        );
        if ret != 0 {
            return Err(SessionError::SendRejected(ret));
        }
        tokio::time::sleep(QUERY_SETTLE_WAIT).await;
        Ok(self.positions.read().clone())
    }

    // -------------------------------------------------------------------------
    // Trading
    // -------------------------------------------------------------------------

    /// Allocate an order reference and issue the insert request. Returns the
    /// reference on send-success; subsequent status arrives via the order
    /// broadcast.
    pub fn submit(
        &self,
        direction: Direction,
        offset: Offset,
        instrument_id: &str,
        price: f64,
        volume: i64,
    ) -> Result<String, SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }
        if !self.trading_enabled.load(Ordering::SeqCst) {
            return Err(SessionError::TradingDisabled);
        }

        let order_ref = self.next_order_ref();
        self.audit.order_insert(
            instrument_id,
            &direction.to_string(),
            &offset.to_string(),
            price,
            volume,
            &order_ref,
        );

        // Record first: the transport may deliver the first status callback
        // before the request call returns.
        self.orders.write().insert(
            order_ref.clone(),
            Order {
                order_ref: order_ref.clone(),
                order_sys_id: String::new(),
                exchange_id: String::new(),
                instrument_id: instrument_id.to_string(),
                direction,
                offset,
                price,
                volume_original: volume,
                volume_traded: 0,
                volume_remaining: volume,
                status: OrderStatus::Submitted,
                status_msg: String::new(),
            },
        );

        let request = OrderRequest {
            instrument_id: instrument_id.to_string(),
            order_ref: order_ref.clone(),
            direction,
            offset,
            price,
            volume,
        };
        let ret = self.transport.req_order_insert(&request, self.next_request_id());
        if ret != 0 {
            self.orders.write().remove(&order_ref);
            self.audit.error(
                "order insert request rejected by transport",
                Some(json!({ "order_ref": order_ref, "code": ret })),
            );
            return Err(SessionError::SendRejected(ret));
        }

        Ok(order_ref)
    }

    /// Fire an order action (cancel). Cancels stay available while order
    /// submission is disabled.
    pub fn cancel(
        &self,
        instrument_id: &str,
        order_ref: &str,
        exchange_id: &str,
        order_sys_id: &str,
    ) -> Result<(), SessionError> {
        if !self.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }

        self.audit.order_cancel(instrument_id, order_ref, order_sys_id);

        let login = self.login_info.read().clone();
        let request = CancelRequest {
            instrument_id: instrument_id.to_string(),
            order_ref: order_ref.to_string(),
            exchange_id: exchange_id.to_string(),
            order_sys_id: order_sys_id.to_string(),
            front_id: login.front_id,
            session_id: login.session_id,
        };
        let ret = self.transport.req_order_action(&request, self.next_request_id());
        if ret != 0 {
            self.audit.error(
                "order action request rejected by transport",
                Some(json!({ "order_ref": order_ref, "code": ret })),
            );
            return Err(SessionError::SendRejected(ret));
        }
        Ok(())
    }

    /// Release the transport; idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.audit.system("closing exchange session", None);
        self.transport.release();
        self.connected.store(false, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub fn trading_day(&self) -> String {
        self.login_info.read().trading_day.clone()
    }

    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::SeqCst);
        self.audit.system(
            if enabled {
                "order submission enabled"
            } else {
                "order submission disabled"
            },
            None,
        );
    }

    pub fn is_trading_enabled(&self) -> bool {
        self.trading_enabled.load(Ordering::SeqCst)
    }

    pub fn instruments(&self) -> HashMap<String, InstrumentInfo> {
        self.instruments.read().clone()
    }

    pub fn account(&self) -> Option<AccountSnapshot> {
        self.account.read().clone()
    }

    pub fn positions(&self) -> HashMap<String, PositionRecord> {
        self.positions.read().clone()
    }

    pub fn get_order(&self, order_ref: &str) -> Option<Order> {
        self.orders.read().get(order_ref).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    /// Orders whose last-observed status keeps them on the exchange queue.
    pub fn pending_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.status.is_pending())
            .cloned()
            .collect()
    }

    pub fn subscribe_ticks(&self) -> broadcast::Receiver<Tick> {
        self.tick_tx.subscribe()
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<Order> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeFill> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    // -------------------------------------------------------------------------
    // Event handling (transport delivery thread)
    // -------------------------------------------------------------------------

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::FrontConnected => {
                self.connected.store(true, Ordering::SeqCst);
                self.audit.connection("CONNECTED", &self.config.trade_front);
                self.connect_gate.notify_one();
                let _ = self.event_tx.send(SessionEvent::Connected);
            }
            TransportEvent::FrontDisconnected { reason } => {
                self.connected.store(false, Ordering::SeqCst);
                self.authenticated.store(false, Ordering::SeqCst);
                self.logged_in.store(false, Ordering::SeqCst);
                let decoded = DisconnectReason::from_code(reason);
                self.audit.connection("DISCONNECTED", &decoded.to_string());
                warn!(reason = %decoded, "trading front disconnected");
                // Unblock any in-flight waits so they observe the new state.
                self.connect_gate.notify_one();
                self.auth_gate.notify_one();
                self.login_gate.notify_one();
                self.settlement_gate.notify_one();
                self.instrument_gate.notify_one();
                let _ = self.event_tx.send(SessionEvent::Disconnected { reason });
            }
            TransportEvent::HeartbeatWarning { lapse_secs } => {
                self.audit.write(
                    AuditCategory::System,
                    AuditLevel::Debug,
                    "heartbeat warning",
                    Some(json!({ "lapse_secs": lapse_secs })),
                );
                let _ = self.event_tx.send(SessionEvent::HeartbeatWarning { lapse_secs });
            }
            TransportEvent::AuthResponse { error_id, error_msg } => {
                if error_id == 0 {
                    self.authenticated.store(true, Ordering::SeqCst);
                }
                self.audit.write(
                    AuditCategory::System,
                    if error_id == 0 {
                        AuditLevel::Info
                    } else {
                        AuditLevel::Warning
                    },
                    "authenticate response",
                    Some(json!({ "error_id": error_id, "error_msg": error_msg })),
                );
                *self.auth_result.lock() = Some((error_id, error_msg));
                self.auth_gate.notify_one();
            }
            TransportEvent::LoginResponse {
                error_id,
                error_msg,
                front_id,
                session_id,
                trading_day,
                max_order_ref,
            } => {
                if error_id == 0 {
                    self.logged_in.store(true, Ordering::SeqCst);
                    *self.login_info.write() = LoginInfo {
                        front_id,
                        session_id,
                        trading_day: trading_day.clone(),
                    };
                    *self.order_ref.lock() = max_order_ref;
                    info!(
                        front_id,
                        session_id,
                        trading_day = %trading_day,
                        max_order_ref,
                        "login accepted"
                    );
                }
                self.audit
                    .login(&self.config.investor_id, error_id == 0, &error_msg);
                *self.login_result.lock() = Some(LoginOutcome { error_id, error_msg });
                self.login_gate.notify_one();
            }
            TransportEvent::SettlementConfirmed => {
                self.settlement_confirmed.store(true, Ordering::SeqCst);
                self.audit.system("settlement confirmed", None);
                self.settlement_gate.notify_one();
            }
            TransportEvent::InstrumentData { instrument, is_last } => {
                if !instrument.instrument_id.is_empty() {
                    self.instruments
                        .write()
                        .insert(instrument.instrument_id.clone(), instrument);
                }
                if is_last {
                    self.instrument_query_done.store(true, Ordering::SeqCst);
                    self.instrument_gate.notify_one();
                }
            }
            TransportEvent::AccountData { account } => {
                *self.account.write() = Some(account);
            }
            TransportEvent::PositionData { position, .. } => {
                if !position.instrument_id.is_empty() {
                    self.positions.write().insert(position.key(), position);
                }
            }
            TransportEvent::OrderUpdate { order } => {
                self.apply_order_update(order);
            }
            TransportEvent::TradeUpdate { fill } => {
                self.audit.trade(
                    &fill.instrument_id,
                    &fill.direction.to_string(),
                    fill.price,
                    fill.volume,
                    &fill.trade_id,
                );
                let _ = self.trade_tx.send(fill);
            }
            TransportEvent::TickData { tick } => {
                let _ = self.tick_tx.send(tick);
            }
            TransportEvent::OrderInsertError {
                order_ref,
                error_id,
                error_msg,
            } => {
                self.audit.error(
                    "order insert rejected",
                    Some(json!({
                        "order_ref": order_ref,
                        "error_id": error_id,
                        "error_msg": error_msg,
                    })),
                );
                let _ = self.event_tx.send(SessionEvent::OrderInsertError {
                    order_ref,
                    error_id,
                    error_msg,
                });
            }
            TransportEvent::OrderActionError {
                order_ref,
                error_id,
                error_msg,
            } => {
                self.audit.error(
                    "order action rejected",
                    Some(json!({
                        "order_ref": order_ref,
                        "error_id": error_id,
                        "error_msg": error_msg,
                    })),
                );
                let _ = self.event_tx.send(SessionEvent::OrderActionError {
                    order_ref,
                    error_id,
                    error_msg,
                });
            }
        }
    }

    fn apply_order_update(&self, update: Order) {
        let mut orders = self.orders.write();
        let merged = match orders.get_mut(&update.order_ref) {
            Some(existing) => {
                if OrderStatus::can_advance(existing.status, update.status) {
                    existing.status = update.status;
                } else {
                    self.audit.error(
                        "illegal order status transition",
                        Some(json!({
                            "order_ref": update.order_ref,
                            "from": existing.status.to_string(),
                            "to": update.status.to_string(),
                        })),
                    );
                    existing.status = OrderStatus::Unknown;
                }
                if !update.order_sys_id.is_empty() {
                    existing.order_sys_id = update.order_sys_id.clone();
                }
                if !update.exchange_id.is_empty() {
                    existing.exchange_id = update.exchange_id.clone();
                }
                if update.volume_traded > 0 {
                    existing.volume_traded = update.volume_traded;
                }
                existing.volume_remaining = existing.volume_original - existing.volume_traded;
                if !update.status_msg.is_empty() {
                    existing.status_msg = update.status_msg.clone();
                }
                existing.clone()
            }
            None => {
                orders.insert(update.order_ref.clone(), update.clone());
                update
            }
        };
        drop(orders);

        self.audit.order_status(
            &merged.order_ref,
            &merged.status.to_string(),
            json!({
                "instrument_id": merged.instrument_id,
                "traded": merged.volume_traded,
                "remaining": merged.volume_remaining,
            }),
        );
        let _ = self.order_tx.send(merged);
    }
}

impl TransportListener for ExchangeSession {
    fn on_event(&self, event: TransportEvent) {
        self.handle_event(event);
    }
}

impl std::fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("connected", &self.is_connected())
            .field("logged_in", &self.is_logged_in())
            .field("orders", &self.order_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
