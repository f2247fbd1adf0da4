// =============================================================================
// ConnectionMonitor — session lifecycle state and reconnect policy
// =============================================================================
//
// Owns the observable connection state (starting / connected / authenticated
// / logged-in / disconnected / reconnecting / error). Transitions come from
// session events and from a one-second health loop that, once per heartbeat
// interval, verifies the session still believes it is connected.
//
// On disconnect, while auto-reconnect is enabled and the attempt budget is
// not exhausted, a reconnect worker sleeps the configured interval and
// re-runs connect → authenticate → login. Success resets the attempt
// counter; exhausting the budget parks the monitor in the error state.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::session::transport::DisconnectReason;
use crate::session::{ExchangeSession, SessionEvent};

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Starting,
    Connected,
    Authenticated,
    LoggedIn,
    Disconnected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "STARTING",
            Self::Connected => "CONNECTED",
            Self::Authenticated => "AUTHENTICATED",
            Self::LoggedIn => "LOGGED_IN",
            Self::Disconnected => "DISCONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEvent {
    pub state: ConnectionState,
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub error_code: i32,
}

/// Reconnect and health-check tuning.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub login_timeout: Duration,
    pub auto_reconnect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(10),
            auto_reconnect: true,
        }
    }
}

const MAX_EVENT_HISTORY: usize = 1000;

type StateListener = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

// ---------------------------------------------------------------------------
// ConnectionMonitor
// ---------------------------------------------------------------------------

pub struct ConnectionMonitor {
    session: Arc<ExchangeSession>,
    policy: ReconnectPolicy,
    state: Mutex<(ConnectionState, DateTime<Local>)>,
    reconnect_count: AtomicU32,
    auto_reconnect: AtomicBool,
    running: AtomicBool,
    events: Mutex<Vec<ConnectionEvent>>,
    listeners: RwLock<Vec<StateListener>>,
    audit: Arc<AuditLog>,
}

impl ConnectionMonitor {
    pub fn new(session: Arc<ExchangeSession>, policy: ReconnectPolicy, audit: Arc<AuditLog>) -> Self {
        let auto = policy.auto_reconnect;
        Self {
            session,
            policy,
            state: Mutex::new((ConnectionState::Disconnected, Local::now())),
            reconnect_count: AtomicU32::new(0),
            auto_reconnect: AtomicBool::new(auto),
            running: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            audit,
        }
    }

    pub fn register_listener(
        &self,
        listener: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) {
        self.listeners.write().push(Box::new(listener));
    }

    fn set_state(&self, new_state: ConnectionState, message: &str, error_code: i32) {
        let mut state = self.state.lock();
        let old_state = state.0;
        if old_state == new_state {
            return;
        }
        state.0 = new_state;
        state.1 = Local::now();

        {
            let mut events = self.events.lock();
            events.push(ConnectionEvent {
                state: new_state,
                timestamp: state.1,
                message: message.to_string(),
                error_code,
            });
            let len = events.len();
            if len > MAX_EVENT_HISTORY {
                events.drain(..len - MAX_EVENT_HISTORY);
            }
        }

        self.audit.monitor(
            "connection state changed",
            Some(json!({
                "old_state": old_state.to_string(),
                "new_state": new_state.to_string(),
                "message": message,
                "error_code": error_code,
            })),
        );

        // Listeners run under the state lock: they observe transitions in
        // order and must not call back into the monitor.
        for listener in self.listeners.read().iter() {
            listener(old_state, new_state);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Begin monitoring: follow session events and run the health loop.
    pub fn start(self: &Arc<Self>) {
        self.set_state(ConnectionState::Starting, "monitor started", 0);
        self.running.store(true, Ordering::SeqCst);

        // Session event follower.
        let monitor = self.clone();
        let mut events = self.session.subscribe_events();
        tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                match events.recv().await {
                    Ok(SessionEvent::Connected) => monitor.on_connected(),
                    Ok(SessionEvent::Disconnected { reason }) => monitor.on_disconnected(reason),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Health loop: wake every second, check once per heartbeat interval.
        let monitor = self.clone();
        tokio::spawn(async move {
            let poll = Duration::from_secs(1).min(monitor.policy.heartbeat_interval);
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_check = tokio::time::Instant::now();
            loop {
                interval.tick().await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                if last_check.elapsed() >= monitor.policy.heartbeat_interval {
                    monitor.check_health();
                    last_check = tokio::time::Instant::now();
                }
            }
        });

        self.audit.system(
            "connection monitor started",
            Some(json!({
                "reconnect_interval_ms": self.policy.reconnect_interval.as_millis() as u64,
                "max_reconnect_attempts": self.policy.max_reconnect_attempts,
                "heartbeat_interval_ms": self.policy.heartbeat_interval.as_millis() as u64,
            })),
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.audit.system("connection monitor stopped", None);
    }

    fn on_connected(&self) {
        self.set_state(ConnectionState::Connected, "front connected", 0);
        self.reconnect_count.store(0, Ordering::SeqCst);
    }

    fn on_disconnected(self: &Arc<Self>, reason: i32) {
        let decoded = DisconnectReason::from_code(reason);
        self.set_state(ConnectionState::Disconnected, &decoded.to_string(), reason);
        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.trigger_reconnect();
        }
    }

    fn check_health(self: &Arc<Self>) {
        if self.session.is_connected() {
            return;
        }
        let current = self.current_state();
        if matches!(
            current,
            ConnectionState::Disconnected | ConnectionState::Reconnecting | ConnectionState::Error
        ) {
            return;
        }
        self.set_state(
            ConnectionState::Disconnected,
            "health check: session not connected",
            0,
        );
        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.trigger_reconnect();
        }
    }

    // -------------------------------------------------------------------------
    // Reconnect worker
    // -------------------------------------------------------------------------

    fn trigger_reconnect(self: &Arc<Self>) {
        let attempt = self.reconnect_count.load(Ordering::SeqCst);
        if attempt >= self.policy.max_reconnect_attempts {
            self.audit.error(
                "reconnect attempt budget exhausted",
                Some(json!({ "attempts": attempt })),
            );
            self.set_state(ConnectionState::Error, "max reconnect attempts reached", 0);
            return;
        }

        let attempt = self.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(
            ConnectionState::Reconnecting,
            &format!("reconnect attempt {attempt}"),
            0,
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.reconnect_once(attempt).await;
        });
    }

    async fn reconnect_once(self: Arc<Self>, attempt: u32) {
        info!(
            attempt,
            max_attempts = self.policy.max_reconnect_attempts,
            "reconnecting"
        );
        tokio::time::sleep(self.policy.reconnect_interval).await;

        if !self.auto_reconnect.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.session.connect(self.policy.connect_timeout).await {
            warn!(attempt, error = %e, "reconnect: connect failed");
            self.set_state(ConnectionState::Disconnected, "reconnect failed", 0);
            if self.auto_reconnect.load(Ordering::SeqCst) {
                self.trigger_reconnect();
            }
            return;
        }

        if let Err(e) = self.session.authenticate(self.policy.auth_timeout).await {
            warn!(attempt, error = %e, "reconnect: authentication failed");
            self.set_state(
                ConnectionState::Connected,
                "reconnected, authentication failed",
                0,
            );
            return;
        }

        if let Err(e) = self.session.login(self.policy.login_timeout).await {
            warn!(attempt, error = %e, "reconnect: login failed");
            self.set_state(
                ConnectionState::Authenticated,
                "reconnected, login failed",
                0,
            );
            return;
        }

        self.set_state(ConnectionState::LoggedIn, "reconnected and logged in", 0);
        self.reconnect_count.store(0, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn current_state(&self) -> ConnectionState {
        self.state.lock().0
    }

    pub fn state_duration(&self) -> Duration {
        let changed_at = self.state.lock().1;
        (Local::now() - changed_at).to_std().unwrap_or_default()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    pub fn event_history(&self, limit: usize) -> Vec<ConnectionEvent> {
        let events = self.events.lock();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    pub fn is_healthy(&self) -> bool {
        matches!(
            self.current_state(),
            ConnectionState::Connected | ConnectionState::Authenticated | ConnectionState::LoggedIn
        )
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
        self.audit.system(
            if enabled {
                "auto-reconnect enabled"
            } else {
                "auto-reconnect disabled"
            },
            None,
        );
    }

    pub fn status_report(&self) -> serde_json::Value {
        json!({
            "current_state": self.current_state().to_string(),
            "state_duration_secs": self.state_duration().as_secs(),
            "reconnect_count": self.reconnect_count(),
            "auto_reconnect": self.auto_reconnect.load(Ordering::SeqCst),
            "is_healthy": self.is_healthy(),
            "session_connected": self.session.is_connected(),
            "session_logged_in": self.session.is_logged_in(),
            "recent_events": self.events.lock().len(),
        })
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.current_state())
            .field("reconnect_count", &self.reconnect_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::session::transport::testing::MockTransport;
    use crate::session::transport::TransportEvent;
    use std::sync::atomic::{AtomicU32 as StdAtomicU32, Ordering as AtomicOrdering};

    fn audit() -> Arc<AuditLog> {
        static SEQ: StdAtomicU32 = StdAtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "meridian-connmon-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, AtomicOrdering::SeqCst)
        ));
        Arc::new(AuditLog::new(dir, 7).unwrap())
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnect_interval: Duration::from_millis(5),
            max_reconnect_attempts: max_attempts,
            heartbeat_interval: Duration::from_secs(3600),
            connect_timeout: Duration::from_millis(20),
            auth_timeout: Duration::from_millis(50),
            login_timeout: Duration::from_millis(50),
            auto_reconnect: true,
        }
    }

    fn setup(
        transport: Arc<MockTransport>,
        policy: ReconnectPolicy,
    ) -> (Arc<ExchangeSession>, Arc<ConnectionMonitor>) {
        let audit = audit();
        let session = ExchangeSession::new(transport, ConnectionConfig::default(), audit.clone());
        let monitor = Arc::new(ConnectionMonitor::new(session.clone(), policy, audit));
        (session, monitor)
    }

    async fn wait_for_state(
        monitor: &Arc<ConnectionMonitor>,
        state: ConnectionState,
        deadline: Duration,
    ) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if monitor.current_state() == state {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn disconnect_triggers_reconnect_until_budget_exhausted() {
        let transport = Arc::new(MockTransport::new());
        transport.connect_responds.store(false, AtomicOrdering::SeqCst);
        let (_session, monitor) = setup(transport.clone(), fast_policy(3));
        monitor.start();

        transport.emit(TransportEvent::FrontDisconnected { reason: 0x1001 });

        assert!(wait_for_state(&monitor, ConnectionState::Error, Duration::from_secs(5)).await);
        assert_eq!(monitor.reconnect_count(), 3);
        // Three reconnect attempts, each one init call.
        assert_eq!(transport.init_calls.load(AtomicOrdering::SeqCst), 3);

        // The loop has halted: no further attempts accumulate.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.init_calls.load(AtomicOrdering::SeqCst), 3);
        monitor.stop();
    }

    #[tokio::test]
    async fn successful_reconnect_resets_the_attempt_counter() {
        let transport = Arc::new(MockTransport::new());
        // Two dead attempts, then the front answers again.
        transport.connect_failures.store(2, AtomicOrdering::SeqCst);
        let (session, monitor) = setup(transport.clone(), fast_policy(10));
        monitor.start();

        transport.emit(TransportEvent::FrontDisconnected { reason: 0x2001 });

        assert!(wait_for_state(&monitor, ConnectionState::LoggedIn, Duration::from_secs(5)).await);
        assert_eq!(monitor.reconnect_count(), 0);
        assert!(session.is_logged_in());
        monitor.stop();
    }

    #[tokio::test]
    async fn reconnect_stops_at_authenticated_on_login_failure() {
        let transport = Arc::new(MockTransport::new());
        *transport.login_error.lock() = Some((131, "invalid password".into()));
        let (_session, monitor) = setup(transport.clone(), fast_policy(10));
        monitor.start();

        transport.emit(TransportEvent::FrontDisconnected { reason: 0x1002 });

        assert!(
            wait_for_state(&monitor, ConnectionState::Authenticated, Duration::from_secs(5)).await
        );
        // No automatic retry after a login rejection.
        let attempts = transport.login_calls.load(AtomicOrdering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.login_calls.load(AtomicOrdering::SeqCst), attempts);
        monitor.stop();
    }

    #[tokio::test]
    async fn health_loop_detects_silent_disconnect() {
        let transport = Arc::new(MockTransport::new());
        transport.connect_responds.store(false, AtomicOrdering::SeqCst);
        let mut policy = fast_policy(10);
        policy.heartbeat_interval = Duration::from_millis(30);
        policy.auto_reconnect = false;
        let (_session, monitor) = setup(transport.clone(), policy);
        monitor.start();
        monitor.set_auto_reconnect(false);

        assert_eq!(monitor.current_state(), ConnectionState::Starting);
        assert!(
            wait_for_state(&monitor, ConnectionState::Disconnected, Duration::from_secs(5)).await
        );
        monitor.stop();
    }

    #[tokio::test]
    async fn event_history_records_transitions_in_order() {
        let transport = Arc::new(MockTransport::new());
        let (_session, monitor) = setup(transport.clone(), fast_policy(10));
        monitor.set_auto_reconnect(false);
        monitor.start();

        transport.emit(TransportEvent::FrontConnected);
        assert!(wait_for_state(&monitor, ConnectionState::Connected, Duration::from_secs(2)).await);
        transport.emit(TransportEvent::FrontDisconnected { reason: 0x2003 });
        assert!(
            wait_for_state(&monitor, ConnectionState::Disconnected, Duration::from_secs(2)).await
        );

        let history = monitor.event_history(10);
        let states: Vec<ConnectionState> = history.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Starting,
                ConnectionState::Connected,
                ConnectionState::Disconnected
            ]
        );
        assert_eq!(history[2].error_code, 0x2003);
        monitor.stop();
    }
}
