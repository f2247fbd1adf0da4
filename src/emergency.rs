// =============================================================================
// EmergencyHandler — pause / resume / mass-cancel / one-shot halt
// =============================================================================
//
// Pause flips the session's submission gate (in-flight cancels stay
// allowed); resume flips it back; both are idempotent. Mass cancels walk
// the pending-order set — orders whose last-observed status keeps them on
// the exchange queue, unioned with an externally registered set — pacing
// requests at 100 ms. `emergency_stop` chains pause, stop-all-strategies,
// and cancel-all, in that order.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::alert::AlertService;
use crate::audit::AuditLog;
use crate::session::ExchangeSession;

/// Delay between consecutive cancel requests.
const CANCEL_PACING: Duration = Duration::from_millis(100);

/// Bounded emergency-event history.
const MAX_EVENT_HISTORY: usize = 1000;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmergencyAction {
    PauseTrading,
    ResumeTrading,
    StopStrategy,
    CancelOrders,
    ForceLogout,
}

impl EmergencyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PauseTrading => "PAUSE_TRADING",
            Self::ResumeTrading => "RESUME_TRADING",
            Self::StopStrategy => "STOP_STRATEGY",
            Self::CancelOrders => "CANCEL_ORDERS",
            Self::ForceLogout => "FORCE_LOGOUT",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyEvent {
    pub action: EmergencyAction,
    pub timestamp: DateTime<Local>,
    pub reason: String,
    pub success: bool,
    pub details: Value,
}

/// Externally registered pending order (strategies register refs they are
/// still waiting on, in case the session has not observed a status yet).
#[derive(Debug, Clone)]
pub struct PendingOrderInfo {
    pub instrument_id: String,
    pub exchange_id: String,
    pub order_sys_id: String,
}

// ---------------------------------------------------------------------------
// EmergencyHandler
// ---------------------------------------------------------------------------

pub struct EmergencyHandler {
    session: Arc<ExchangeSession>,
    alerts: Arc<AlertService>,
    audit: Arc<AuditLog>,
    trading_paused: AtomicBool,
    strategy_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
    external_pending: Mutex<HashMap<String, PendingOrderInfo>>,
    events: Mutex<Vec<EmergencyEvent>>,
    pacing: Duration,
}

impl EmergencyHandler {
    pub fn new(
        session: Arc<ExchangeSession>,
        alerts: Arc<AlertService>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            session,
            alerts,
            audit,
            trading_paused: AtomicBool::new(false),
            strategy_flags: RwLock::new(HashMap::new()),
            external_pending: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            pacing: CANCEL_PACING,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    fn record_event(&self, action: EmergencyAction, reason: &str, success: bool, details: Value) {
        let mut events = self.events.lock();
        events.push(EmergencyEvent {
            action,
            timestamp: Local::now(),
            reason: reason.to_string(),
            success,
            details,
        });
        let len = events.len();
        if len > MAX_EVENT_HISTORY {
            events.drain(..len - MAX_EVENT_HISTORY);
        }
    }

    // -------------------------------------------------------------------------
    // Pause / resume
    // -------------------------------------------------------------------------

    /// Disable order submission at the session layer; idempotent.
    pub fn pause_trading(&self, reason: &str) -> bool {
        if self.trading_paused.swap(true, Ordering::SeqCst) {
            self.audit.system("trading already paused", None);
            return true;
        }

        self.session.set_trading_enabled(false);
        self.record_event(EmergencyAction::PauseTrading, reason, true, json!({}));
        self.audit
            .system("trading paused", Some(json!({ "reason": reason })));
        self.alerts.warning(
            "trading paused",
            &format!("order submission disabled: {reason}"),
            "emergency",
        );
        true
    }

    /// Re-enable order submission; idempotent.
    pub fn resume_trading(&self, reason: &str) -> bool {
        if !self.trading_paused.swap(false, Ordering::SeqCst) {
            self.audit.system("trading not paused", None);
            return true;
        }

        self.session.set_trading_enabled(true);
        self.record_event(EmergencyAction::ResumeTrading, reason, true, json!({}));
        self.audit
            .system("trading resumed", Some(json!({ "reason": reason })));
        self.alerts.info(
            "trading resumed",
            &format!("order submission re-enabled: {reason}"),
            "emergency",
        );
        true
    }

    pub fn is_trading_paused(&self) -> bool {
        self.trading_paused.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Strategy control
    // -------------------------------------------------------------------------

    /// Register a strategy's run flag for emergency control.
    pub fn register_strategy(&self, strategy_id: &str, run_flag: Arc<AtomicBool>) {
        self.strategy_flags
            .write()
            .insert(strategy_id.to_string(), run_flag);
    }

    /// Flip the run flag of the named strategy, or of all strategies.
    pub fn stop_strategy(&self, strategy_id: Option<&str>, reason: &str) -> bool {
        let flags = self.strategy_flags.read();
        match strategy_id {
            Some(id) => match flags.get(id) {
                Some(flag) => {
                    flag.store(false, Ordering::SeqCst);
                    self.audit.system(
                        "strategy stopped",
                        Some(json!({ "strategy_id": id, "reason": reason })),
                    );
                }
                None => {
                    warn!(strategy_id = id, "stop requested for unknown strategy");
                    return false;
                }
            },
            None => {
                for (id, flag) in flags.iter() {
                    flag.store(false, Ordering::SeqCst);
                    info!(strategy_id = %id, "strategy stopped");
                }
                self.audit.system(
                    "all strategies stopped",
                    Some(json!({ "reason": reason })),
                );
            }
        }
        drop(flags);

        self.record_event(
            EmergencyAction::StopStrategy,
            reason,
            true,
            json!({ "strategy_id": strategy_id.unwrap_or("ALL") }),
        );
        self.alerts.warning(
            "strategy stopped",
            &format!(
                "strategy {} stopped: {reason}",
                strategy_id.unwrap_or("ALL")
            ),
            "emergency",
        );
        true
    }

    pub fn is_strategy_running(&self, strategy_id: &str) -> bool {
        self.strategy_flags
            .read()
            .get(strategy_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Pending order registry
    // -------------------------------------------------------------------------

    pub fn register_pending_order(&self, order_ref: &str, info: PendingOrderInfo) {
        self.external_pending
            .lock()
            .insert(order_ref.to_string(), info);
    }

    pub fn unregister_pending_order(&self, order_ref: &str) {
        self.external_pending.lock().remove(order_ref);
    }

    /// Session-observed pending orders unioned with the registered set,
    /// optionally filtered by instrument.
    fn pending(&self, instrument_id: Option<&str>) -> HashMap<String, PendingOrderInfo> {
        let mut pending = HashMap::new();

        for order in self.session.pending_orders() {
            if instrument_id.map(|id| order.instrument_id == id).unwrap_or(true) {
                pending.insert(
                    order.order_ref.clone(),
                    PendingOrderInfo {
                        instrument_id: order.instrument_id,
                        exchange_id: order.exchange_id,
                        order_sys_id: order.order_sys_id,
                    },
                );
            }
        }

        for (order_ref, info) in self.external_pending.lock().iter() {
            if instrument_id.map(|id| info.instrument_id == id).unwrap_or(true) {
                pending.entry(order_ref.clone()).or_insert_with(|| info.clone());
            }
        }

        pending
    }

    // -------------------------------------------------------------------------
    // Mass cancellation
    // -------------------------------------------------------------------------

    /// Cancel every pending order on one instrument; returns per-reference
    /// success.
    pub async fn cancel_by_instrument(
        &self,
        instrument_id: &str,
        reason: &str,
    ) -> HashMap<String, bool> {
        let pending = self.pending(Some(instrument_id));
        self.audit.system(
            "cancelling orders by instrument",
            Some(json!({
                "instrument_id": instrument_id,
                "order_count": pending.len(),
                "reason": reason,
            })),
        );
        self.cancel_set(pending, reason, json!({ "instrument_id": instrument_id }))
            .await
    }

    /// Cancel every pending order across all instruments.
    pub async fn cancel_all(&self, reason: &str) -> HashMap<String, bool> {
        let pending = self.pending(None);
        self.audit.system(
            "cancelling all orders",
            Some(json!({ "order_count": pending.len(), "reason": reason })),
        );
        self.alerts.warning(
            "mass cancel",
            &format!("cancelling {} pending orders: {reason}", pending.len()),
            "emergency",
        );
        self.cancel_set(pending, reason, json!({ "type": "ALL" })).await
    }

    async fn cancel_set(
        &self,
        pending: HashMap<String, PendingOrderInfo>,
        reason: &str,
        mut details: Value,
    ) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        for (order_ref, info) in pending {
            let ok = self
                .session
                .cancel(
                    &info.instrument_id,
                    &order_ref,
                    &info.exchange_id,
                    &info.order_sys_id,
                )
                .is_ok();
            if !ok {
                warn!(order_ref = %order_ref, "cancel request failed");
            }
            results.insert(order_ref, ok);

            tokio::time::sleep(self.pacing).await;
        }

        let succeeded = results.values().filter(|v| **v).count();
        if let Some(obj) = details.as_object_mut() {
            obj.insert("total".into(), json!(results.len()));
            obj.insert("succeeded".into(), json!(succeeded));
        }
        self.record_event(EmergencyAction::CancelOrders, reason, succeeded > 0, details);

        results
    }

    // -------------------------------------------------------------------------
    // Heavy hammers
    // -------------------------------------------------------------------------

    /// Cancel everything, then release the session.
    pub async fn force_logout(&self, reason: &str) -> bool {
        self.cancel_all(reason).await;
        self.session.close();

        self.record_event(EmergencyAction::ForceLogout, reason, true, json!({}));
        self.audit
            .system("forced logout", Some(json!({ "reason": reason })));
        self.alerts.critical(
            "forced logout",
            &format!("session released: {reason}"),
            "emergency",
        );
        true
    }

    /// One-shot halt: pause, stop all strategies, cancel everything.
    pub async fn emergency_stop(&self, reason: &str) {
        self.audit
            .system("emergency stop initiated", Some(json!({ "reason": reason })));
        self.alerts.critical(
            "emergency stop",
            &format!("executing emergency stop: {reason}"),
            "emergency",
        );

        self.pause_trading(reason);
        self.stop_strategy(None, reason);
        self.cancel_all(reason).await;

        self.audit.system("emergency stop complete", None);
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub fn event_history(&self, limit: usize) -> Vec<EmergencyEvent> {
        let events = self.events.lock();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    pub fn status_report(&self) -> Value {
        json!({
            "trading_paused": self.is_trading_paused(),
            "registered_strategies": self
                .strategy_flags
                .read()
                .keys()
                .cloned()
                .collect::<Vec<String>>(),
            "pending_registry_count": self.external_pending.lock().len(),
            "event_count": self.events.lock().len(),
            "session_connected": self.session.is_connected(),
            "session_logged_in": self.session.is_logged_in(),
        })
    }
}

impl std::fmt::Debug for EmergencyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyHandler")
            .field("trading_paused", &self.is_trading_paused())
            .field("events", &self.events.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
