// =============================================================================
// ThresholdManager — limit checks on order activity with alert suppression
// =============================================================================
//
// Subscribes to the order monitor. Each counter event is compared against
// its configured threshold; a breach produces a `ThresholdAlert` that is
// appended to the bounded history and broadcast — unless an identical alert
// (same kind + scope) fired within the cooldown window. Thresholds are
// hot-settable; every change logs the old and new values.
//
// Checks read counts from the monitor's event snapshot, never back from the
// monitor itself: the snapshot was taken under the monitor lock, so alert
// decisions are atomic with the increment that caused them.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::audit::{AuditLevel, AuditLog};
use crate::config::ThresholdConfig;
use crate::monitor::order_monitor::{CounterSnapshot, OrderAction, Statistics};

/// Suppression window for repeated identical alerts.
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(60);

/// Bounded alert history length.
const MAX_ALERT_HISTORY: usize = 1000;

// ---------------------------------------------------------------------------
// Alert types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThresholdKind {
    RepeatOpen,
    RepeatClose,
    RepeatCancel,
    TotalOrder,
    TotalCancel,
}

impl ThresholdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepeatOpen => "repeat_open",
            Self::RepeatClose => "repeat_close",
            Self::RepeatCancel => "repeat_cancel",
            Self::TotalOrder => "total_order",
            Self::TotalCancel => "total_cancel",
        }
    }

    /// Per-instrument repetition breaches warn; account-total breaches are
    /// critical.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::TotalOrder | Self::TotalCancel)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdAlert {
    pub kind: ThresholdKind,
    pub critical: bool,
    pub current_value: u64,
    pub threshold_value: u64,
    pub instrument_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

type AlertListener = Box<dyn Fn(&ThresholdAlert) + Send + Sync>;

// ---------------------------------------------------------------------------
// ThresholdManager
// ---------------------------------------------------------------------------

pub struct ThresholdManager {
    config: RwLock<ThresholdConfig>,
    cooldown: RwLock<Duration>,
    history: Mutex<Vec<ThresholdAlert>>,
    last_fired: Mutex<HashMap<String, Instant>>,
    listeners: RwLock<Vec<AlertListener>>,
    audit: Arc<AuditLog>,
}

impl ThresholdManager {
    pub fn new(config: ThresholdConfig, audit: Arc<AuditLog>) -> Self {
        audit.system(
            "threshold manager initialised",
            Some(json!({
                "repeat_open_threshold": config.repeat_open_threshold,
                "repeat_close_threshold": config.repeat_close_threshold,
                "repeat_cancel_threshold": config.repeat_cancel_threshold,
                "total_order_threshold": config.total_order_threshold,
                "total_cancel_threshold": config.total_cancel_threshold,
            })),
        );
        Self {
            config: RwLock::new(config),
            cooldown: RwLock::new(DEFAULT_ALERT_COOLDOWN),
            history: Mutex::new(Vec::new()),
            last_fired: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            audit,
        }
    }

    pub fn register_listener(&self, listener: impl Fn(&ThresholdAlert) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn set_cooldown(&self, cooldown: Duration) {
        *self.cooldown.write() = cooldown;
    }

    /// Forget previous firings (resets the suppression window).
    pub fn clear_cooldowns(&self) {
        self.last_fired.lock().clear();
    }

    // -------------------------------------------------------------------------
    // Event entry point (wired as an order-monitor listener)
    // -------------------------------------------------------------------------

    pub fn on_order_event(&self, action: OrderAction, instrument_id: &str, snap: &CounterSnapshot) {
        match action {
            OrderAction::Open => {
                self.check_repeat(
                    ThresholdKind::RepeatOpen,
                    instrument_id,
                    snap.instrument_count,
                );
                self.check_total(ThresholdKind::TotalOrder, snap.total_order_count);
            }
            OrderAction::Close => {
                self.check_repeat(
                    ThresholdKind::RepeatClose,
                    instrument_id,
                    snap.instrument_count,
                );
                self.check_total(ThresholdKind::TotalOrder, snap.total_order_count);
            }
            OrderAction::Cancel => {
                self.check_repeat(
                    ThresholdKind::RepeatCancel,
                    instrument_id,
                    snap.instrument_count,
                );
                self.check_total(ThresholdKind::TotalCancel, snap.total_cancel_count);
            }
            OrderAction::Trade => {}
        }
    }

    fn threshold_for(&self, kind: ThresholdKind) -> u64 {
        let config = self.config.read();
        match kind {
            ThresholdKind::RepeatOpen => config.repeat_open_threshold,
            ThresholdKind::RepeatClose => config.repeat_close_threshold,
            ThresholdKind::RepeatCancel => config.repeat_cancel_threshold,
            ThresholdKind::TotalOrder => config.total_order_threshold,
            ThresholdKind::TotalCancel => config.total_cancel_threshold,
        }
    }

    fn check_repeat(&self, kind: ThresholdKind, instrument_id: &str, current: u64) {
        let threshold = self.threshold_for(kind);
        let triggered = current >= threshold;
        self.audit
            .threshold_check(kind.as_str(), current, threshold, triggered, Some(instrument_id));
        if triggered {
            self.trigger(
                kind,
                current,
                threshold,
                Some(instrument_id.to_string()),
                format!(
                    "instrument {} repeated {} count ({}) reached threshold ({})",
                    instrument_id,
                    kind.as_str(),
                    current,
                    threshold
                ),
            );
        }
    }

    fn check_total(&self, kind: ThresholdKind, current: u64) {
        let threshold = self.threshold_for(kind);
        let triggered = current >= threshold;
        self.audit
            .threshold_check(kind.as_str(), current, threshold, triggered, None);
        if triggered {
            let noun = match kind {
                ThresholdKind::TotalCancel => "cancel",
                _ => "order",
            };
            self.trigger(
                kind,
                current,
                threshold,
                None,
                format!(
                    "account total {} count ({}) reached threshold ({})",
                    noun, current, threshold
                ),
            );
        }
    }

    fn trigger(
        &self,
        kind: ThresholdKind,
        current_value: u64,
        threshold_value: u64,
        instrument_id: Option<String>,
        message: String,
    ) {
        let key = format!(
            "{}_{}",
            kind.as_str(),
            instrument_id.as_deref().unwrap_or("account")
        );
        let cooldown = *self.cooldown.read();

        {
            let mut last_fired = self.last_fired.lock();
            let now = Instant::now();
            if let Some(last) = last_fired.get(&key) {
                if now.duration_since(*last) < cooldown {
                    return;
                }
            }
            last_fired.insert(key, now);
        }

        let alert = ThresholdAlert {
            kind,
            critical: kind.is_critical(),
            current_value,
            threshold_value,
            instrument_id,
            message,
            timestamp: Local::now(),
        };

        {
            let mut history = self.history.lock();
            history.push(alert.clone());
            let len = history.len();
            if len > MAX_ALERT_HISTORY {
                history.drain(..len - MAX_ALERT_HISTORY);
            }
        }

        self.audit.alert(
            alert.kind.as_str(),
            if alert.critical {
                AuditLevel::Error
            } else {
                AuditLevel::Warning
            },
            &alert.message,
        );

        for listener in self.listeners.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&alert))).is_err() {
                error!(kind = alert.kind.as_str(), "threshold alert listener panicked");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Manual sweep
    // -------------------------------------------------------------------------

    /// Evaluate every threshold against a statistics clone, without firing
    /// alerts. Used by the operator status surface.
    pub fn check_all(&self, stats: &Statistics) -> Vec<ThresholdAlert> {
        let config = self.config.read().clone();
        let now = Local::now();
        let mut breaches = Vec::new();

        if stats.total_order_count >= config.total_order_threshold {
            breaches.push(ThresholdAlert {
                kind: ThresholdKind::TotalOrder,
                critical: true,
                current_value: stats.total_order_count,
                threshold_value: config.total_order_threshold,
                instrument_id: None,
                message: "account total order count at threshold".into(),
                timestamp: now,
            });
        }
        if stats.total_cancel_count >= config.total_cancel_threshold {
            breaches.push(ThresholdAlert {
                kind: ThresholdKind::TotalCancel,
                critical: true,
                current_value: stats.total_cancel_count,
                threshold_value: config.total_cancel_threshold,
                instrument_id: None,
                message: "account total cancel count at threshold".into(),
                timestamp: now,
            });
        }

        for (instrument_id, counters) in &stats.by_instrument {
            for (kind, count, threshold) in [
                (
                    ThresholdKind::RepeatOpen,
                    counters.open_count,
                    config.repeat_open_threshold,
                ),
                (
                    ThresholdKind::RepeatClose,
                    counters.close_count,
                    config.repeat_close_threshold,
                ),
                (
                    ThresholdKind::RepeatCancel,
                    counters.cancel_count,
                    config.repeat_cancel_threshold,
                ),
            ] {
                if count >= threshold {
                    breaches.push(ThresholdAlert {
                        kind,
                        critical: false,
                        current_value: count,
                        threshold_value: threshold,
                        instrument_id: Some(instrument_id.clone()),
                        message: format!(
                            "instrument {} {} count at threshold",
                            instrument_id,
                            kind.as_str()
                        ),
                        timestamp: now,
                    });
                }
            }
        }

        breaches
    }

    // -------------------------------------------------------------------------
    // Hot-settable thresholds
    // -------------------------------------------------------------------------

    pub fn set_threshold(&self, kind: ThresholdKind, value: u64) {
        let mut config = self.config.write();
        let slot = match kind {
            ThresholdKind::RepeatOpen => &mut config.repeat_open_threshold,
            ThresholdKind::RepeatClose => &mut config.repeat_close_threshold,
            ThresholdKind::RepeatCancel => &mut config.repeat_cancel_threshold,
            ThresholdKind::TotalOrder => &mut config.total_order_threshold,
            ThresholdKind::TotalCancel => &mut config.total_cancel_threshold,
        };
        let old_value = *slot;
        *slot = value;
        self.audit.system(
            "threshold changed",
            Some(json!({
                "type": kind.as_str(),
                "old_value": old_value,
                "new_value": value,
            })),
        );
    }

    pub fn current_thresholds(&self) -> ThresholdConfig {
        self.config.read().clone()
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    pub fn alert_history(&self, limit: usize) -> Vec<ThresholdAlert> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    pub fn alert_count(&self) -> usize {
        self.history.lock().len()
    }
}

impl std::fmt::Debug for ThresholdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdManager")
            .field("alerts", &self.alert_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
