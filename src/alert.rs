// =============================================================================
// AlertService — multiplexed, best-effort operator alerts
// =============================================================================
//
// The console sink is always on; popup, sound, and email sinks are contract
// implementations behind enable flags. Every optional sink is dispatched
// best-effort and isolated: one failing sink cannot block the others, and
// email delivery runs on a spawned task so the caller never waits on SMTP.
// Alert history is bounded; registered callbacks run synchronously inside a
// panic guard.
// =============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::audit::{AuditLevel, AuditLog};
use crate::config::AlertConfig;

/// Bounded alert history length.
const MAX_ALERT_HISTORY: usize = 1000;

// ---------------------------------------------------------------------------
// Alert record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Local>,
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// A delivery channel for alerts. Implementations must be cheap to call or
/// do their own offloading; failures are logged and swallowed.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Level-coloured console output through the process logger.
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        match alert.level {
            AlertLevel::Info => {
                info!(title = %alert.title, source = %alert.source, "{}", alert.message)
            }
            AlertLevel::Warning => {
                warn!(title = %alert.title, source = %alert.source, "{}", alert.message)
            }
            AlertLevel::Critical => {
                error!(title = %alert.title, source = %alert.source, "{}", alert.message)
            }
        }
        Ok(())
    }
}

/// Desktop notification contract; the platform binding lives outside the
/// engine.
pub struct PopupSink;

impl AlertSink for PopupSink {
    fn name(&self) -> &'static str {
        "popup"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        info!(title = %alert.title, level = %alert.level, "popup notification requested");
        Ok(())
    }
}

/// Audible alarm contract. Level selects tone and repeat count.
pub struct SoundSink;

impl SoundSink {
    /// (frequency Hz, duration ms, repeats) per level.
    pub fn tone_for(level: AlertLevel) -> (u32, u32, u32) {
        match level {
            AlertLevel::Critical => (1000, 500, 3),
            AlertLevel::Warning => (800, 300, 2),
            AlertLevel::Info => (600, 200, 1),
        }
    }
}

impl AlertSink for SoundSink {
    fn name(&self) -> &'static str {
        "sound"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let (frequency, duration_ms, repeats) = Self::tone_for(alert.level);
        info!(frequency, duration_ms, repeats, "sound alert requested");
        Ok(())
    }
}

/// SMTP delivery contract; the actual mailer lives outside the engine.
/// Dispatched on its own task so the caller never blocks on the send.
pub struct EmailSink {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub recipient: String,
}

impl AlertSink for EmailSink {
    fn name(&self) -> &'static str {
        "email"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        if self.smtp_server.is_empty() || self.recipient.is_empty() {
            anyhow::bail!("email sink not configured");
        }
        info!(
            to = %self.recipient,
            server = %self.smtp_server,
            port = self.smtp_port,
            subject = %format!("[trading-alert-{}] {}", alert.level, alert.title),
            "email alert queued"
        );
        Ok(())
    }
}

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

// ---------------------------------------------------------------------------
// AlertService
// ---------------------------------------------------------------------------

pub struct AlertService {
    console: ConsoleSink,
    sinks: Vec<Arc<dyn AlertSink>>,
    email: Option<Arc<dyn AlertSink>>,
    history: Mutex<Vec<Alert>>,
    callbacks: RwLock<Vec<AlertCallback>>,
    audit: Arc<AuditLog>,
}

impl AlertService {
    pub fn new(config: &AlertConfig, audit: Arc<AuditLog>) -> Self {
        let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
        if config.enable_popup {
            sinks.push(Arc::new(PopupSink));
        }
        if config.enable_sound {
            sinks.push(Arc::new(SoundSink));
        }
        let email: Option<Arc<dyn AlertSink>> = if config.enable_email {
            Some(Arc::new(EmailSink {
                smtp_server: config.smtp_server.clone(),
                smtp_port: config.smtp_port,
                recipient: config.alert_email.clone(),
            }))
        } else {
            None
        };

        audit.system(
            "alert service initialised",
            Some(json!({
                "enable_popup": config.enable_popup,
                "enable_sound": config.enable_sound,
                "enable_email": config.enable_email,
            })),
        );

        Self {
            console: ConsoleSink,
            sinks,
            email,
            history: Mutex::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            audit,
        }
    }

    pub fn register_callback(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) {
        self.callbacks.write().push(Box::new(callback));
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    pub fn send(&self, level: AlertLevel, title: &str, message: &str, source: &str, data: Value) {
        let alert = Alert {
            level,
            title: title.to_string(),
            message: message.to_string(),
            source: source.to_string(),
            timestamp: Local::now(),
            data,
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
            source,
            match level {
                AlertLevel::Info => AuditLevel::Info,
                AlertLevel::Warning => AuditLevel::Warning,
                AlertLevel::Critical => AuditLevel::Error,
            },
            &format!("[{title}] {message}"),
        );

        // Console is unconditional.
        let _ = self.console.deliver(&alert);

        // Optional sinks, each isolated.
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert) {
                warn!(sink = sink.name(), error = %e, "alert sink delivery failed");
            }
        }

        // Email never blocks the caller: spawn when a runtime is available,
        // deliver inline otherwise.
        if let Some(email) = &self.email {
            let email = email.clone();
            let alert_clone = alert.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = email.deliver(&alert_clone) {
                            warn!(error = %e, "email alert delivery failed");
                        }
                    });
                }
                Err(_) => {
                    if let Err(e) = email.deliver(&alert_clone) {
                        warn!(error = %e, "email alert delivery failed");
                    }
                }
            }
        }

        for callback in self.callbacks.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(&alert))).is_err() {
                error!(title = %alert.title, "alert callback panicked");
            }
        }
    }

    pub fn info(&self, title: &str, message: &str, source: &str) {
        self.send(AlertLevel::Info, title, message, source, json!({}));
    }

    pub fn warning(&self, title: &str, message: &str, source: &str) {
        self.send(AlertLevel::Warning, title, message, source, json!({}));
    }

    pub fn critical(&self, title: &str, message: &str, source: &str) {
        self.send(AlertLevel::Critical, title, message, source, json!({}));
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    pub fn history(&self, limit: usize, level: Option<AlertLevel>) -> Vec<Alert> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(limit);
        history[start..]
            .iter()
            .filter(|a| level.map(|l| a.level == l).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let history = self.history.lock();
        let mut info = 0;
        let mut warning = 0;
        let mut critical = 0;
        for alert in history.iter() {
            match alert.level {
                AlertLevel::Info => info += 1,
                AlertLevel::Warning => warning += 1,
                AlertLevel::Critical => critical += 1,
            }
        }
        (info, warning, critical)
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("optional_sinks", &self.sinks.len())
            .field("history_len", &self.history.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
