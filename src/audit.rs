// =============================================================================
// Audit log — categorized, rotated, append-only event sink
// =============================================================================
//
// Four categories (trade, system, monitor, error), one file per category per
// day, plus a merged `all` stream. Line format: ISO-8601 timestamp with
// millisecond precision, level, message, optional JSON attribute object.
//
// Rotation is filename-based: writers reopen when the local date rolls, and
// the retention sweep deletes files older than the configured horizon. The
// log is constructed once in `main` and passed down as `Arc<AuditLog>`.
// =============================================================================

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Categories and levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditCategory {
    Trade,
    System,
    Monitor,
    Error,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::System => "system",
            Self::Monitor => "monitor",
            Self::Error => "error",
        }
    }

    const ALL: [AuditCategory; 4] = [Self::Trade, Self::System, Self::Monitor, Self::Error];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Writer state
// ---------------------------------------------------------------------------

struct Writers {
    date: NaiveDate,
    files: HashMap<AuditCategory, BufWriter<File>>,
    all: BufWriter<File>,
}

fn open_stream(dir: &Path, prefix: &str, date: NaiveDate) -> Result<BufWriter<File>> {
    let path = dir.join(format!("{}_{}.log", prefix, date.format("%Y-%m-%d")));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open audit stream {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn open_writers(dir: &Path, date: NaiveDate) -> Result<Writers> {
    let mut files = HashMap::new();
    for category in AuditCategory::ALL {
        files.insert(category, open_stream(dir, category.as_str(), date)?);
    }
    Ok(Writers {
        date,
        files,
        all: open_stream(dir, "all", date)?,
    })
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

pub struct AuditLog {
    dir: PathBuf,
    retention_days: u32,
    inner: Mutex<Writers>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create audit dir {}", dir.display()))?;

        let writers = open_writers(&dir, Local::now().date_naive())?;
        let log = Self {
            dir,
            retention_days,
            inner: Mutex::new(writers),
        };
        log.system("audit log opened", Some(json!({ "dir": log.dir.display().to_string() })));
        Ok(log)
    }

    /// Core write path: timestamp, level, message, optional JSON attributes;
    /// lines land in the category file and the merged `all` stream.
    pub fn write(
        &self,
        category: AuditCategory,
        level: AuditLevel,
        message: &str,
        attrs: Option<Value>,
    ) {
        let now = Local::now();
        let ts = now.format("%Y-%m-%dT%H:%M:%S%.3f");

        let line = match &attrs {
            Some(v) => format!("{} | {} | {} | {}\n", ts, level.as_str(), message, v),
            None => format!("{} | {} | {}\n", ts, level.as_str(), message),
        };

        {
            let mut writers = self.inner.lock();

            // Date rolled: reopen all streams and sweep out-of-retention files.
            let today = now.date_naive();
            if writers.date != today {
                match open_writers(&self.dir, today) {
                    Ok(fresh) => {
                        *writers = fresh;
                        self.sweep_retention(today);
                    }
                    Err(e) => {
                        error!(error = %e, "audit log rotation failed, keeping previous streams");
                    }
                }
            }

            if let Some(w) = writers.files.get_mut(&category) {
                let _ = w.write_all(line.as_bytes());
                let _ = w.flush();
            }
            let all_line = format!(
                "{} | {} | [{}] {}{}\n",
                ts,
                level.as_str(),
                category.as_str(),
                message,
                attrs
                    .as_ref()
                    .map(|v| format!(" | {}", v))
                    .unwrap_or_default()
            );
            let _ = writers.all.write_all(all_line.as_bytes());
            let _ = writers.all.flush();
        }

        // Mirror to the process logger.
        match level {
            AuditLevel::Debug => debug!(category = category.as_str(), "{}", message),
            AuditLevel::Info => info!(category = category.as_str(), "{}", message),
            AuditLevel::Warning => warn!(category = category.as_str(), "{}", message),
            AuditLevel::Error => error!(category = category.as_str(), "{}", message),
        }
    }

    fn sweep_retention(&self, today: NaiveDate) {
        let horizon = today - chrono::Duration::days(self.retention_days as i64);
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Expected shape: <prefix>_YYYY-MM-DD.log
            let Some(stem) = name.strip_suffix(".log") else {
                continue;
            };
            let Some(idx) = stem.rfind('_') else { continue };
            let Ok(date) = NaiveDate::parse_from_str(&stem[idx + 1..], "%Y-%m-%d") else {
                continue;
            };
            if date < horizon {
                if std::fs::remove_file(entry.path()).is_ok() {
                    info!(file = %name, "audit log file removed by retention sweep");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Trade events
    // -------------------------------------------------------------------------

    pub fn order_insert(
        &self,
        instrument_id: &str,
        direction: &str,
        offset: &str,
        price: f64,
        volume: i64,
        order_ref: &str,
    ) {
        self.write(
            AuditCategory::Trade,
            AuditLevel::Info,
            "order insert",
            Some(json!({
                "action": "ORDER_INSERT",
                "instrument_id": instrument_id,
                "direction": direction,
                "offset": offset,
                "price": price,
                "volume": volume,
                "order_ref": order_ref,
            })),
        );
    }

    pub fn order_cancel(&self, instrument_id: &str, order_ref: &str, order_sys_id: &str) {
        self.write(
            AuditCategory::Trade,
            AuditLevel::Info,
            "order cancel",
            Some(json!({
                "action": "ORDER_CANCEL",
                "instrument_id": instrument_id,
                "order_ref": order_ref,
                "order_sys_id": order_sys_id,
            })),
        );
    }

    pub fn order_status(&self, order_ref: &str, status: &str, attrs: Value) {
        self.write(
            AuditCategory::Trade,
            AuditLevel::Info,
            "order status",
            Some(json!({
                "action": "ORDER_STATUS",
                "order_ref": order_ref,
                "status": status,
                "detail": attrs,
            })),
        );
    }

    pub fn trade(&self, instrument_id: &str, direction: &str, price: f64, volume: i64, trade_id: &str) {
        self.write(
            AuditCategory::Trade,
            AuditLevel::Info,
            "trade fill",
            Some(json!({
                "action": "TRADE",
                "instrument_id": instrument_id,
                "direction": direction,
                "price": price,
                "volume": volume,
                "trade_id": trade_id,
            })),
        );
    }

    // -------------------------------------------------------------------------
    // System events
    // -------------------------------------------------------------------------

    pub fn system(&self, message: &str, attrs: Option<Value>) {
        self.write(AuditCategory::System, AuditLevel::Info, message, attrs);
    }

    pub fn connection(&self, state: &str, detail: &str) {
        self.write(
            AuditCategory::System,
            AuditLevel::Info,
            "connection state",
            Some(json!({ "action": "CONNECTION", "state": state, "detail": detail })),
        );
    }

    pub fn login(&self, investor_id: &str, success: bool, detail: &str) {
        let level = if success {
            AuditLevel::Info
        } else {
            AuditLevel::Warning
        };
        self.write(
            AuditCategory::System,
            level,
            "user login",
            Some(json!({
                "action": "LOGIN",
                "investor_id": investor_id,
                "success": success,
                "detail": detail,
            })),
        );
    }

    // -------------------------------------------------------------------------
    // Monitor events
    // -------------------------------------------------------------------------

    pub fn monitor(&self, message: &str, attrs: Option<Value>) {
        self.write(AuditCategory::Monitor, AuditLevel::Info, message, attrs);
    }

    pub fn threshold_check(
        &self,
        check_type: &str,
        current: u64,
        threshold: u64,
        triggered: bool,
        instrument_id: Option<&str>,
    ) {
        let level = if triggered {
            AuditLevel::Warning
        } else {
            AuditLevel::Info
        };
        self.write(
            AuditCategory::Monitor,
            level,
            "threshold check",
            Some(json!({
                "action": "THRESHOLD_CHECK",
                "check_type": check_type,
                "current_value": current,
                "threshold": threshold,
                "triggered": triggered,
                "instrument_id": instrument_id,
            })),
        );
    }

    pub fn alert(&self, alert_type: &str, level: AuditLevel, message: &str) {
        self.write(
            AuditCategory::Monitor,
            level,
            "alert raised",
            Some(json!({ "action": "ALERT", "alert_type": alert_type, "message": message })),
        );
    }

    // -------------------------------------------------------------------------
    // Error events
    // -------------------------------------------------------------------------

    pub fn error(&self, message: &str, attrs: Option<Value>) {
        self.write(AuditCategory::Error, AuditLevel::Error, message, attrs);
    }

    pub fn validation_error(&self, validation_type: &str, message: &str, attrs: Value) {
        self.write(
            AuditCategory::Error,
            AuditLevel::Error,
            "order validation failed",
            Some(json!({
                "action": "VALIDATION_ERROR",
                "validation_type": validation_type,
                "message": message,
                "detail": attrs,
            })),
        );
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("dir", &self.dir)
            .field("retention_days", &self.retention_days)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "meridian-audit-{}-{}",
            std::process::id(),
            TEST_SEQ.fetch_add(1, Ordering::SeqCst)
        ))
    }

    #[test]
    fn writes_category_and_all_streams() {
        let dir = test_dir();
        let log = AuditLog::new(&dir, 30).unwrap();

        log.order_insert("rb2505", "BUY", "OPEN", 3000.0, 1, "1");
        log.monitor("counter", Some(json!({ "n": 1 })));

        let date = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let trade = std::fs::read_to_string(dir.join(format!("trade_{}.log", date))).unwrap();
        assert!(trade.contains("ORDER_INSERT"));
        assert!(trade.contains("rb2505"));

        let all = std::fs::read_to_string(dir.join(format!("all_{}.log", date))).unwrap();
        assert!(all.contains("[trade]"));
        assert!(all.contains("[monitor]"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn line_starts_with_timestamp_and_level() {
        let dir = test_dir();
        let log = AuditLog::new(&dir, 30).unwrap();
        log.error("boom", None);

        let date = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.join(format!("error_{}.log", date))).unwrap();
        let line = content.lines().last().unwrap();
        // 2025-03-14T21:03:00.123 | ERROR | boom
        let parts: Vec<&str> = line.splitn(3, " | ").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].contains('T'));
        assert!(parts[0].contains('.'));
        assert_eq!(parts[1], "ERROR");
        assert_eq!(parts[2], "boom");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn retention_sweep_removes_old_files() {
        let dir = test_dir();
        let log = AuditLog::new(&dir, 7).unwrap();

        let stale = dir.join("trade_2001-01-01.log");
        std::fs::write(&stale, "old\n").unwrap();
        let unrelated = dir.join("notes.txt");
        std::fs::write(&unrelated, "keep\n").unwrap();

        log.sweep_retention(Local::now().date_naive());

        assert!(!stale.exists());
        assert!(unrelated.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
