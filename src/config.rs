// =============================================================================
// Settings — engine configuration with atomic save
// =============================================================================
//
// One JSON file with nested sections: connection, threshold, alert, log,
// strategy. Every field carries a serde default so that older config files
// missing newly-added fields still deserialise. Persistence uses the
// tmp + rename pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy::ofi::OfiConfig;
use crate::strategy::staged::StagedConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_broker_id() -> String {
    "9999".to_string()
}

fn default_app_id() -> String {
    "meridian_client".to_string()
}

fn default_auth_code() -> String {
    "0000000000000000".to_string()
}

fn default_trade_front() -> String {
    "tcp://180.168.146.187:10201".to_string()
}

fn default_md_front() -> String {
    "tcp://180.168.146.187:10211".to_string()
}

fn default_flow_path() -> String {
    "./flow/".to_string()
}

fn default_repeat_threshold() -> u64 {
    10
}

fn default_total_threshold() -> u64 {
    500
}

fn default_max_order_volume() -> i64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    587
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_rotation_days() -> u32 {
    1
}

fn default_retention_days() -> u32 {
    30
}

// =============================================================================
// Sections
// =============================================================================

/// Brokerage connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_broker_id")]
    pub broker_id: String,

    #[serde(default)]
    pub investor_id: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default = "default_auth_code")]
    pub auth_code: String,

    /// Trading front address.
    #[serde(default = "default_trade_front")]
    pub trade_front: String,

    /// Market-data front address.
    #[serde(default = "default_md_front")]
    pub md_front: String,

    /// Directory for the transport's flow files.
    #[serde(default = "default_flow_path")]
    pub flow_path: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            broker_id: default_broker_id(),
            investor_id: String::new(),
            password: String::new(),
            app_id: default_app_id(),
            auth_code: default_auth_code(),
            trade_front: default_trade_front(),
            md_front: default_md_front(),
            flow_path: default_flow_path(),
        }
    }
}

/// Activity thresholds feeding the threshold manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Per-instrument repeated open-order alert threshold.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_open_threshold: u64,

    /// Per-instrument repeated close-order alert threshold.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_close_threshold: u64,

    /// Per-instrument repeated cancel alert threshold.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_cancel_threshold: u64,

    /// Account-wide total order-count alert threshold.
    #[serde(default = "default_total_threshold")]
    pub total_order_threshold: u64,

    /// Account-wide total cancel-count alert threshold.
    #[serde(default = "default_total_threshold")]
    pub total_cancel_threshold: u64,

    /// Fallback single-order volume cap when the instrument catalogue has
    /// no entry for the traded contract.
    #[serde(default = "default_max_order_volume")]
    pub max_order_volume: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            repeat_open_threshold: default_repeat_threshold(),
            repeat_close_threshold: default_repeat_threshold(),
            repeat_cancel_threshold: default_repeat_threshold(),
            total_order_threshold: default_total_threshold(),
            total_cancel_threshold: default_total_threshold(),
            max_order_volume: default_max_order_volume(),
        }
    }
}

/// Alert sink enablement and email parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_true")]
    pub enable_popup: bool,

    #[serde(default = "default_true")]
    pub enable_sound: bool,

    #[serde(default)]
    pub enable_email: bool,

    #[serde(default)]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_user: String,

    #[serde(default)]
    pub smtp_password: String,

    /// Recipient address for email alerts.
    #[serde(default)]
    pub alert_email: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enable_popup: true,
            enable_sound: true,
            enable_email: false,
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            alert_email: String::new(),
        }
    }
}

/// Audit log location and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Rotation cadence in days.
    #[serde(default = "default_rotation_days")]
    pub rotation_days: u32,

    /// How long rotated files are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            rotation_days: default_rotation_days(),
            retention_days: default_retention_days(),
        }
    }
}

/// Per-strategy tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub ofi: OfiConfig,

    #[serde(default)]
    pub staged: StagedConfig,
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub threshold: ThresholdConfig,

    #[serde(default)]
    pub alert: AlertConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Settings {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error when the file is missing or malformed so the caller
    /// can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            trade_front = %settings.connection.trade_front,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Persist the settings to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;

        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert_eq!(s.connection.broker_id, "9999");
        assert_eq!(s.threshold.repeat_open_threshold, 10);
        assert_eq!(s.threshold.repeat_close_threshold, 10);
        assert_eq!(s.threshold.repeat_cancel_threshold, 10);
        assert_eq!(s.threshold.total_order_threshold, 500);
        assert_eq!(s.threshold.total_cancel_threshold, 500);
        assert_eq!(s.threshold.max_order_volume, 1000);
        assert!(s.alert.enable_popup);
        assert!(s.alert.enable_sound);
        assert!(!s.alert.enable_email);
        assert_eq!(s.log.log_dir, "./logs");
        assert_eq!(s.log.retention_days, 30);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.connection.broker_id, "9999");
        assert_eq!(s.threshold.total_order_threshold, 500);
        assert_eq!(s.log.rotation_days, 1);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "connection": { "investor_id": "100001" },
            "threshold": { "total_order_threshold": 50 }
        }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.connection.investor_id, "100001");
        assert_eq!(s.connection.broker_id, "9999");
        assert_eq!(s.threshold.total_order_threshold, 50);
        assert_eq!(s.threshold.total_cancel_threshold, 500);
    }

    #[test]
    fn roundtrip_serialisation() {
        let mut s = Settings::default();
        s.connection.investor_id = "42".into();
        s.threshold.repeat_cancel_threshold = 7;

        let json = serde_json::to_string(&s).unwrap();
        let s2: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s2.connection.investor_id, "42");
        assert_eq!(s2.threshold.repeat_cancel_threshold, 7);
        assert_eq!(s2.alert.smtp_port, 587);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("meridian-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");

        let mut s = Settings::default();
        s.connection.investor_id = "roundtrip".into();
        s.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.connection.investor_id, "roundtrip");

        std::fs::remove_dir_all(&dir).ok();
    }
}
