// =============================================================================
// OrderValidator — serial pre-trade checks
// =============================================================================
//
// Applies, in order: instrument existence, price positivity and tick
// alignment, volume bounds, margin (opens) or held position (closes), and
// trading hours. The first failing check is returned; an order that passes
// every check is valid.
//
// The account snapshot and position map are refreshed from query responses.
// When either is unknown the corresponding check is skipped and audited —
// the server stays authoritative.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::json;

use crate::audit::AuditLog;
use crate::types::{
    position_key, AccountSnapshot, Direction, InstrumentInfo, Offset, PositionRecord, PositionSide,
};

/// Margin fraction applied to opening notional.
const DEFAULT_MARGIN_RATE: f64 = 0.1;

/// Tolerance for the price-tick alignment check.
const TICK_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationErrorKind {
    InvalidInstrument,
    InvalidPrice,
    InvalidPriceTick,
    ExceedMaxVolume,
    InsufficientMargin,
    InsufficientPosition,
    NotTradingTime,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInstrument => "invalid-instrument",
            Self::InvalidPrice => "invalid-price",
            Self::InvalidPriceTick => "invalid-price-tick",
            Self::ExceedMaxVolume => "exceed-max-volume",
            Self::InsufficientMargin => "insufficient-margin",
            Self::InsufficientPosition => "insufficient-position",
            Self::NotTradingTime => "not-trading-time",
        }
    }
}

/// Outcome of a validation pass; a value, never an exception.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub kind: Option<ValidationErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            kind: None,
            message: String::new(),
            details: None,
        }
    }

    fn fail(kind: ValidationErrorKind, message: String) -> Self {
        Self {
            valid: false,
            kind: Some(kind),
            message,
            details: None,
        }
    }

    fn fail_with(kind: ValidationErrorKind, message: String, details: serde_json::Value) -> Self {
        Self {
            valid: false,
            kind: Some(kind),
            message,
            details: Some(details),
        }
    }
}

// ---------------------------------------------------------------------------
// Trading session table
// ---------------------------------------------------------------------------

/// One tradable time window.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub name: &'static str,
}

fn t(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

/// Domestic futures trading windows (day session in three blocks, night
/// session spanning midnight as three records).
pub fn default_trading_windows() -> Vec<TradingWindow> {
    vec![
        TradingWindow { start: t(9, 0, 0), end: t(10, 15, 0), name: "morning-1" },
        TradingWindow { start: t(10, 30, 0), end: t(11, 30, 0), name: "morning-2" },
        TradingWindow { start: t(13, 30, 0), end: t(15, 0, 0), name: "afternoon" },
        TradingWindow { start: t(21, 0, 0), end: t(23, 0, 0), name: "night-1" },
        TradingWindow { start: t(23, 0, 0), end: t(23, 59, 59), name: "night-2" },
        TradingWindow { start: t(0, 0, 0), end: t(2, 30, 0), name: "night-3" },
    ]
}

// ---------------------------------------------------------------------------
// OrderValidator
// ---------------------------------------------------------------------------

pub struct OrderValidator {
    instruments: parking_lot::RwLock<HashMap<String, InstrumentInfo>>,
    account: parking_lot::RwLock<Option<AccountSnapshot>>,
    positions: parking_lot::RwLock<HashMap<String, PositionRecord>>,
    windows: Vec<TradingWindow>,
    margin_rate: f64,
    /// Volume cap applied when the catalogue has no entry.
    fallback_max_volume: i64,
    audit: Arc<AuditLog>,
}

impl OrderValidator {
    pub fn new(fallback_max_volume: i64, audit: Arc<AuditLog>) -> Self {
        Self {
            instruments: parking_lot::RwLock::new(HashMap::new()),
            account: parking_lot::RwLock::new(None),
            positions: parking_lot::RwLock::new(HashMap::new()),
            windows: default_trading_windows(),
            margin_rate: DEFAULT_MARGIN_RATE,
            fallback_max_volume,
            audit,
        }
    }

    // -------------------------------------------------------------------------
    // Snapshot updates (from session queries)
    // -------------------------------------------------------------------------

    pub fn update_instruments(&self, instruments: HashMap<String, InstrumentInfo>) {
        *self.instruments.write() = instruments;
    }

    pub fn update_account(&self, account: AccountSnapshot) {
        *self.account.write() = Some(account);
    }

    pub fn update_positions(&self, positions: HashMap<String, PositionRecord>) {
        *self.positions.write() = positions;
    }

    pub fn instrument(&self, instrument_id: &str) -> Option<InstrumentInfo> {
        self.instruments.read().get(instrument_id).cloned()
    }

    // -------------------------------------------------------------------------
    // Full validation
    // -------------------------------------------------------------------------

    /// Validate against the current wall clock.
    pub fn validate_order(
        &self,
        instrument_id: &str,
        direction: Direction,
        offset: Offset,
        price: f64,
        volume: i64,
    ) -> ValidationResult {
        self.validate_order_at(
            instrument_id,
            direction,
            offset,
            price,
            volume,
            Local::now().naive_local(),
        )
    }

    /// Validate at an explicit instant; a pure function of the inputs and
    /// the validator's snapshot caches.
    pub fn validate_order_at(
        &self,
        instrument_id: &str,
        direction: Direction,
        offset: Offset,
        price: f64,
        volume: i64,
        now: NaiveDateTime,
    ) -> ValidationResult {
        let result = self.validate_instrument(instrument_id);
        if !result.valid {
            return result;
        }

        let instrument = self.instrument(instrument_id);

        let price_tick = instrument.as_ref().map(|i| i.price_tick).unwrap_or(0.01);
        let result = self.validate_price(price, price_tick);
        if !result.valid {
            return result;
        }

        let max_volume = instrument
            .as_ref()
            .map(|i| i.max_order_volume)
            .unwrap_or(self.fallback_max_volume);
        let result = self.validate_volume(volume, max_volume);
        if !result.valid {
            return result;
        }

        let result = if offset.is_open() {
            self.validate_margin(instrument_id, price, volume)
        } else {
            self.validate_position(instrument_id, direction, volume)
        };
        if !result.valid {
            return result;
        }

        self.validate_trading_time(now)
    }

    // -------------------------------------------------------------------------
    // Individual checks
    // -------------------------------------------------------------------------

    pub fn validate_instrument(&self, instrument_id: &str) -> ValidationResult {
        if instrument_id.is_empty() {
            let message = "instrument id is empty".to_string();
            self.audit
                .validation_error("INSTRUMENT", &message, json!({}));
            return ValidationResult::fail(ValidationErrorKind::InvalidInstrument, message);
        }

        let instruments = self.instruments.read();
        if instruments.is_empty() {
            // Catalogue not loaded yet: defer to the server.
            self.audit.monitor(
                "instrument catalogue not loaded, skipping local check",
                Some(json!({ "instrument_id": instrument_id })),
            );
            return ValidationResult::ok();
        }

        if !instruments.contains_key(instrument_id) {
            let message = format!("unknown instrument: {instrument_id}");
            self.audit.validation_error(
                "INSTRUMENT",
                &message,
                json!({ "instrument_id": instrument_id }),
            );
            return ValidationResult::fail_with(
                ValidationErrorKind::InvalidInstrument,
                message,
                json!({ "instrument_id": instrument_id }),
            );
        }

        ValidationResult::ok()
    }

    pub fn validate_price(&self, price: f64, price_tick: f64) -> ValidationResult {
        if price <= 0.0 {
            let message = format!("order price must be positive, got {price}");
            self.audit
                .validation_error("PRICE", &message, json!({ "price": price }));
            return ValidationResult::fail(ValidationErrorKind::InvalidPrice, message);
        }

        if price_tick <= 0.0 {
            return ValidationResult::ok();
        }

        let remainder = price % price_tick;
        if remainder > TICK_EPSILON && (remainder - price_tick).abs() > TICK_EPSILON {
            let message = format!(
                "price {price} is not a multiple of the price tick {price_tick}"
            );
            self.audit.validation_error(
                "PRICE_TICK",
                &message,
                json!({ "price": price, "price_tick": price_tick, "remainder": remainder }),
            );
            return ValidationResult::fail_with(
                ValidationErrorKind::InvalidPriceTick,
                message,
                json!({ "price": price, "price_tick": price_tick, "remainder": remainder }),
            );
        }

        ValidationResult::ok()
    }

    pub fn validate_volume(&self, volume: i64, max_volume: i64) -> ValidationResult {
        if volume <= 0 {
            let message = format!("order volume must be positive, got {volume}");
            self.audit
                .validation_error("VOLUME", &message, json!({ "volume": volume }));
            return ValidationResult::fail(ValidationErrorKind::ExceedMaxVolume, message);
        }

        if volume > max_volume {
            let message = format!(
                "order volume {volume} exceeds the single-order maximum {max_volume}"
            );
            self.audit.validation_error(
                "MAX_VOLUME",
                &message,
                json!({ "volume": volume, "max_volume": max_volume }),
            );
            return ValidationResult::fail_with(
                ValidationErrorKind::ExceedMaxVolume,
                message,
                json!({ "volume": volume, "max_volume": max_volume }),
            );
        }

        ValidationResult::ok()
    }

    pub fn validate_margin(&self, instrument_id: &str, price: f64, volume: i64) -> ValidationResult {
        let Some(account) = self.account.read().clone() else {
            self.audit.monitor(
                "account snapshot not loaded, skipping margin check",
                Some(json!({ "instrument_id": instrument_id })),
            );
            return ValidationResult::ok();
        };

        let multiplier = self
            .instrument(instrument_id)
            .map(|i| i.volume_multiple)
            .unwrap_or(10);
        let required = price * volume as f64 * multiplier as f64 * self.margin_rate;

        if required > account.available {
            let message = format!(
                "insufficient margin: required {:.2}, available {:.2}",
                required, account.available
            );
            self.audit.validation_error(
                "MARGIN",
                &message,
                json!({
                    "instrument_id": instrument_id,
                    "required_margin": required,
                    "available": account.available,
                    "shortfall": required - account.available,
                }),
            );
            return ValidationResult::fail_with(
                ValidationErrorKind::InsufficientMargin,
                message,
                json!({ "required_margin": required, "available": account.available }),
            );
        }

        ValidationResult::ok()
    }

    pub fn validate_position(
        &self,
        instrument_id: &str,
        direction: Direction,
        volume: i64,
    ) -> ValidationResult {
        let positions = self.positions.read();
        if positions.is_empty() {
            self.audit.monitor(
                "position map not loaded, skipping position check",
                Some(json!({ "instrument_id": instrument_id })),
            );
            return ValidationResult::ok();
        }

        // A buy close flattens a short; a sell close flattens a long.
        let side = match direction {
            Direction::Buy => PositionSide::Short,
            Direction::Sell => PositionSide::Long,
        };
        let held = positions
            .get(&position_key(instrument_id, side))
            .map(|p| p.volume)
            .unwrap_or(0);

        if volume > held {
            let message = format!(
                "insufficient position: closing {volume}, held {held} ({side})"
            );
            self.audit.validation_error(
                "POSITION",
                &message,
                json!({
                    "instrument_id": instrument_id,
                    "volume": volume,
                    "held": held,
                    "side": side.to_string(),
                }),
            );
            return ValidationResult::fail_with(
                ValidationErrorKind::InsufficientPosition,
                message,
                json!({ "volume": volume, "held": held }),
            );
        }

        ValidationResult::ok()
    }

    pub fn validate_trading_time(&self, now: NaiveDateTime) -> ValidationResult {
        let weekday = now.weekday().num_days_from_monday();
        if weekday >= 5 {
            let message = format!("outside trading hours: weekend (weekday {})", weekday + 1);
            self.audit
                .validation_error("TRADING_TIME", &message, json!({ "weekday": weekday }));
            return ValidationResult::fail(ValidationErrorKind::NotTradingTime, message);
        }

        let time = now.time();
        if self
            .windows
            .iter()
            .any(|w| w.start <= time && time <= w.end)
        {
            return ValidationResult::ok();
        }

        let message = format!(
            "outside trading hours: {} is in no configured session",
            time.format("%H:%M:%S")
        );
        self.audit.validation_error(
            "TRADING_TIME",
            &message,
            json!({
                "time": time.format("%H:%M:%S").to_string(),
                "windows": self
                    .windows
                    .iter()
                    .map(|w| format!("{}-{} ({})", w.start, w.end, w.name))
                    .collect::<Vec<String>>(),
            }),
        );
        ValidationResult::fail(ValidationErrorKind::NotTradingTime, message)
    }

    pub fn is_trading_time(&self, now: NaiveDateTime) -> bool {
        self.validate_trading_time(now).valid
    }
}

impl std::fmt::Debug for OrderValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderValidator")
            .field("instruments", &self.instruments.read().len())
            .field("account_loaded", &self.account.read().is_some())
            .field("positions", &self.positions.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn validator() -> OrderValidator {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "meridian-validator-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        OrderValidator::new(1000, Arc::new(AuditLog::new(dir, 7).unwrap()))
    }

    fn loaded_validator() -> OrderValidator {
        let v = validator();
        let mut instruments = HashMap::new();
        instruments.insert(
            "rb2505".to_string(),
            InstrumentInfo {
                instrument_id: "rb2505".into(),
                exchange_id: "SHFE".into(),
                instrument_name: "rebar 2505".into(),
                volume_multiple: 10,
                price_tick: 1.0,
                max_order_volume: 1000,
                min_order_volume: 1,
            },
        );
        v.update_instruments(instruments);
        v
    }

    /// A Friday morning inside the first day session.
    fn in_session() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn rejection_cascade_unknown_instrument_then_tick_then_volume() {
        let v = loaded_validator();

        let r = v.validate_order_at("XYZ", Direction::Buy, Offset::Open, 3000.0, 1, in_session());
        assert!(!r.valid);
        assert_eq!(r.kind, Some(ValidationErrorKind::InvalidInstrument));

        let r = v.validate_order_at(
            "rb2505",
            Direction::Buy,
            Offset::Open,
            3000.37,
            1,
            in_session(),
        );
        assert!(!r.valid);
        assert_eq!(r.kind, Some(ValidationErrorKind::InvalidPriceTick));

        let r = v.validate_order_at(
            "rb2505",
            Direction::Buy,
            Offset::Open,
            3000.0,
            2000,
            in_session(),
        );
        assert!(!r.valid);
        assert_eq!(r.kind, Some(ValidationErrorKind::ExceedMaxVolume));
    }

    #[test]
    fn empty_and_nonpositive_inputs_fail() {
        let v = loaded_validator();

        let r = v.validate_order_at("", Direction::Buy, Offset::Open, 3000.0, 1, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::InvalidInstrument));

        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 0.0, 1, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::InvalidPrice));

        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 3000.0, 0, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::ExceedMaxVolume));
    }

    #[test]
    fn unloaded_catalogue_defers_to_server() {
        let v = validator();
        let r = v.validate_order_at(
            "whatever",
            Direction::Buy,
            Offset::Open,
            3000.0,
            1,
            in_session(),
        );
        assert!(r.valid);
    }

    #[test]
    fn margin_check_uses_multiplier_and_rate() {
        let v = loaded_validator();
        v.update_account(AccountSnapshot {
            available: 10_000.0,
            balance: 10_000.0,
            frozen_margin: 0.0,
            frozen_commission: 0.0,
        });

        // 3000 * 3 * 10 * 0.1 = 9000 <= 10000: passes.
        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 3000.0, 3, in_session());
        assert!(r.valid);

        // 3000 * 4 * 10 * 0.1 = 12000 > 10000: fails.
        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 3000.0, 4, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::InsufficientMargin));
    }

    #[test]
    fn close_checks_the_opposing_side() {
        let v = loaded_validator();
        let mut positions = HashMap::new();
        positions.insert(
            position_key("rb2505", PositionSide::Long),
            PositionRecord {
                instrument_id: "rb2505".into(),
                side: PositionSide::Long,
                volume: 2,
                today_volume: 2,
                yesterday_volume: 0,
            },
        );
        v.update_positions(positions);

        // Sell close inspects the long side: 2 held.
        let r = v.validate_order_at("rb2505", Direction::Sell, Offset::Close, 3000.0, 2, in_session());
        assert!(r.valid);
        let r = v.validate_order_at("rb2505", Direction::Sell, Offset::Close, 3000.0, 3, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::InsufficientPosition));

        // Buy close inspects the short side: nothing held there.
        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Close, 3000.0, 1, in_session());
        assert_eq!(r.kind, Some(ValidationErrorKind::InsufficientPosition));
    }

    #[test]
    fn weekend_and_off_hours_are_rejected() {
        let v = loaded_validator();

        let saturday = NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 3000.0, 1, saturday);
        assert_eq!(r.kind, Some(ValidationErrorKind::NotTradingTime));

        let lunch_break = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let r = v.validate_order_at("rb2505", Direction::Buy, Offset::Open, 3000.0, 1, lunch_break);
        assert_eq!(r.kind, Some(ValidationErrorKind::NotTradingTime));

        let night = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        assert!(v.is_trading_time(night));

        let late_night = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        assert!(v.is_trading_time(late_night));
    }

    #[test]
    fn validation_is_deterministic_for_fixed_inputs() {
        let v = loaded_validator();
        let first = v.validate_order_at(
            "rb2505",
            Direction::Buy,
            Offset::Open,
            3000.0,
            1,
            in_session(),
        );
        for _ in 0..5 {
            let again = v.validate_order_at(
                "rb2505",
                Direction::Buy,
                Offset::Open,
                3000.0,
                1,
                in_session(),
            );
            assert_eq!(first.valid, again.valid);
            assert_eq!(first.kind, again.kind);
        }
    }

    #[test]
    fn tick_alignment_tolerates_float_noise() {
        let v = validator();
        // 0.2 % 0.1 leaves float residue close to the tick itself.
        assert!(v.validate_price(0.2, 0.1).valid);
        assert!(v.validate_price(7.3, 0.1).valid);
        assert!(!v.validate_price(7.35, 0.1).valid);
        assert!(!v.validate_price(3000.37, 1.0).valid);
    }
}
