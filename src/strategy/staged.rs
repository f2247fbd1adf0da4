// =============================================================================
// Staged-position bar strategy
// =============================================================================
//
// Runs on completed one-minute bars. Each bar produces a feature frame
// (see `features`), pushed into the rolling sequence cache; once the cache
// holds a full sequence the injected predictor maps the scaled matrix to a
// probability. Longs need probability above the threshold with the RSI not
// overbought; shorts mirror. Position sizing and exits are delegated to the
// probe/full/trail ladder, evaluated on every tick while a position is on.
//
// Without an injected predictor a contrarian RSI heuristic stands in, so
// the strategy can run (and be drilled) with no model artifact present.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::AuditLog;
use crate::clock::is_new_trading_day;
use crate::market::bar::{BarAggregator, BarBuffer, DEFAULT_BAR_CAPACITY};
use crate::market::context::{ContextStore, ExecutionContext, SignalContext, TradeContext};
use crate::market::feature_cache::FeatureSequenceCache;
use crate::strategy::features::FeatureEngine;
use crate::strategy::position::{LadderConfig, PositionLadder, PositionState};
use crate::strategy::{DailyStats, OrderIntent};
use crate::types::{Bar, Direction, Offset, Tick};

pub const STRATEGY_ID: &str = "staged_bar";

// =============================================================================
// Prediction seam
// =============================================================================

/// Opaque inference backend: a scaled S×D feature matrix in, a probability
/// of an upward move out.
pub trait Predictor: Send + Sync {
    fn predict(&self, matrix: &[Vec<f64>]) -> f64;
}

// =============================================================================
// Config
// =============================================================================

fn default_instrument_id() -> String {
    "rb2505".to_string()
}

fn default_tick_size() -> f64 {
    1.0
}

fn default_sl() -> f64 {
    0.004
}

fn default_tp() -> f64 {
    0.012
}

fn default_rsi_upper() -> f64 {
    55.0
}

fn default_rsi_lower() -> f64 {
    45.0
}

fn default_threshold() -> f64 {
    0.5
}

fn default_probe_size() -> f64 {
    0.3
}

fn default_full_size() -> f64 {
    1.0
}

fn default_trail_dd() -> f64 {
    0.30
}

fn default_order_size() -> i64 {
    1
}

fn default_seq_len() -> usize {
    10
}

fn default_commission_rate() -> f64 {
    0.00005
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedConfig {
    #[serde(default = "default_instrument_id")]
    pub instrument_id: String,

    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// Base stop-loss fraction; ladder thresholds derive from this.
    #[serde(default = "default_sl")]
    pub sl: f64,

    /// Trail take-profit fraction.
    #[serde(default = "default_tp")]
    pub tp: f64,

    #[serde(default = "default_rsi_upper")]
    pub rsi_upper: f64,

    #[serde(default = "default_rsi_lower")]
    pub rsi_lower: f64,

    /// Probability threshold for a directional signal.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_probe_size")]
    pub probe_size: f64,

    #[serde(default = "default_full_size")]
    pub full_size: f64,

    #[serde(default = "default_trail_dd")]
    pub trail_dd: f64,

    /// Lots at full size.
    #[serde(default = "default_order_size")]
    pub order_size: i64,

    /// Feature frames per prediction.
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,

    /// One-way commission as a fraction of notional.
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,

    #[serde(default = "default_true")]
    pub use_iceberg: bool,

    #[serde(default = "default_true")]
    pub use_large_order: bool,

    #[serde(default = "default_true")]
    pub use_volatility: bool,
}

impl Default for StagedConfig {
    fn default() -> Self {
        Self {
            instrument_id: default_instrument_id(),
            tick_size: default_tick_size(),
            sl: default_sl(),
            tp: default_tp(),
            rsi_upper: default_rsi_upper(),
            rsi_lower: default_rsi_lower(),
            threshold: default_threshold(),
            probe_size: default_probe_size(),
            full_size: default_full_size(),
            trail_dd: default_trail_dd(),
            order_size: default_order_size(),
            seq_len: default_seq_len(),
            commission_rate: default_commission_rate(),
            use_iceberg: true,
            use_large_order: true,
            use_volatility: true,
        }
    }
}

impl StagedConfig {
    fn ladder_config(&self) -> LadderConfig {
        LadderConfig {
            sl: self.sl,
            tp: self.tp,
            rsi_upper: self.rsi_upper,
            rsi_lower: self.rsi_lower,
            threshold: self.threshold,
            probe_size: self.probe_size,
            full_size: self.full_size,
            trail_dd: self.trail_dd,
        }
    }
}

/// Completed round trip.
#[derive(Debug, Clone, Serialize)]
pub struct StagedTrade {
    pub trade_id: usize,
    pub direction: i32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_prob: f64,
    pub entry_rsi: f64,
    pub hold_bars: u64,
    pub peak_profit: f64,
    pub pnl_pct: f64,
    pub net_pnl_pct: f64,
    pub exit_reason: String,
}

// =============================================================================
// Strategy
// =============================================================================

pub struct StagedStrategy {
    config: StagedConfig,
    run_flag: Arc<AtomicBool>,

    engine: FeatureEngine,
    aggregator: BarAggregator,
    bar_buffer: BarBuffer,
    feature_cache: FeatureSequenceCache,
    ladder: PositionLadder,
    predictor: Option<Arc<dyn Predictor>>,

    bar_count: u64,
    last_prob: f64,
    last_rsi: f64,

    daily_pnl: f64,
    daily_trades: u32,
    current_date: Option<NaiveDate>,

    trades: Vec<StagedTrade>,
    contexts: ContextStore,
    audit: Arc<AuditLog>,
}

impl StagedStrategy {
    pub fn new(
        config: StagedConfig,
        predictor: Option<Arc<dyn Predictor>>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let engine = FeatureEngine::new(
            config.use_iceberg,
            config.use_large_order,
            config.use_volatility,
        );
        let feature_cache = FeatureSequenceCache::new(config.seq_len, engine.feature_names());
        let ladder = PositionLadder::new(config.ladder_config());

        audit.system(
            "bar strategy initialised",
            Some(json!({
                "strategy": STRATEGY_ID,
                "instrument_id": config.instrument_id,
                "sl_pct": config.sl * 100.0,
                "tp_pct": config.tp * 100.0,
                "rsi_filter": [config.rsi_lower, config.rsi_upper],
                "probe_size": config.probe_size,
                "full_size": config.full_size,
                "seq_len": config.seq_len,
                "feature_dim": feature_cache.feature_dim(),
                "has_predictor": predictor.is_some(),
            })),
        );

        Self {
            config,
            run_flag: Arc::new(AtomicBool::new(true)),
            engine,
            aggregator: BarAggregator::new(),
            bar_buffer: BarBuffer::new(DEFAULT_BAR_CAPACITY),
            feature_cache,
            ladder,
            predictor,
            bar_count: 0,
            last_prob: 0.5,
            last_rsi: 50.0,
            daily_pnl: 0.0,
            daily_trades: 0,
            current_date: None,
            trades: Vec::new(),
            contexts: ContextStore::default(),
            audit,
        }
    }

    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.run_flag.clone()
    }

    pub fn instrument_id(&self) -> &str {
        &self.config.instrument_id
    }

    pub fn position_state(&self) -> PositionState {
        self.ladder.state()
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn trades(&self) -> &[StagedTrade] {
        &self.trades
    }

    /// Most recent decision-capture records, newest last.
    pub fn recent_contexts(&self, limit: usize) -> Vec<TradeContext> {
        self.contexts.recent(limit)
    }

    pub fn daily_stats(&self) -> DailyStats {
        let net: Vec<f64> = self.trades.iter().map(|t| t.net_pnl_pct).collect();
        DailyStats::from_net_pnls(&net)
    }

    // -------------------------------------------------------------------------
    // Tick entry point
    // -------------------------------------------------------------------------

    pub fn on_tick(&mut self, tick: &Tick) -> Vec<OrderIntent> {
        if !self.run_flag.load(Ordering::SeqCst) {
            return Vec::new();
        }
        if tick.instrument_id != self.config.instrument_id {
            return Vec::new();
        }

        self.roll_daily(tick.timestamp.date());
        self.engine.add_tick(tick);

        let completed = self.aggregator.on_tick(tick);

        let mut intents = Vec::new();
        if let Some(bar) = completed {
            intents.extend(self.on_bar_completed(&bar));
        }
        if self.ladder.has_position() && tick.last_price > 0.0 {
            intents.extend(self.update_position(tick.last_price));
        }
        intents
    }

    fn roll_daily(&mut self, date: NaiveDate) {
        if !is_new_trading_day(self.current_date, date) {
            return;
        }
        if self.current_date.is_some() {
            self.audit.system(
                "trading day rolled, resetting daily strategy stats",
                Some(json!({
                    "strategy": STRATEGY_ID,
                    "previous_daily_pnl_pct": self.daily_pnl * 100.0,
                    "previous_daily_trades": self.daily_trades,
                })),
            );
        }
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        self.current_date = Some(date);
    }

    // -------------------------------------------------------------------------
    // Bar completion: features, prediction, entries
    // -------------------------------------------------------------------------

    fn on_bar_completed(&mut self, bar: &Bar) -> Vec<OrderIntent> {
        self.bar_count += 1;
        self.bar_buffer.push(bar.clone());
        self.engine.add_bar(bar);

        let features = self.engine.calculate();
        self.last_rsi = features.get("rsi_14").copied().unwrap_or(50.0);
        self.feature_cache.push(&features);

        if !self.feature_cache.is_ready() {
            return Vec::new();
        }

        let prob = self.predict();
        self.last_prob = prob;

        let signal = self.ladder.check_entry_signal(prob, self.last_rsi);
        if signal == 0 || bar.close <= 0.0 {
            return Vec::new();
        }

        if !self.ladder.enter(signal, bar.close, prob, self.last_rsi, self.bar_count) {
            return Vec::new();
        }

        let volume = self.probe_volume();
        self.audit.monitor(
            "bar strategy entry",
            Some(json!({
                "strategy": STRATEGY_ID,
                "direction": if signal == 1 { "long" } else { "short" },
                "entry_price": bar.close,
                "prob": prob,
                "rsi": self.last_rsi,
                "size": self.config.probe_size,
            })),
        );

        self.contexts.save(TradeContext {
            symbol: self.config.instrument_id.clone(),
            strategy_name: STRATEGY_ID.into(),
            trade_type: "entry".into(),
            timestamp: bar.datetime.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            strategy_version: "1.0".into(),
            feature_matrix: Some(self.feature_cache.matrix()),
            signal: Some(SignalContext {
                prediction_prob: prob,
                rsi_value: self.last_rsi,
                signal_direction: signal,
                ..SignalContext::default()
            }),
            ..TradeContext::default()
        });

        vec![OrderIntent {
            strategy_id: STRATEGY_ID,
            instrument_id: self.config.instrument_id.clone(),
            direction: if signal == 1 {
                Direction::Buy
            } else {
                Direction::Sell
            },
            offset: Offset::Open,
            price: bar.close,
            volume,
            reason: "model_entry".into(),
        }]
    }

    fn predict(&self) -> f64 {
        match &self.predictor {
            Some(predictor) => {
                let matrix = self.feature_cache.scaled_matrix();
                predictor.predict(&matrix).clamp(0.0, 1.0)
            }
            // Contrarian RSI fallback when no model is loaded.
            None => {
                if self.last_rsi > 60.0 {
                    0.3
                } else if self.last_rsi < 40.0 {
                    0.7
                } else {
                    0.5
                }
            }
        }
    }

    fn probe_volume(&self) -> i64 {
        ((self.config.order_size as f64 * self.config.probe_size) as i64).max(1)
    }

    fn exit_volume(&self, size: f64) -> i64 {
        ((self.config.order_size as f64 * size) as i64).max(1)
    }

    // -------------------------------------------------------------------------
    // Per-tick position management
    // -------------------------------------------------------------------------

    fn update_position(&mut self, price: f64) -> Vec<OrderIntent> {
        // Only a reverse model signal matters while holding.
        let mut pending_signal = if self.feature_cache.is_ready() {
            self.ladder.raw_signal(self.last_prob, self.last_rsi)
        } else {
            0
        };
        if let Some(position) = self.ladder.position() {
            if pending_signal == position.direction {
                pending_signal = 0;
            }
        }

        let state_before = self.ladder.state();
        let (should_exit, reason, pnl_pct) = self.ladder.update(price, pending_signal);
        let state_after = self.ladder.state();

        if state_before != state_after {
            self.audit.monitor(
                "bar strategy position upgraded",
                Some(json!({
                    "strategy": STRATEGY_ID,
                    "from": state_before.to_string(),
                    "to": state_after.to_string(),
                    "pnl_pct": pnl_pct * 100.0,
                })),
            );
        }

        if !should_exit {
            return Vec::new();
        }
        self.exit_position(price, &reason, pnl_pct)
    }

    fn exit_position(&mut self, exit_price: f64, reason: &str, pnl_pct: f64) -> Vec<OrderIntent> {
        let Some(position) = self.ladder.exit() else {
            return Vec::new();
        };

        let net_pnl_pct = pnl_pct - self.config.commission_rate * 2.0;
        self.daily_pnl += net_pnl_pct;
        self.daily_trades += 1;

        self.audit.monitor(
            "bar strategy exit",
            Some(json!({
                "strategy": STRATEGY_ID,
                "direction": if position.direction == 1 { "long" } else { "short" },
                "exit_price": exit_price,
                "reason": reason,
                "pnl_pct": pnl_pct * 100.0,
                "net_pnl_pct": net_pnl_pct * 100.0,
                "daily_trades": self.daily_trades,
                "daily_pnl_pct": self.daily_pnl * 100.0,
            })),
        );

        self.trades.push(StagedTrade {
            trade_id: self.trades.len() + 1,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            entry_prob: position.entry_prob,
            entry_rsi: position.entry_rsi,
            hold_bars: position.hold_bars,
            peak_profit: position.peak_profit,
            pnl_pct,
            net_pnl_pct,
            exit_reason: reason.to_string(),
        });

        self.contexts.save(TradeContext {
            symbol: self.config.instrument_id.clone(),
            strategy_name: STRATEGY_ID.into(),
            trade_type: "exit".into(),
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.3f")
                .to_string(),
            strategy_version: "1.0".into(),
            signal: Some(SignalContext {
                signal_reason: reason.to_string(),
                ..SignalContext::default()
            }),
            execution: Some(ExecutionContext {
                fill_price: exit_price,
                fill_volume: self.exit_volume(position.current_size),
                status: "closed".into(),
                ..ExecutionContext::default()
            }),
            ..TradeContext::default()
        });

        vec![OrderIntent {
            strategy_id: STRATEGY_ID,
            instrument_id: self.config.instrument_id.clone(),
            direction: if position.direction == 1 {
                Direction::Sell
            } else {
                Direction::Buy
            },
            offset: Offset::CloseToday,
            price: exit_price,
            volume: self.exit_volume(position.current_size),
            reason: reason.to_string(),
        }]
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub fn status(&self) -> serde_json::Value {
        json!({
            "name": STRATEGY_ID,
            "running": self.run_flag.load(Ordering::SeqCst),
            "bar_count": self.bar_count,
            "last_prob": self.last_prob,
            "last_rsi": self.last_rsi,
            "daily_pnl_pct": self.daily_pnl * 100.0,
            "daily_trades": self.daily_trades,
            "position_state": self.ladder.state().to_string(),
            "position": self.ladder.position().map(|p| json!({
                "direction": p.direction,
                "entry_price": p.entry_price,
                "current_size": p.current_size,
                "hold_bars": p.hold_bars,
                "peak_profit": p.peak_profit,
                "entry_prob": p.entry_prob,
            })),
        })
    }
}

impl std::fmt::Debug for StagedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedStrategy")
            .field("instrument_id", &self.config.instrument_id)
            .field("state", &self.ladder.state())
            .field("bar_count", &self.bar_count)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::atomic::AtomicU32;

    fn audit() -> Arc<AuditLog> {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "meridian-staged-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        Arc::new(AuditLog::new(dir, 7).unwrap())
    }

    /// Predictor scripted to a fixed probability.
    struct FixedPredictor(f64);

    impl Predictor for FixedPredictor {
        fn predict(&self, _matrix: &[Vec<f64>]) -> f64 {
            self.0
        }
    }

    fn ts(minute: u32, second: u32) -> NaiveDateTime {
        // Minutes count from 09:00 to keep the arithmetic simple.
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + chrono::Duration::seconds((minute * 60 + second) as i64)
    }

    fn tick(minute: u32, second: u32, price: f64) -> Tick {
        Tick {
            instrument_id: "rb2505".into(),
            timestamp: ts(minute, second),
            trading_day: "20250314".into(),
            action_day: "20250314".into(),
            last_price: price,
            bid_price: price - 1.0,
            bid_volume: 300,
            ask_price: price + 1.0,
            ask_volume: 300,
            volume: 10_000 + (minute * 60 + second) as i64,
            turnover: 0.0,
            open_interest: 0.0,
        }
    }

    /// Drive one full minute with two ticks closing at `close`; the next
    /// minute's first tick completes the bar.
    fn feed_minute(s: &mut StagedStrategy, minute: u32, close: f64) -> Vec<OrderIntent> {
        let mut intents = s.on_tick(&tick(minute, 1, close));
        intents.extend(s.on_tick(&tick(minute, 30, close)));
        intents
    }

    fn strategy_with(prob: f64) -> StagedStrategy {
        StagedStrategy::new(
            StagedConfig::default(),
            Some(Arc::new(FixedPredictor(prob))),
            audit(),
        )
    }

    /// Feed minutes 0..=9 at a constant close. The tenth completed bar (and
    /// therefore the tenth feature frame, making the sequence cache ready)
    /// arrives with minute 10's first tick, so nothing fires during these.
    /// Returns the minute whose first tick will carry the readiness bar.
    fn warm_up(s: &mut StagedStrategy, close: f64) -> u32 {
        for minute in 0..10 {
            let intents = feed_minute(s, minute, close);
            assert!(intents.is_empty(), "unexpected intent during warm-up");
        }
        10
    }

    #[test]
    fn no_entry_until_sequence_is_ready() {
        let mut s = strategy_with(0.9);
        // Nine completed bars = nine frames: one short of a full sequence.
        for minute in 0..10 {
            assert!(feed_minute(&mut s, minute, 3000.0).is_empty());
        }
        assert_eq!(s.position_state(), PositionState::Flat);
    }

    #[test]
    fn entry_opens_probe_with_floored_volume() {
        let mut s = strategy_with(0.9);
        let minute = warm_up(&mut s, 3000.0);

        // The bar completion that fills the sequence carries the entry.
        let intents = feed_minute(&mut s, minute, 3000.0);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].direction, Direction::Buy);
        assert_eq!(intents[0].offset, Offset::Open);
        // order_size 1 * probe 0.3 floors to the 1-lot minimum.
        assert_eq!(intents[0].volume, 1);
        assert_eq!(s.position_state(), PositionState::Probe);
        // Entry books at the completed bar's close.
        let entry = s.status()["position"]["entry_price"].as_f64().unwrap();
        assert_eq!(entry, 3000.0);
    }

    #[test]
    fn full_ladder_cycle_through_trail_take_profit() {
        let mut s = strategy_with(0.9);
        let minute = warm_up(&mut s, 3000.0);

        let intents = feed_minute(&mut s, minute, 3000.0);
        assert_eq!(intents.len(), 1);
        let entry = s.status()["position"]["entry_price"].as_f64().unwrap();

        // +0.4% upgrades to full. (This tick also completes the previous
        // minute's bar; the ladder is non-flat, so no fresh entry fires.)
        let price_full = entry * 1.004;
        assert!(s.on_tick(&tick(minute + 1, 1, price_full)).is_empty());
        assert_eq!(s.position_state(), PositionState::Full);

        // +0.7% starts trailing.
        let price_trail = entry * 1.007;
        assert!(s.on_tick(&tick(minute + 1, 30, price_trail)).is_empty());
        assert_eq!(s.position_state(), PositionState::Trail);

        // +1.2% takes profit and closes the full size.
        let price_tp = entry * 1.012;
        let intents = s.on_tick(&tick(minute + 1, 45, price_tp));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].direction, Direction::Sell);
        assert_eq!(intents[0].offset, Offset::CloseToday);
        assert_eq!(s.position_state(), PositionState::Flat);

        let trade = &s.trades()[0];
        assert_eq!(trade.exit_reason, "trail_tp");
        assert!(trade.pnl_pct >= 0.012 - 1e-9);
        assert_eq!(s.daily_trades, 1);

        // Both sides of the round trip were captured, the entry with its
        // feature matrix.
        let contexts = s.recent_contexts(10);
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].trade_type, "entry");
        assert!(contexts[0].feature_matrix.is_some());
        assert_eq!(
            contexts[1].signal.as_ref().unwrap().signal_reason,
            "trail_tp"
        );
    }

    #[test]
    fn short_entry_when_probability_is_low() {
        let mut s = strategy_with(0.1);
        let minute = warm_up(&mut s, 3000.0);

        let intents = feed_minute(&mut s, minute, 3000.0);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].direction, Direction::Sell);
        assert_eq!(intents[0].offset, Offset::Open);
    }

    #[test]
    fn neutral_probability_never_enters() {
        let mut s = strategy_with(0.5);
        let minute = warm_up(&mut s, 3000.0);
        for m in 0..5 {
            assert!(feed_minute(&mut s, minute + m, 3000.0).is_empty());
        }
        assert_eq!(s.position_state(), PositionState::Flat);
    }

    #[test]
    fn probe_stop_loss_books_a_losing_trade() {
        let mut s = strategy_with(0.9);
        let minute = warm_up(&mut s, 3000.0);
        feed_minute(&mut s, minute, 3000.0);
        let entry = s.status()["position"]["entry_price"].as_f64().unwrap();

        let intents = s.on_tick(&tick(minute + 1, 1, entry * 0.996));
        assert_eq!(intents.len(), 1);
        assert_eq!(s.trades()[0].exit_reason, "probe_sl");
        assert!(s.daily_pnl() < 0.0);
        assert_eq!(s.position_state(), PositionState::Flat);
    }

    #[test]
    fn stopped_strategy_produces_nothing() {
        let mut s = strategy_with(0.9);
        s.run_flag().store(false, Ordering::SeqCst);
        for minute in 0..30 {
            assert!(feed_minute(&mut s, minute, 3000.0).is_empty());
        }
        assert_eq!(s.position_state(), PositionState::Flat);
    }

    #[test]
    fn heuristic_fallback_follows_rsi_extremes() {
        let s = StagedStrategy::new(StagedConfig::default(), None, audit());
        // predict() reads last_rsi; exercise the mapping directly.
        let mut s = s;
        s.last_rsi = 70.0;
        assert_eq!(s.predict(), 0.3);
        s.last_rsi = 30.0;
        assert_eq!(s.predict(), 0.7);
        s.last_rsi = 50.0;
        assert_eq!(s.predict(), 0.5);
    }
}
