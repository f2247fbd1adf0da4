// =============================================================================
// TradeContext — full-chain capture of a trading decision
// =============================================================================
//
// Every entry and exit records what the strategy saw (quote snapshot, signal
// inputs) and what the execution path did (order reference, prices), so a
// trade can be replayed after the fact. Contexts serialise losslessly to
// JSON and back; the in-memory store is bounded.
// =============================================================================

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Tick;

/// Default in-memory context retention.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 500;

// ---------------------------------------------------------------------------
// Snapshot pieces
// ---------------------------------------------------------------------------

/// Best-quote snapshot at decision time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub bid_price: f64,
    #[serde(default)]
    pub bid_volume: i64,
    #[serde(default)]
    pub ask_price: f64,
    #[serde(default)]
    pub ask_volume: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub turnover: f64,
    #[serde(default)]
    pub open_interest: f64,
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl QuoteSnapshot {
    pub fn from_tick(tick: &Tick) -> Self {
        Self {
            last_price: tick.last_price,
            bid_price: tick.bid_price,
            bid_volume: tick.bid_volume,
            ask_price: tick.ask_price,
            ask_volume: tick.ask_volume,
            volume: tick.volume,
            turnover: tick.turnover,
            open_interest: tick.open_interest,
            timestamp_ms: tick.timestamp.and_utc().timestamp_millis(),
        }
    }
}

/// What the signal logic saw when it fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalContext {
    #[serde(default)]
    pub imb_value: f64,
    #[serde(default)]
    pub depth_value: i64,
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub prediction_prob: f64,
    #[serde(default)]
    pub rsi_value: f64,
    /// 1 = long, -1 = short, 0 = none.
    #[serde(default)]
    pub signal_direction: i32,
    #[serde(default)]
    pub signal_reason: String,
}

/// What the execution path did with the signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub order_ref: String,
    #[serde(default)]
    pub order_sys_id: String,
    #[serde(default)]
    pub order_price: f64,
    #[serde(default)]
    pub order_volume: i64,
    #[serde(default)]
    pub fill_price: f64,
    #[serde(default)]
    pub fill_volume: i64,
    #[serde(default)]
    pub slippage_ticks: f64,
    #[serde(default)]
    pub status: String,
}

// ---------------------------------------------------------------------------
// TradeContext
// ---------------------------------------------------------------------------

/// A complete decision record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeContext {
    pub symbol: String,
    pub strategy_name: String,
    /// "entry" or "exit".
    pub trade_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub strategy_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<QuoteSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_matrix: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_snapshot: Option<Value>,
}

impl TradeContext {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

/// Bounded in-memory retention of recent decision records.
pub struct ContextStore {
    capacity: usize,
    contexts: Mutex<Vec<TradeContext>>,
}

impl ContextStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn save(&self, ctx: TradeContext) {
        let mut contexts = self.contexts.lock();
        contexts.push(ctx);
        let len = contexts.len();
        if len > self.capacity {
            contexts.drain(..len - self.capacity);
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Most recent `limit` contexts, newest last.
    pub fn recent(&self, limit: usize) -> Vec<TradeContext> {
        let contexts = self.contexts.lock();
        let start = contexts.len().saturating_sub(limit);
        contexts[start..].to_vec()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
