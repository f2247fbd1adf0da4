// =============================================================================
// OrderMonitor — per-instrument and account-wide activity counters
// =============================================================================
//
// Open / close / cancel / trade counts per instrument plus account totals,
// all behind a single mutex so every listener observes a consistent counter
// snapshot. Each mutation first checks the trading-day boundary: a date
// change clears everything before the mutation is applied.
//
// Listeners are invoked synchronously while the lock is held (that is what
// makes the counter + threshold check atomic); they must not call back into
// the monitor. Panics inside a listener are absorbed at the dispatch point.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::audit::AuditLog;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What kind of activity a counter event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Open,
    Close,
    Cancel,
    Trade,
}

impl OrderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Cancel => "cancel",
            Self::Trade => "trade",
        }
    }
}

/// Per-instrument counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrumentCounters {
    pub open_count: u64,
    pub close_count: u64,
    pub cancel_count: u64,
    pub trade_count: u64,
    #[serde(skip)]
    pub last_order_at: Option<DateTime<Local>>,
}

/// Consistent view of the counters captured at one mutation.
#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub instrument_id: String,
    pub action: &'static str,
    /// The per-instrument count for the recorded action.
    pub instrument_count: u64,
    pub total_order_count: u64,
    pub total_cancel_count: u64,
    pub total_open_count: u64,
    pub total_close_count: u64,
    pub total_trade_count: u64,
    pub total_trade_volume: i64,
}

/// Full statistics clone for reports and manual sweeps.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub trading_date: NaiveDate,
    pub by_instrument: HashMap<String, InstrumentCounters>,
    pub total_order_count: u64,
    pub total_cancel_count: u64,
    pub total_open_count: u64,
    pub total_close_count: u64,
    pub total_trade_count: u64,
    pub total_trade_volume: i64,
}

#[derive(Debug)]
struct Stats {
    trading_date: NaiveDate,
    by_instrument: HashMap<String, InstrumentCounters>,
    total_order_count: u64,
    total_cancel_count: u64,
    total_open_count: u64,
    total_close_count: u64,
    total_trade_count: u64,
    total_trade_volume: i64,
}

impl Stats {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            trading_date: date,
            by_instrument: HashMap::new(),
            total_order_count: 0,
            total_cancel_count: 0,
            total_open_count: 0,
            total_close_count: 0,
            total_trade_count: 0,
            total_trade_volume: 0,
        }
    }
}

type Listener = Box<dyn Fn(OrderAction, &str, &CounterSnapshot) + Send + Sync>;

// ---------------------------------------------------------------------------
// OrderMonitor
// ---------------------------------------------------------------------------

pub struct OrderMonitor {
    stats: Mutex<Stats>,
    listeners: RwLock<Vec<Listener>>,
    audit: Arc<AuditLog>,
}

impl OrderMonitor {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            stats: Mutex::new(Stats::fresh(Local::now().date_naive())),
            listeners: RwLock::new(Vec::new()),
            audit,
        }
    }

    pub fn register_listener(
        &self,
        listener: impl Fn(OrderAction, &str, &CounterSnapshot) + Send + Sync + 'static,
    ) {
        self.listeners.write().push(Box::new(listener));
    }

    fn reset_if_new_day(&self, stats: &mut Stats) {
        let today = Local::now().date_naive();
        if stats.trading_date != today {
            self.audit.system(
                "trading day rolled, resetting order statistics",
                Some(json!({
                    "old_date": stats.trading_date.to_string(),
                    "new_date": today.to_string(),
                })),
            );
            *stats = Stats::fresh(today);
        }
    }

    fn notify(&self, action: OrderAction, instrument_id: &str, snapshot: &CounterSnapshot) {
        for listener in self.listeners.read().iter() {
            let result = catch_unwind(AssertUnwindSafe(|| {
                listener(action, instrument_id, snapshot)
            }));
            if result.is_err() {
                error!(
                    action = action.as_str(),
                    instrument_id, "order monitor listener panicked"
                );
                self.audit.error(
                    "order monitor listener panicked",
                    Some(json!({ "action": action.as_str(), "instrument_id": instrument_id })),
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Count an opening order for `instrument_id`.
    pub fn record_open(&self, instrument_id: &str) -> CounterSnapshot {
        let mut stats = self.stats.lock();
        self.reset_if_new_day(&mut stats);

        let inst = stats.by_instrument.entry(instrument_id.to_string()).or_default();
        inst.open_count += 1;
        inst.last_order_at = Some(Local::now());
        let instrument_count = inst.open_count;

        stats.total_order_count += 1;
        stats.total_open_count += 1;

        let snapshot = Self::snapshot_of(&stats, instrument_id, OrderAction::Open, instrument_count);
        self.audit.monitor(
            "open order counted",
            Some(serde_json::to_value(&snapshot).unwrap_or_default()),
        );
        self.notify(OrderAction::Open, instrument_id, &snapshot);
        snapshot
    }

    /// Count a closing order for `instrument_id`.
    pub fn record_close(&self, instrument_id: &str) -> CounterSnapshot {
        let mut stats = self.stats.lock();
        self.reset_if_new_day(&mut stats);

        let inst = stats.by_instrument.entry(instrument_id.to_string()).or_default();
        inst.close_count += 1;
        inst.last_order_at = Some(Local::now());
        let instrument_count = inst.close_count;

        stats.total_order_count += 1;
        stats.total_close_count += 1;

        let snapshot =
            Self::snapshot_of(&stats, instrument_id, OrderAction::Close, instrument_count);
        self.audit.monitor(
            "close order counted",
            Some(serde_json::to_value(&snapshot).unwrap_or_default()),
        );
        self.notify(OrderAction::Close, instrument_id, &snapshot);
        snapshot
    }

    /// Count a cancel for `instrument_id`.
    pub fn record_cancel(&self, instrument_id: &str) -> CounterSnapshot {
        let mut stats = self.stats.lock();
        self.reset_if_new_day(&mut stats);

        let inst = stats.by_instrument.entry(instrument_id.to_string()).or_default();
        inst.cancel_count += 1;
        inst.last_order_at = Some(Local::now());
        let instrument_count = inst.cancel_count;

        stats.total_cancel_count += 1;

        let snapshot =
            Self::snapshot_of(&stats, instrument_id, OrderAction::Cancel, instrument_count);
        self.audit.monitor(
            "cancel counted",
            Some(serde_json::to_value(&snapshot).unwrap_or_default()),
        );
        self.notify(OrderAction::Cancel, instrument_id, &snapshot);
        snapshot
    }

    /// Count an executed fill.
    pub fn record_trade(&self, instrument_id: &str, volume: i64) -> CounterSnapshot {
        let mut stats = self.stats.lock();
        self.reset_if_new_day(&mut stats);

        let inst = stats.by_instrument.entry(instrument_id.to_string()).or_default();
        inst.trade_count += 1;
        let instrument_count = inst.trade_count;

        stats.total_trade_count += 1;
        stats.total_trade_volume += volume;

        let snapshot =
            Self::snapshot_of(&stats, instrument_id, OrderAction::Trade, instrument_count);
        self.notify(OrderAction::Trade, instrument_id, &snapshot);
        snapshot
    }

    fn snapshot_of(
        stats: &Stats,
        instrument_id: &str,
        action: OrderAction,
        instrument_count: u64,
    ) -> CounterSnapshot {
        CounterSnapshot {
            instrument_id: instrument_id.to_string(),
            action: action.as_str(),
            instrument_count,
            total_order_count: stats.total_order_count,
            total_cancel_count: stats.total_cancel_count,
            total_open_count: stats.total_open_count,
            total_close_count: stats.total_close_count,
            total_trade_count: stats.total_trade_count,
            total_trade_volume: stats.total_trade_volume,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn statistics(&self) -> Statistics {
        let mut stats = self.stats.lock();
        self.reset_if_new_day(&mut stats);
        Statistics {
            trading_date: stats.trading_date,
            by_instrument: stats.by_instrument.clone(),
            total_order_count: stats.total_order_count,
            total_cancel_count: stats.total_cancel_count,
            total_open_count: stats.total_open_count,
            total_close_count: stats.total_close_count,
            total_trade_count: stats.total_trade_count,
            total_trade_volume: stats.total_trade_volume,
        }
    }

    pub fn total_order_count(&self) -> u64 {
        self.stats.lock().total_order_count
    }

    pub fn total_cancel_count(&self) -> u64 {
        self.stats.lock().total_cancel_count
    }

    pub fn instrument_open_count(&self, instrument_id: &str) -> u64 {
        self.stats
            .lock()
            .by_instrument
            .get(instrument_id)
            .map(|c| c.open_count)
            .unwrap_or(0)
    }

    pub fn instrument_close_count(&self, instrument_id: &str) -> u64 {
        self.stats
            .lock()
            .by_instrument
            .get(instrument_id)
            .map(|c| c.close_count)
            .unwrap_or(0)
    }

    pub fn instrument_cancel_count(&self, instrument_id: &str) -> u64 {
        self.stats
            .lock()
            .by_instrument
            .get(instrument_id)
            .map(|c| c.cancel_count)
            .unwrap_or(0)
    }

    /// The `n` most active instruments by combined order/cancel count.
    pub fn top_instruments(&self, n: usize) -> Vec<(String, InstrumentCounters)> {
        let stats = self.stats.lock();
        let mut entries: Vec<(String, InstrumentCounters)> = stats
            .by_instrument
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by_key(|(_, c)| {
            std::cmp::Reverse(c.open_count + c.close_count + c.cancel_count)
        });
        entries.truncate(n);
        entries
    }

    /// Summary for the status surface.
    pub fn summary_report(&self) -> serde_json::Value {
        let stats = self.statistics();
        json!({
            "trading_date": stats.trading_date.to_string(),
            "total_order_count": stats.total_order_count,
            "total_cancel_count": stats.total_cancel_count,
            "total_open_count": stats.total_open_count,
            "total_close_count": stats.total_close_count,
            "total_trade_count": stats.total_trade_count,
            "total_trade_volume": stats.total_trade_volume,
            "instruments_count": stats.by_instrument.len(),
        })
    }

    /// Clear all counters (admin surface; the daily boundary does this
    /// automatically).
    pub fn reset(&self) {
        let mut stats = self.stats.lock();
        *stats = Stats::fresh(Local::now().date_naive());
        self.audit.system("order statistics reset", None);
    }

    #[cfg(test)]
    pub(crate) fn force_trading_date(&self, date: NaiveDate) {
        self.stats.lock().trading_date = date;
    }
}

impl std::fmt::Debug for OrderMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats.lock();
        f.debug_struct("OrderMonitor")
            .field("trading_date", &stats.trading_date)
            .field("total_order_count", &stats.total_order_count)
            .field("total_cancel_count", &stats.total_cancel_count)
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

    fn monitor() -> OrderMonitor {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "meridian-monitor-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        OrderMonitor::new(Arc::new(AuditLog::new(dir, 7).unwrap()))
    }

    #[test]
    fn open_and_close_feed_total_order_count() {
        let m = monitor();
        m.record_open("rb2505");
        m.record_open("rb2505");
        m.record_close("rb2505");
        m.record_open("ag2506");

        assert_eq!(m.instrument_open_count("rb2505"), 2);
        assert_eq!(m.instrument_close_count("rb2505"), 1);
        assert_eq!(m.instrument_open_count("ag2506"), 1);
        assert_eq!(m.total_order_count(), 4);
        assert_eq!(m.total_cancel_count(), 0);
    }

    #[test]
    fn cancels_count_separately() {
        let m = monitor();
        m.record_open("rb2505");
        m.record_cancel("rb2505");
        m.record_cancel("rb2505");

        assert_eq!(m.total_order_count(), 1);
        assert_eq!(m.total_cancel_count(), 2);
        assert_eq!(m.instrument_cancel_count("rb2505"), 2);
    }

    #[test]
    fn trades_accumulate_volume() {
        let m = monitor();
        m.record_trade("rb2505", 3);
        let snap = m.record_trade("rb2505", 2);
        assert_eq!(snap.total_trade_count, 2);
        assert_eq!(snap.total_trade_volume, 5);
    }

    #[test]
    fn day_roll_resets_before_the_mutation_applies() {
        let m = monitor();
        m.record_open("rb2505");
        m.record_cancel("rb2505");
        m.record_close("ag2506");

        // Pretend all of that happened yesterday.
        m.force_trading_date(Local::now().date_naive() - chrono::Duration::days(1));

        let snap = m.record_open("rb2505");

        // Exactly one for the freshly-recorded event, zero elsewhere.
        assert_eq!(snap.instrument_count, 1);
        assert_eq!(snap.total_order_count, 1);
        assert_eq!(snap.total_open_count, 1);
        assert_eq!(snap.total_close_count, 0);
        assert_eq!(snap.total_cancel_count, 0);
        assert_eq!(m.instrument_close_count("ag2506"), 0);
    }

    #[test]
    fn listeners_see_consistent_snapshots() {
        let m = monitor();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        m.register_listener(move |action, instrument, snap| {
            seen2.lock().push((action, instrument.to_string(), snap.total_order_count));
        });

        m.record_open("rb2505");
        m.record_close("rb2505");

        let events = seen.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (OrderAction::Open, "rb2505".to_string(), 1));
        assert_eq!(events[1], (OrderAction::Close, "rb2505".to_string(), 2));
    }

    #[test]
    fn panicking_listener_does_not_poison_the_monitor() {
        let m = monitor();
        m.register_listener(|_, _, _| panic!("boom"));
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        m.register_listener(move |_, _, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        m.record_open("rb2505");
        m.record_open("rb2505");

        // Later listeners still ran, counters still advanced.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(m.instrument_open_count("rb2505"), 2);
    }

    #[test]
    fn top_instruments_ranks_by_activity() {
        let m = monitor();
        for _ in 0..5 {
            m.record_open("rb2505");
        }
        m.record_open("ag2506");

        let top = m.top_instruments(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "rb2505");
        assert_eq!(top[0].1.open_count, 5);
    }
}
