// =============================================================================
// DepthBuffer — order-book snapshots, imbalance, iceberg & large-order cues
// =============================================================================
//
// The buffer holds the latest snapshot plus a bounded history. The level
// count is fixed at construction: a transport that only carries level-1
// quotes builds the buffer with `levels = 1` rather than pretending to have
// five levels of book.
//
// Detection heuristics (constants as calibrated):
//   - iceberg: over the last 10 snapshots a side whose volume std exceeds
//     half its mean is flagged; refill events count a drop below half the
//     prior snapshot followed by a rebound past 1.5x the trough.
//   - large order: the latest side total exceeding 3x the mean of the prior
//     19 snapshots flags that side.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::market::stats;
use crate::types::Tick;

/// Default snapshot history.
pub const DEFAULT_DEPTH_HISTORY: usize = 100;

const ICEBERG_VOLATILITY_RATIO: f64 = 0.5;
const ICEBERG_DROP_RATIO: f64 = 0.5;
const ICEBERG_REBOUND_RATIO: f64 = 1.5;
const LARGE_ORDER_MULTIPLIER: f64 = 3.0;

const ICEBERG_WINDOW: usize = 10;
const LARGE_ORDER_WINDOW: usize = 20;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A point-in-time view of the visible book, up to the configured number of
/// levels per side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub bid_prices: Vec<f64>,
    pub bid_volumes: Vec<i64>,
    pub ask_prices: Vec<f64>,
    pub ask_volumes: Vec<i64>,
    pub timestamp_ms: i64,
}

impl DepthSnapshot {
    /// Build from a tick. The feed carries one visible level; deeper levels
    /// stay empty and the buffer's configured level count documents that.
    pub fn from_tick(tick: &Tick) -> Self {
        let mut snap = Self {
            timestamp_ms: tick.timestamp.and_utc().timestamp_millis(),
            ..Self::default()
        };
        if tick.bid_price > 0.0 {
            snap.bid_prices.push(tick.bid_price);
            snap.bid_volumes.push(tick.bid_volume);
        }
        if tick.ask_price > 0.0 {
            snap.ask_prices.push(tick.ask_price);
            snap.ask_volumes.push(tick.ask_volume);
        }
        snap
    }

    pub fn bid_total(&self) -> i64 {
        self.bid_volumes.iter().sum()
    }

    pub fn ask_total(&self) -> i64 {
        self.ask_volumes.iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Detection reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct IcebergReport {
    pub has_bid_iceberg: bool,
    pub has_ask_iceberg: bool,
    pub bid_strength: f64,
    pub ask_strength: f64,
    pub bid_refill_count: u32,
    pub ask_refill_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LargeOrderReport {
    pub has_large_bid: bool,
    pub has_large_ask: bool,
    pub large_bid_volume: i64,
    pub large_ask_volume: i64,
    pub imbalance: f64,
}

// ---------------------------------------------------------------------------
// DepthBuffer
// ---------------------------------------------------------------------------

/// Rolling book-snapshot store for one instrument.
pub struct DepthBuffer {
    levels: usize,
    max_history: usize,
    current: Option<DepthSnapshot>,
    history: VecDeque<DepthSnapshot>,
}

impl DepthBuffer {
    pub fn new(levels: usize, max_history: usize) -> Self {
        Self {
            levels,
            max_history,
            current: None,
            history: VecDeque::with_capacity(max_history),
        }
    }

    /// Number of book levels this buffer was built for.
    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn update(&mut self, mut snapshot: DepthSnapshot) {
        snapshot.bid_prices.truncate(self.levels);
        snapshot.bid_volumes.truncate(self.levels);
        snapshot.ask_prices.truncate(self.levels);
        snapshot.ask_volumes.truncate(self.levels);

        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.clone());
        self.current = Some(snapshot);
    }

    pub fn update_from_tick(&mut self, tick: &Tick) {
        self.update(DepthSnapshot::from_tick(tick));
    }

    pub fn snapshot(&self) -> Option<&DepthSnapshot> {
        self.current.as_ref()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.history.clear();
    }

    /// Order-book imbalance over summed visible sizes; zero when both sides
    /// are empty.
    pub fn imbalance(&self) -> f64 {
        let Some(current) = &self.current else {
            return 0.0;
        };
        let bid = current.bid_total() as f64;
        let ask = current.ask_total() as f64;
        if bid + ask == 0.0 {
            return 0.0;
        }
        (bid - ask) / (bid + ask)
    }

    pub fn spread(&self) -> f64 {
        match &self.current {
            Some(c) if !c.bid_prices.is_empty() && !c.ask_prices.is_empty() => {
                c.ask_prices[0] - c.bid_prices[0]
            }
            _ => 0.0,
        }
    }

    pub fn mid_price(&self) -> f64 {
        match &self.current {
            Some(c) if !c.bid_prices.is_empty() && !c.ask_prices.is_empty() => {
                (c.ask_prices[0] + c.bid_prices[0]) / 2.0
            }
            _ => 0.0,
        }
    }

    // -------------------------------------------------------------------------
    // Iceberg heuristic
    // -------------------------------------------------------------------------

    pub fn detect_iceberg(&self) -> IcebergReport {
        if self.history.len() < ICEBERG_WINDOW {
            return IcebergReport::default();
        }

        let recent: Vec<&DepthSnapshot> = self
            .history
            .iter()
            .skip(self.history.len() - ICEBERG_WINDOW)
            .collect();
        let bid_vols: Vec<f64> = recent.iter().map(|d| d.bid_total() as f64).collect();
        let ask_vols: Vec<f64> = recent.iter().map(|d| d.ask_total() as f64).collect();

        let bid_mean = stats::mean(&bid_vols);
        let ask_mean = stats::mean(&ask_vols);
        let bid_std = stats::std_dev(&bid_vols);
        let ask_std = stats::std_dev(&ask_vols);

        let refills = |vols: &[f64]| {
            let mut count = 0u32;
            for i in 1..vols.len().saturating_sub(1) {
                if vols[i] < vols[i - 1] * ICEBERG_DROP_RATIO
                    && vols[i + 1] > vols[i] * ICEBERG_REBOUND_RATIO
                {
                    count += 1;
                }
            }
            count
        };

        IcebergReport {
            has_bid_iceberg: bid_mean > 0.0 && bid_std > bid_mean * ICEBERG_VOLATILITY_RATIO,
            has_ask_iceberg: ask_mean > 0.0 && ask_std > ask_mean * ICEBERG_VOLATILITY_RATIO,
            bid_strength: if bid_mean > 0.0 {
                bid_std / (bid_mean + 1.0)
            } else {
                0.0
            },
            ask_strength: if ask_mean > 0.0 {
                ask_std / (ask_mean + 1.0)
            } else {
                0.0
            },
            bid_refill_count: refills(&bid_vols),
            ask_refill_count: refills(&ask_vols),
        }
    }

    // -------------------------------------------------------------------------
    // Large-order heuristic
    // -------------------------------------------------------------------------

    pub fn detect_large_order(&self) -> LargeOrderReport {
        if self.history.len() < LARGE_ORDER_WINDOW {
            return LargeOrderReport::default();
        }

        let recent: Vec<&DepthSnapshot> = self
            .history
            .iter()
            .skip(self.history.len() - LARGE_ORDER_WINDOW)
            .collect();
        // Prior snapshots only; the latest is the candidate.
        let bid_hist: Vec<f64> = recent[..recent.len() - 1]
            .iter()
            .map(|d| d.bid_total() as f64)
            .collect();
        let ask_hist: Vec<f64> = recent[..recent.len() - 1]
            .iter()
            .map(|d| d.ask_total() as f64)
            .collect();

        let bid_mean = stats::mean(&bid_hist);
        let ask_mean = stats::mean(&ask_hist);

        let current_bid = self.current.as_ref().map(|c| c.bid_total()).unwrap_or(0);
        let current_ask = self.current.as_ref().map(|c| c.ask_total()).unwrap_or(0);

        let has_large_bid =
            bid_mean > 0.0 && current_bid as f64 > bid_mean * LARGE_ORDER_MULTIPLIER;
        let has_large_ask =
            ask_mean > 0.0 && current_ask as f64 > ask_mean * LARGE_ORDER_MULTIPLIER;

        let total = (current_bid + current_ask) as f64;
        LargeOrderReport {
            has_large_bid,
            has_large_ask,
            large_bid_volume: if has_large_bid { current_bid } else { 0 },
            large_ask_volume: if has_large_ask { current_ask } else { 0 },
            imbalance: if total > 0.0 {
                (current_bid - current_ask) as f64 / total
            } else {
                0.0
            },
        }
    }

    /// Flattened depth features for the feature cache.
    pub fn features(&self) -> std::collections::HashMap<String, f64> {
        let mut f = std::collections::HashMap::new();

        f.insert("obi".to_string(), self.imbalance());
        f.insert("spread".to_string(), self.spread());
        f.insert("mid_price".to_string(), self.mid_price());

        let iceberg = self.detect_iceberg();
        f.insert(
            "has_bid_iceberg".to_string(),
            iceberg.has_bid_iceberg as i32 as f64,
        );
        f.insert(
            "has_ask_iceberg".to_string(),
            iceberg.has_ask_iceberg as i32 as f64,
        );
        f.insert("bid_iceberg_strength".to_string(), iceberg.bid_strength);
        f.insert("ask_iceberg_strength".to_string(), iceberg.ask_strength);
        f.insert(
            "iceberg_imbalance".to_string(),
            iceberg.bid_strength - iceberg.ask_strength,
        );

        let large = self.detect_large_order();
        f.insert(
            "has_large_bid".to_string(),
            large.has_large_bid as i32 as f64,
        );
        f.insert(
            "has_large_ask".to_string(),
            large.has_large_ask as i32 as f64,
        );
        f.insert("large_order_imbalance".to_string(), large.imbalance);

        let (bid_total, ask_total) = match &self.current {
            Some(c) => (c.bid_total() as f64, c.ask_total() as f64),
            None => (0.0, 0.0),
        };
        f.insert("bid_depth_total".to_string(), bid_total);
        f.insert("ask_depth_total".to_string(), ask_total);
        f.insert("depth_ratio".to_string(), bid_total / (ask_total + 1.0));

        f
    }
}

impl std::fmt::Debug for DepthBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthBuffer")
            .field("levels", &self.levels)
            .field("history", &self.history.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(bid: i64, ask: i64) -> DepthSnapshot {
        DepthSnapshot {
            bid_prices: vec![3000.0],
            bid_volumes: vec![bid],
            ask_prices: vec![3001.0],
            ask_volumes: vec![ask],
            timestamp_ms: 0,
        }
    }

    #[test]
    fn obi_stays_in_unit_range_and_zero_when_empty() {
        let mut buf = DepthBuffer::new(1, 10);
        assert_eq!(buf.imbalance(), 0.0);

        buf.update(snap(100, 0));
        assert_eq!(buf.imbalance(), 1.0);

        buf.update(snap(0, 100));
        assert_eq!(buf.imbalance(), -1.0);

        buf.update(snap(0, 0));
        assert_eq!(buf.imbalance(), 0.0);

        buf.update(snap(300, 100));
        let obi = buf.imbalance();
        assert!((-1.0..=1.0).contains(&obi));
        assert!((obi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn spread_and_mid_from_best_levels() {
        let mut buf = DepthBuffer::new(1, 10);
        buf.update(snap(10, 10));
        assert_eq!(buf.spread(), 1.0);
        assert_eq!(buf.mid_price(), 3000.5);
    }

    #[test]
    fn history_is_bounded() {
        let mut buf = DepthBuffer::new(1, 5);
        for i in 0..8 {
            buf.update(snap(i, i));
        }
        assert_eq!(buf.history_len(), 5);
    }

    #[test]
    fn snapshots_are_truncated_to_level_count() {
        let mut buf = DepthBuffer::new(1, 10);
        buf.update(DepthSnapshot {
            bid_prices: vec![3000.0, 2999.0, 2998.0],
            bid_volumes: vec![10, 20, 30],
            ask_prices: vec![3001.0, 3002.0],
            ask_volumes: vec![5, 15],
            timestamp_ms: 0,
        });
        let s = buf.snapshot().unwrap();
        assert_eq!(s.bid_volumes, vec![10]);
        assert_eq!(s.ask_volumes, vec![5]);
    }

    #[test]
    fn iceberg_needs_full_window() {
        let mut buf = DepthBuffer::new(1, 100);
        for _ in 0..9 {
            buf.update(snap(100, 100));
        }
        let report = buf.detect_iceberg();
        assert!(!report.has_bid_iceberg);
        assert_eq!(report.bid_refill_count, 0);
    }

    #[test]
    fn iceberg_flags_volatile_side_and_counts_refills() {
        let mut buf = DepthBuffer::new(1, 100);
        // Bid side oscillates hard (drop below half, rebound past 1.5x the
        // trough); ask side stays flat.
        for bid in [400, 400, 40, 400, 400, 40, 400, 400, 40, 400] {
            buf.update(snap(bid, 200));
        }
        let report = buf.detect_iceberg();
        assert!(report.has_bid_iceberg);
        assert!(!report.has_ask_iceberg);
        assert!(report.bid_refill_count >= 2);
        assert_eq!(report.ask_refill_count, 0);
        assert!(report.bid_strength > report.ask_strength);
    }

    #[test]
    fn large_order_flags_triple_of_recent_mean() {
        let mut buf = DepthBuffer::new(1, 100);
        for _ in 0..19 {
            buf.update(snap(100, 100));
        }
        buf.update(snap(500, 100));

        let report = buf.detect_large_order();
        assert!(report.has_large_bid);
        assert!(!report.has_large_ask);
        assert_eq!(report.large_bid_volume, 500);
        assert_eq!(report.large_ask_volume, 0);
        assert!(report.imbalance > 0.0);
    }

    #[test]
    fn features_cover_depth_keys() {
        let mut buf = DepthBuffer::new(1, 100);
        buf.update(snap(100, 50));
        let f = buf.features();
        for key in [
            "obi",
            "spread",
            "mid_price",
            "bid_depth_total",
            "ask_depth_total",
            "depth_ratio",
            "has_bid_iceberg",
            "large_order_imbalance",
        ] {
            assert!(f.contains_key(key), "missing {key}");
        }
        assert_eq!(f["bid_depth_total"], 100.0);
        assert_eq!(f["depth_ratio"], 100.0 / 51.0);
    }
}
