// =============================================================================
// TickCache — per-instrument rolling tick window + aggregate features
// =============================================================================
//
// Fixed-capacity window of the most recent ticks (default 120, ~60 s at two
// ticks per second). `extract_features` flattens the window into 65 named
// scalars: price shape, volume deltas, level-1 depth pressure, inferred
// order flow, and time-series diagnostics. Until the window is full the
// extractor returns the zero-filled map so downstream consumers never see a
// partial feature set.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use crate::market::stats;
use crate::types::Tick;

/// Default window capacity.
pub const DEFAULT_TICK_CAPACITY: usize = 120;

/// Frozen feature-name list; [`TickCache::extract_features`] always returns
/// exactly these keys.
pub const FEATURE_NAMES: [&str; 65] = [
    // price shape
    "price_open",
    "price_high",
    "price_low",
    "price_close",
    "price_mean",
    "price_std",
    "price_range",
    "price_range_pct",
    "return_total",
    "return_mean",
    "return_std",
    "return_skew",
    "return_kurt",
    // volume deltas
    "volume_sum",
    "volume_mean",
    "volume_std",
    "volume_max",
    "vwap",
    "vwap_distance",
    "volume_trend",
    "volume_acceleration",
    // level-1 depth
    "imb_mean",
    "imb_last",
    "imb_std",
    "imb_max",
    "imb_min",
    "imb_range",
    "depth_total",
    "depth_bid",
    "depth_ask",
    "depth_ratio",
    "bid_pressure",
    "ask_pressure",
    "pressure_ratio",
    "spread_mean",
    "spread_std",
    "spread_max",
    "spread_min",
    "mid_price",
    "mid_price_std",
    "price_vs_mid",
    "liquidity_bid",
    "liquidity_ask",
    "liquidity_total",
    // inferred order flow
    "tick_direction_ratio",
    "net_tick_direction",
    "buy_volume_est",
    "sell_volume_est",
    "net_volume",
    "order_flow_intensity",
    "order_flow_imbalance",
    "large_order_count",
    "large_order_volume",
    // time series
    "price_autocorr_1",
    "price_autocorr_5",
    "volume_autocorr_1",
    "price_trend",
    "volume_trend_slope",
    "momentum_5",
    "momentum_10",
    "momentum_20",
    "mean_reversion_signal",
    "tick_count",
    "zero_return_ratio",
    "positive_return_ratio",
];

/// Rolling window of recent ticks for one instrument.
pub struct TickCache {
    capacity: usize,
    buffer: VecDeque<Tick>,
}

impl TickCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a tick, evicting the oldest when full.
    pub fn push(&mut self, tick: Tick) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(tick);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Window is full and features are meaningful.
    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.buffer.back()
    }

    pub fn ticks(&self) -> impl Iterator<Item = &Tick> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Window order-flow imbalance over summed level-1 sizes; zero when both
    /// sides are empty.
    pub fn imbalance(&self) -> f64 {
        if self.buffer.len() < 2 {
            return 0.0;
        }
        let total_bid: f64 = self.buffer.iter().map(|t| t.bid_volume as f64).sum();
        let total_ask: f64 = self.buffer.iter().map(|t| t.ask_volume as f64).sum();
        if total_bid + total_ask == 0.0 {
            return 0.0;
        }
        (total_bid - total_ask) / (total_bid + total_ask)
    }

    /// Standard deviation of tick-to-tick returns.
    pub fn volatility(&self) -> f64 {
        if self.buffer.len() < 2 {
            return 0.0;
        }
        let prices: Vec<f64> = self.buffer.iter().map(|t| t.last_price).collect();
        stats::std_dev(&stats::returns(&prices))
    }

    /// The zero-filled feature map, used until the window is ready.
    pub fn empty_features() -> HashMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .map(|name| (name.to_string(), 0.0))
            .collect()
    }

    /// Flatten the window into the 65 aggregate features.
    pub fn extract_features(&self) -> HashMap<String, f64> {
        if !self.is_ready() {
            return Self::empty_features();
        }

        let prices: Vec<f64> = self.buffer.iter().map(|t| t.last_price).collect();
        let volumes: Vec<f64> = self.buffer.iter().map(|t| t.volume as f64).collect();
        let bid_vols: Vec<f64> = self.buffer.iter().map(|t| t.bid_volume as f64).collect();
        let ask_vols: Vec<f64> = self.buffer.iter().map(|t| t.ask_volume as f64).collect();
        let bid_prices: Vec<f64> = self.buffer.iter().map(|t| t.bid_price).collect();
        let ask_prices: Vec<f64> = self.buffer.iter().map(|t| t.ask_price).collect();

        let mut f = HashMap::with_capacity(FEATURE_NAMES.len());
        let mut set = |name: &str, value: f64| {
            f.insert(name.to_string(), if value.is_finite() { value } else { 0.0 });
        };

        // ── price shape ─────────────────────────────────────────────────
        let high = prices.iter().cloned().fold(f64::MIN, f64::max);
        let low = prices.iter().cloned().fold(f64::MAX, f64::min);
        let p_mean = stats::mean(&prices);
        let p_std = stats::std_dev(&prices);
        let range = high - low;

        set("price_open", prices[0]);
        set("price_high", high);
        set("price_low", low);
        set("price_close", *prices.last().unwrap());
        set("price_mean", p_mean);
        set("price_std", p_std);
        set("price_range", range);
        set(
            "price_range_pct",
            if p_mean > 0.0 { range / p_mean } else { 0.0 },
        );

        let rets = stats::returns(&prices);
        set(
            "return_total",
            if prices[0] > 0.0 {
                (prices[prices.len() - 1] - prices[0]) / prices[0]
            } else {
                0.0
            },
        );
        set("return_mean", stats::mean(&rets));
        set("return_std", stats::std_dev(&rets));
        set("return_skew", stats::skewness(&rets));
        set("return_kurt", stats::kurtosis(&rets));

        // ── volume deltas ───────────────────────────────────────────────
        let vol_diffs = stats::diffs(&volumes);
        let volume_sum: f64 = vol_diffs.iter().sum();
        let volume_mean = stats::mean(&vol_diffs);
        set("volume_sum", volume_sum);
        set("volume_mean", volume_mean);
        set("volume_std", stats::std_dev(&vol_diffs));
        set(
            "volume_max",
            vol_diffs.iter().cloned().fold(0.0f64, f64::max),
        );

        // Each delta belongs to the tick that produced it.
        let vwap = if volume_sum > 0.0 {
            prices[1..]
                .iter()
                .zip(vol_diffs.iter())
                .map(|(p, v)| p * v)
                .sum::<f64>()
                / volume_sum
        } else {
            prices[prices.len() - 1]
        };
        set("vwap", vwap);
        set(
            "vwap_distance",
            if vwap > 0.0 {
                (prices[prices.len() - 1] - vwap) / vwap
            } else {
                0.0
            },
        );
        set(
            "volume_trend",
            if vol_diffs.len() >= 20 {
                stats::mean(&vol_diffs[vol_diffs.len() - 10..]) - stats::mean(&vol_diffs[..10])
            } else {
                0.0
            },
        );
        set(
            "volume_acceleration",
            if vol_diffs.len() >= 11 {
                stats::mean(&stats::diffs(&vol_diffs[vol_diffs.len() - 10..]))
            } else {
                0.0
            },
        );

        // ── level-1 depth ───────────────────────────────────────────────
        let total_bid: f64 = bid_vols.iter().sum();
        let total_ask: f64 = ask_vols.iter().sum();
        set("imb_mean", (total_bid - total_ask) / (total_bid + total_ask + 1.0));
        let last_b = bid_vols[bid_vols.len() - 1];
        let last_a = ask_vols[ask_vols.len() - 1];
        set("imb_last", (last_b - last_a) / (last_b + last_a + 1.0));

        let imb_series: Vec<f64> = bid_vols
            .iter()
            .zip(ask_vols.iter())
            .map(|(b, a)| (b - a) / (b + a + 1.0))
            .collect();
        let imb_max = imb_series.iter().cloned().fold(f64::MIN, f64::max);
        let imb_min = imb_series.iter().cloned().fold(f64::MAX, f64::min);
        set("imb_std", stats::std_dev(&imb_series));
        set("imb_max", imb_max);
        set("imb_min", imb_min);
        set("imb_range", imb_max - imb_min);

        set("depth_total", total_bid + total_ask);
        set("depth_bid", total_bid);
        set("depth_ask", total_ask);
        set("depth_ratio", total_bid / (total_ask + 1.0));

        let bid_pressure = if bid_vols.len() >= 10 {
            stats::mean(&bid_vols[bid_vols.len() - 10..])
        } else {
            stats::mean(&bid_vols)
        };
        let ask_pressure = if ask_vols.len() >= 10 {
            stats::mean(&ask_vols[ask_vols.len() - 10..])
        } else {
            stats::mean(&ask_vols)
        };
        set("bid_pressure", bid_pressure);
        set("ask_pressure", ask_pressure);
        set("pressure_ratio", bid_pressure / (ask_pressure + 1.0));

        let spreads: Vec<f64> = ask_prices
            .iter()
            .zip(bid_prices.iter())
            .map(|(a, b)| a - b)
            .collect();
        set("spread_mean", stats::mean(&spreads));
        set("spread_std", stats::std_dev(&spreads));
        set("spread_max", spreads.iter().cloned().fold(f64::MIN, f64::max));
        set("spread_min", spreads.iter().cloned().fold(f64::MAX, f64::min));

        let mids: Vec<f64> = bid_prices
            .iter()
            .zip(ask_prices.iter())
            .map(|(b, a)| (b + a) / 2.0)
            .collect();
        let mid_last = mids[mids.len() - 1];
        set("mid_price", mid_last);
        set("mid_price_std", stats::std_dev(&mids));
        set(
            "price_vs_mid",
            if mid_last > 0.0 {
                (prices[prices.len() - 1] - mid_last) / mid_last
            } else {
                0.0
            },
        );

        let liq_bid = stats::mean(
            &bid_vols
                .iter()
                .zip(bid_prices.iter())
                .map(|(v, p)| v * p)
                .collect::<Vec<f64>>(),
        );
        let liq_ask = stats::mean(
            &ask_vols
                .iter()
                .zip(ask_prices.iter())
                .map(|(v, p)| v * p)
                .collect::<Vec<f64>>(),
        );
        set("liquidity_bid", liq_bid);
        set("liquidity_ask", liq_ask);
        set("liquidity_total", liq_bid + liq_ask);

        // ── inferred order flow ─────────────────────────────────────────
        let price_changes = stats::diffs(&prices);
        let up_ticks = price_changes.iter().filter(|c| **c > 0.0).count() as f64;
        let down_ticks = price_changes.iter().filter(|c| **c < 0.0).count() as f64;
        set("tick_direction_ratio", up_ticks / (down_ticks + 1.0));
        set("net_tick_direction", up_ticks - down_ticks);

        let buy_volume_est: f64 = vol_diffs
            .iter()
            .zip(price_changes.iter())
            .filter(|(_, c)| **c > 0.0)
            .map(|(v, _)| v)
            .sum();
        let sell_volume_est: f64 = vol_diffs
            .iter()
            .zip(price_changes.iter())
            .filter(|(_, c)| **c < 0.0)
            .map(|(v, _)| v)
            .sum();
        set("buy_volume_est", buy_volume_est);
        set("sell_volume_est", sell_volume_est);
        set("net_volume", buy_volume_est - sell_volume_est);
        set(
            "order_flow_intensity",
            volume_sum / (self.capacity as f64 + 1.0),
        );
        set(
            "order_flow_imbalance",
            (buy_volume_est - sell_volume_est) / (volume_sum + 1.0),
        );

        let large_threshold = if volume_mean > 0.0 {
            volume_mean * 3.0
        } else {
            100.0
        };
        let large: Vec<f64> = vol_diffs
            .iter()
            .cloned()
            .filter(|v| *v > large_threshold)
            .collect();
        set("large_order_count", large.len() as f64);
        set("large_order_volume", large.iter().sum());

        // ── time series ─────────────────────────────────────────────────
        set("price_autocorr_1", stats::autocorr(&prices, 1));
        set("price_autocorr_5", stats::autocorr(&prices, 5));
        set("volume_autocorr_1", stats::autocorr(&vol_diffs, 1));
        set("price_trend", stats::linear_slope(&prices));
        set("volume_trend_slope", stats::linear_slope(&vol_diffs));

        let momentum = |n: usize| {
            if prices.len() >= n {
                prices[prices.len() - 1] - prices[prices.len() - n]
            } else {
                0.0
            }
        };
        set("momentum_5", momentum(5));
        set("momentum_10", momentum(10));
        set("momentum_20", momentum(20));

        set(
            "mean_reversion_signal",
            (prices[prices.len() - 1] - p_mean) / (p_std + 0.0001),
        );
        set("tick_count", prices.len() as f64);
        if rets.is_empty() {
            set("zero_return_ratio", 0.0);
            set("positive_return_ratio", 0.0);
        } else {
            let n = rets.len() as f64;
            set(
                "zero_return_ratio",
                rets.iter().filter(|r| **r == 0.0).count() as f64 / n,
            );
            set(
                "positive_return_ratio",
                rets.iter().filter(|r| **r > 0.0).count() as f64 / n,
            );
        }

        f
    }
}

// =============================================================================
// Tests
// =============================================================================
