// =============================================================================
// Bar/L2 feature engine for the staged-position strategy
// =============================================================================
//
// Produces the per-bar feature frame consumed by the prediction model:
// base OHLCV + returns + RSI-14 + volume ratio, iceberg cues, large-order
// cues, and multi-window volatility. Short windows fill with zero or the
// neutral value (RSI 50, volume ratio 1), so the frame shape is constant
// from the first bar.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use crate::market::stats;
use crate::types::{Bar, Tick};

/// Bars required before features are considered meaningful.
const MIN_BARS: usize = 15;

const BAR_WINDOW: usize = 60;
const L2_WINDOW: usize = 100;

const ICEBERG_WINDOW: usize = 10;
const LARGE_ORDER_WINDOW: usize = 20;
const LARGE_ORDER_MULTIPLIER: f64 = 3.0;
const ICEBERG_DROP_RATIO: f64 = 0.5;
const ICEBERG_REBOUND_RATIO: f64 = 1.5;

/// Level-1 observation kept for the iceberg / large-order windows.
#[derive(Debug, Clone)]
struct QuoteObs {
    bid_volume: f64,
    ask_volume: f64,
    /// Cumulative session volume.
    volume: f64,
    last_price: f64,
}

pub struct FeatureEngine {
    use_iceberg: bool,
    use_large_order: bool,
    use_volatility: bool,
    bars: VecDeque<Bar>,
    closes: VecDeque<f64>,
    volumes: VecDeque<f64>,
    quotes: VecDeque<QuoteObs>,
}

impl FeatureEngine {
    pub fn new(use_iceberg: bool, use_large_order: bool, use_volatility: bool) -> Self {
        Self {
            use_iceberg,
            use_large_order,
            use_volatility,
            bars: VecDeque::with_capacity(BAR_WINDOW),
            closes: VecDeque::with_capacity(BAR_WINDOW),
            volumes: VecDeque::with_capacity(BAR_WINDOW),
            quotes: VecDeque::with_capacity(L2_WINDOW),
        }
    }

    /// Ordered feature names for the enabled groups; this is the frozen
    /// dimension order of the sequence cache.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<&str> = vec![
            "open",
            "high",
            "low",
            "close",
            "volume",
            "return_1",
            "return_5",
            "return_10",
            "rsi_14",
            "volume_ratio",
        ];
        if self.use_iceberg {
            names.extend([
                "bid_iceberg_count",
                "bid_iceberg_strength",
                "ask_iceberg_count",
                "ask_iceberg_strength",
                "iceberg_imbalance",
                "has_bid_iceberg",
                "has_ask_iceberg",
            ]);
        }
        if self.use_large_order {
            names.extend([
                "large_buy_count",
                "large_sell_count",
                "large_order_ratio",
                "large_order_imbalance",
            ]);
        }
        if self.use_volatility {
            names.extend([
                "volatility_5",
                "volatility_15",
                "volatility_30",
                "volatility_ratio",
                "price_range_5",
                "price_range_15",
                "return_abs",
            ]);
        }
        names.into_iter().map(String::from).collect()
    }

    pub fn add_bar(&mut self, bar: &Bar) {
        if self.bars.len() == BAR_WINDOW {
            self.bars.pop_front();
            self.closes.pop_front();
            self.volumes.pop_front();
        }
        self.bars.push_back(bar.clone());
        self.closes.push_back(bar.close);
        self.volumes.push_back(bar.volume as f64);
    }

    pub fn add_tick(&mut self, tick: &Tick) {
        if self.quotes.len() == L2_WINDOW {
            self.quotes.pop_front();
        }
        self.quotes.push_back(QuoteObs {
            bid_volume: tick.bid_volume as f64,
            ask_volume: tick.ask_volume as f64,
            volume: tick.volume as f64,
            last_price: tick.last_price,
        });
    }

    pub fn is_ready(&self) -> bool {
        self.bars.len() >= MIN_BARS
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
        self.closes.clear();
        self.volumes.clear();
        self.quotes.clear();
    }

    // -------------------------------------------------------------------------
    // Feature calculation
    // -------------------------------------------------------------------------

    pub fn calculate(&self) -> HashMap<String, f64> {
        let mut features = self.neutral_features();
        if !self.is_ready() {
            return features;
        }

        self.base_features(&mut features);
        if self.use_iceberg {
            self.iceberg_features(&mut features);
        }
        if self.use_large_order {
            self.large_order_features(&mut features);
        }
        if self.use_volatility {
            self.volatility_features(&mut features);
        }
        features
    }

    fn neutral_features(&self) -> HashMap<String, f64> {
        let mut features: HashMap<String, f64> = self
            .feature_names()
            .into_iter()
            .map(|name| (name, 0.0))
            .collect();
        features.insert("rsi_14".into(), 50.0);
        features.insert("volume_ratio".into(), 1.0);
        if self.use_volatility {
            features.insert("volatility_ratio".into(), 1.0);
        }
        features
    }

    fn base_features(&self, features: &mut HashMap<String, f64>) {
        let closes: Vec<f64> = self.closes.iter().copied().collect();
        let volumes: Vec<f64> = self.volumes.iter().copied().collect();
        let latest = self.bars.back().unwrap();

        features.insert("open".into(), latest.open);
        features.insert("high".into(), latest.high);
        features.insert("low".into(), latest.low);
        features.insert("close".into(), latest.close);
        features.insert("volume".into(), latest.volume as f64);

        let n = closes.len();
        let lag_return = |lag: usize| {
            if n > lag && closes[n - 1 - lag] > 0.0 {
                (closes[n - 1] - closes[n - 1 - lag]) / closes[n - 1 - lag]
            } else {
                0.0
            }
        };
        features.insert("return_1".into(), lag_return(1));
        features.insert("return_5".into(), lag_return(5));
        features.insert("return_10".into(), lag_return(10));

        features.insert("rsi_14".into(), rsi(&closes, 14));

        let volume_ratio = if volumes.len() >= 20 {
            let avg = stats::mean(&volumes[volumes.len() - 20..]);
            if avg > 0.0 {
                volumes[volumes.len() - 1] / avg
            } else {
                1.0
            }
        } else {
            1.0
        };
        features.insert("volume_ratio".into(), volume_ratio);
    }

    fn iceberg_features(&self, features: &mut HashMap<String, f64>) {
        if self.quotes.len() < ICEBERG_WINDOW {
            return;
        }
        let recent: Vec<&QuoteObs> = self
            .quotes
            .iter()
            .skip(self.quotes.len() - ICEBERG_WINDOW)
            .collect();
        let bid_vols: Vec<f64> = recent.iter().map(|q| q.bid_volume).collect();
        let ask_vols: Vec<f64> = recent.iter().map(|q| q.ask_volume).collect();

        let refills = |vols: &[f64]| {
            let mut count = 0.0;
            for i in 1..vols.len().saturating_sub(1) {
                if vols[i] < vols[i - 1] * ICEBERG_DROP_RATIO
                    && vols[i + 1] > vols[i] * ICEBERG_REBOUND_RATIO
                {
                    count += 1.0;
                }
            }
            count
        };
        let bid_drops = refills(&bid_vols);
        let ask_drops = refills(&ask_vols);

        let bid_strength = stats::std_dev(&bid_vols) / (stats::mean(&bid_vols) + 1.0);
        let ask_strength = stats::std_dev(&ask_vols) / (stats::mean(&ask_vols) + 1.0);

        features.insert("bid_iceberg_count".into(), bid_drops);
        features.insert("ask_iceberg_count".into(), ask_drops);
        features.insert("has_bid_iceberg".into(), (bid_drops > 0.0) as i32 as f64);
        features.insert("has_ask_iceberg".into(), (ask_drops > 0.0) as i32 as f64);
        features.insert("bid_iceberg_strength".into(), bid_strength);
        features.insert("ask_iceberg_strength".into(), ask_strength);
        features.insert("iceberg_imbalance".into(), bid_strength - ask_strength);
    }

    fn large_order_features(&self, features: &mut HashMap<String, f64>) {
        if self.quotes.len() < LARGE_ORDER_WINDOW {
            return;
        }
        let recent: Vec<&QuoteObs> = self
            .quotes
            .iter()
            .skip(self.quotes.len() - LARGE_ORDER_WINDOW)
            .collect();
        let volumes: Vec<f64> = recent.iter().map(|q| q.volume).collect();

        let avg = stats::mean(&volumes);
        let threshold = avg * LARGE_ORDER_MULTIPLIER;

        let mut large_buys = 0.0;
        let mut large_sells = 0.0;
        for i in 1..recent.len() {
            let delta = volumes[i] - volumes[i - 1];
            if delta > threshold {
                if recent[i].last_price - recent[i - 1].last_price > 0.0 {
                    large_buys += 1.0;
                } else {
                    large_sells += 1.0;
                }
            }
        }

        let total = large_buys + large_sells;
        features.insert("large_buy_count".into(), large_buys);
        features.insert("large_sell_count".into(), large_sells);
        features.insert("large_order_ratio".into(), total / recent.len() as f64);
        features.insert(
            "large_order_imbalance".into(),
            if total > 0.0 {
                (large_buys - large_sells) / total
            } else {
                0.0
            },
        );
    }

    fn volatility_features(&self, features: &mut HashMap<String, f64>) {
        let closes: Vec<f64> = self.closes.iter().copied().collect();
        let returns = stats::returns(&closes);

        let window_vol = |window: usize| {
            if returns.len() >= window {
                stats::std_dev(&returns[returns.len() - window..])
            } else {
                0.0
            }
        };
        let vol_5 = window_vol(5);
        let vol_15 = window_vol(15);
        let vol_30 = window_vol(30);

        features.insert("volatility_5".into(), vol_5);
        features.insert("volatility_15".into(), vol_15);
        features.insert("volatility_30".into(), vol_30);
        features.insert(
            "volatility_ratio".into(),
            if vol_15 > 0.0 { vol_5 / vol_15 } else { 1.0 },
        );

        let last_close = *closes.last().unwrap();
        let range_over = |window: usize| {
            if self.bars.len() >= window && last_close > 0.0 {
                let recent: Vec<&Bar> = self.bars.iter().skip(self.bars.len() - window).collect();
                let high = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                let low = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                (high - low) / last_close
            } else {
                0.0
            }
        };
        features.insert("price_range_5".into(), range_over(5));
        features.insert("price_range_15".into(), range_over(15));
        features.insert(
            "return_abs".into(),
            returns.last().map(|r| r.abs()).unwrap_or(0.0),
        );
    }
}

/// Wilder-style RSI over the last `period` closes; neutral 50 on short
/// input, 100 when there are no losses.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }
    let deltas = stats::diffs(closes);
    let recent = &deltas[deltas.len() - period..];
    let avg_gain = recent.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss = -recent.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(minute: u32, close: f64, volume: i64) -> Bar {
        Bar {
            datetime: NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(9, minute, 0)
                .unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
            turnover: close * volume as f64,
            open_interest: 1000.0,
        }
    }

    fn tick(seq: i64, last: f64, bid_vol: i64, ask_vol: i64, cum_volume: i64) -> Tick {
        Tick {
            instrument_id: "rb2505".into(),
            timestamp: NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap()
                + chrono::Duration::milliseconds(seq * 500),
            trading_day: "20250314".into(),
            action_day: "20250314".into(),
            last_price: last,
            bid_price: last - 1.0,
            bid_volume: bid_vol,
            ask_price: last + 1.0,
            ask_volume: ask_vol,
            volume: cum_volume,
            turnover: 0.0,
            open_interest: 0.0,
        }
    }

    #[test]
    fn feature_names_cover_all_enabled_groups() {
        let engine = FeatureEngine::new(true, true, true);
        let names = engine.feature_names();
        assert_eq!(names.len(), 28);
        assert!(names.contains(&"rsi_14".to_string()));
        assert!(names.contains(&"iceberg_imbalance".to_string()));
        assert!(names.contains(&"large_order_ratio".to_string()));
        assert!(names.contains(&"volatility_30".to_string()));

        let base_only = FeatureEngine::new(false, false, false);
        assert_eq!(base_only.feature_names().len(), 10);
    }

    #[test]
    fn neutral_frame_before_readiness() {
        let engine = FeatureEngine::new(true, true, true);
        let f = engine.calculate();
        assert_eq!(f["rsi_14"], 50.0);
        assert_eq!(f["volume_ratio"], 1.0);
        assert_eq!(f["volatility_ratio"], 1.0);
        assert_eq!(f["close"], 0.0);
        assert_eq!(f["return_5"], 0.0);
    }

    #[test]
    fn base_features_track_the_latest_bar() {
        let mut engine = FeatureEngine::new(false, false, false);
        for i in 0..20 {
            engine.add_bar(&bar(i, 100.0 + i as f64, 10 + i as i64));
        }
        assert!(engine.is_ready());

        let f = engine.calculate();
        assert_eq!(f["close"], 119.0);
        assert!((f["return_1"] - 1.0 / 118.0).abs() < 1e-12);
        assert!((f["return_5"] - 5.0 / 114.0).abs() < 1e-12);
        // Monotonic rally: no losses, RSI pegs at 100.
        assert_eq!(f["rsi_14"], 100.0);
        assert!(f["volume_ratio"] > 1.0);
    }

    #[test]
    fn rsi_neutral_and_bounded() {
        assert_eq!(rsi(&[1.0, 2.0], 14), 50.0);
        let mut closes: Vec<f64> = Vec::new();
        for i in 0..30 {
            closes.push(100.0 + if i % 2 == 0 { 1.0 } else { -0.5 });
        }
        let value = rsi(&closes, 14);
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn iceberg_cues_from_oscillating_quotes() {
        let mut engine = FeatureEngine::new(true, false, false);
        for i in 0..15 {
            engine.add_bar(&bar(i, 100.0, 10));
        }
        for (i, bid) in [400i64, 400, 40, 400, 400, 40, 400, 400, 40, 400]
            .iter()
            .enumerate()
        {
            engine.add_tick(&tick(i as i64, 100.0, *bid, 200, 1000 + i as i64));
        }

        let f = engine.calculate();
        assert!(f["bid_iceberg_count"] >= 2.0);
        assert_eq!(f["has_bid_iceberg"], 1.0);
        assert_eq!(f["has_ask_iceberg"], 0.0);
        assert!(f["iceberg_imbalance"] > 0.0);
    }

    #[test]
    fn volatility_windows_need_enough_bars() {
        let mut engine = FeatureEngine::new(false, false, true);
        for i in 0..16 {
            engine.add_bar(&bar(i, 100.0 + (i % 2) as f64, 10));
        }
        let f = engine.calculate();
        assert!(f["volatility_5"] > 0.0);
        assert!(f["volatility_15"] > 0.0);
        // Only 15 returns available: the 30-bar window stays unset.
        assert_eq!(f["volatility_30"], 0.0);
        assert!(f["price_range_5"] > 0.0);
        assert!(f["return_abs"] > 0.0);
    }
}
