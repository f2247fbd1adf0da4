// =============================================================================
// Bar aggregation — tick stream to one-minute OHLC bars
// =============================================================================
//
// The aggregator keeps one in-progress bar per instance. A tick whose
// minute-floored timestamp differs from the current bar's minute finalises
// the bar and returns it to the caller; the tick then seeds (or extends)
// the next bar. Per-bar volume and turnover are deltas of the cumulative
// session counters, clamped at zero; the very first observed cumulative
// value is discarded so the opening bar does not absorb the whole session.
// =============================================================================

use std::collections::VecDeque;

use chrono::{NaiveDateTime, Timelike};

use crate::types::{Bar, Tick};

/// Default completed-bar retention.
pub const DEFAULT_BAR_CAPACITY: usize = 60;

fn floor_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

// ---------------------------------------------------------------------------
// BarAggregator
// ---------------------------------------------------------------------------

/// Incremental tick → minute-bar aggregator for a single instrument.
#[derive(Debug, Default)]
pub struct BarAggregator {
    current: Option<Bar>,
    current_minute: Option<NaiveDateTime>,
    last_volume: i64,
    last_turnover: f64,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick. Returns the finalised bar when a minute boundary was
    /// crossed, otherwise `None`.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let minute = floor_to_minute(tick.timestamp);

        let mut completed = None;
        if let Some(current_minute) = self.current_minute {
            if minute != current_minute {
                completed = self.current.take();
            }
        }

        let volume_delta = if self.last_volume > 0 {
            (tick.volume - self.last_volume).max(0)
        } else {
            0
        };
        let turnover_delta = if self.last_turnover > 0.0 {
            (tick.turnover - self.last_turnover).max(0.0)
        } else {
            0.0
        };

        let bar = self.current.get_or_insert_with(|| Bar {
            datetime: minute,
            open: tick.last_price,
            high: tick.last_price,
            low: tick.last_price,
            close: tick.last_price,
            volume: 0,
            turnover: 0.0,
            open_interest: tick.open_interest,
        });

        bar.high = bar.high.max(tick.last_price);
        bar.low = bar.low.min(tick.last_price);
        bar.close = tick.last_price;
        bar.volume += volume_delta;
        bar.turnover += turnover_delta;
        bar.open_interest = tick.open_interest;

        self.current_minute = Some(minute);
        self.last_volume = tick.volume;
        self.last_turnover = tick.turnover;

        completed
    }

    /// The in-progress bar, if any.
    pub fn current_bar(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// BarBuffer
// ---------------------------------------------------------------------------

/// Bounded history of completed bars for one instrument.
#[derive(Debug)]
pub struct BarBuffer {
    capacity: usize,
    buffer: VecDeque<Bar>,
}

impl BarBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, bar: Bar) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(bar);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_ready(&self, min_bars: usize) -> bool {
        self.buffer.len() >= min_bars
    }

    pub fn bars(&self) -> impl Iterator<Item = &Bar> {
        self.buffer.iter()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.buffer.back()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.buffer.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.buffer.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.buffer.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<i64> {
        self.buffer.iter().map(|b| b.volume).collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tick_at(min: u32, sec: u32, price: f64, cum_volume: i64) -> Tick {
        let ts = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, min, sec)
            .unwrap();
        Tick {
            instrument_id: "rb2505".into(),
            timestamp: ts,
            trading_day: "20250314".into(),
            action_day: "20250314".into(),
            last_price: price,
            bid_price: price - 1.0,
            bid_volume: 10,
            ask_price: price + 1.0,
            ask_volume: 10,
            volume: cum_volume,
            turnover: cum_volume as f64 * price,
            open_interest: 1000.0,
        }
    }

    #[test]
    fn completes_bar_on_minute_boundary() {
        let mut agg = BarAggregator::new();

        assert!(agg.on_tick(&tick_at(0, 1, 3000.0, 100)).is_none());
        assert!(agg.on_tick(&tick_at(0, 30, 3005.0, 110)).is_none());
        assert!(agg.on_tick(&tick_at(0, 59, 2995.0, 130)).is_none());

        let bar = agg.on_tick(&tick_at(1, 2, 3002.0, 150)).expect("completed");
        assert_eq!(bar.open, 3000.0);
        assert_eq!(bar.high, 3005.0);
        assert_eq!(bar.low, 2995.0);
        assert_eq!(bar.close, 2995.0);
        assert_eq!(bar.datetime.minute(), 0);
        assert_eq!(bar.datetime.second(), 0);
    }

    #[test]
    fn first_cumulative_volume_is_discarded() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick_at(0, 1, 3000.0, 100_000));
        agg.on_tick(&tick_at(0, 30, 3000.0, 100_020));
        let bar = agg.on_tick(&tick_at(1, 0, 3000.0, 100_050)).unwrap();
        // Only the in-minute delta, not the opening cumulative value.
        assert_eq!(bar.volume, 20);
    }

    #[test]
    fn boundary_tick_delta_lands_in_new_bar() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick_at(0, 1, 3000.0, 100));
        agg.on_tick(&tick_at(1, 0, 3001.0, 130));
        let second = agg.current_bar().unwrap();
        assert_eq!(second.volume, 30);
        assert_eq!(second.open, 3001.0);
    }

    #[test]
    fn negative_cumulative_steps_are_clamped() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick_at(0, 1, 3000.0, 100));
        agg.on_tick(&tick_at(0, 2, 3000.0, 90));
        assert_eq!(agg.current_bar().unwrap().volume, 0);
    }

    #[test]
    fn completed_volume_sums_match_cumulative_span() {
        // Property: sum of completed-bar volumes equals final cumulative
        // volume minus the first observed cumulative value (the first tick's
        // full cumulative count is discarded).
        let mut agg = BarAggregator::new();
        let mut completed: Vec<Bar> = Vec::new();

        let mut cum = 1_000i64;
        let first_cum = cum;
        for minute in 0..5u32 {
            for sec in [1u32, 20, 40] {
                cum += 7;
                if let Some(bar) = agg.on_tick(&tick_at(minute, sec, 3000.0, cum)) {
                    completed.push(bar);
                }
            }
        }
        // Flush the final minute.
        if let Some(bar) = agg.on_tick(&tick_at(6, 0, 3000.0, cum)) {
            completed.push(bar);
        }

        let total: i64 = completed.iter().map(|b| b.volume).sum();
        let in_progress = agg.current_bar().map(|b| b.volume).unwrap_or(0);
        assert_eq!(total + in_progress, cum - first_cum - 7);
        // The -7 is the first tick's delta, discarded with the opening
        // cumulative value.
    }

    #[test]
    fn buffer_trims_to_capacity_and_extracts_series() {
        let mut buf = BarBuffer::new(3);
        for i in 0..5 {
            buf.push(Bar {
                datetime: NaiveDate::from_ymd_opt(2025, 3, 14)
                    .unwrap()
                    .and_hms_opt(9, i, 0)
                    .unwrap(),
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                volume: 10 * i as i64,
                turnover: 0.0,
                open_interest: 0.0,
            });
        }
        assert_eq!(buf.len(), 3);
        assert!(buf.is_ready(3));
        assert!(!buf.is_ready(4));
        assert_eq!(buf.closes(), vec![102.5, 103.5, 104.5]);
        assert_eq!(buf.volumes(), vec![20, 30, 40]);
    }
}
