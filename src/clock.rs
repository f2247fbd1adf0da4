// =============================================================================
// Session clock — monotonic uptime + trading-day boundary detection
// =============================================================================

use std::time::Instant;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

/// Process clock shared by components that need wall time and uptime.
///
/// Daily counters (order monitor, strategy day stats) store the date they
/// were last reset and compare it against [`TradingClock::today`] on every
/// mutation; [`is_new_trading_day`] is the single definition of that check.
#[derive(Debug, Clone)]
pub struct TradingClock {
    started: Instant,
}

impl TradingClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    pub fn now_naive(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

impl Default for TradingClock {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `today` has moved past the stored reset date.
pub fn is_new_trading_day(stored: Option<NaiveDate>, today: NaiveDate) -> bool {
    match stored {
        Some(date) => date != today,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_fires_on_date_change_only() {
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();

        assert!(is_new_trading_day(None, d1));
        assert!(!is_new_trading_day(Some(d1), d1));
        assert!(is_new_trading_day(Some(d1), d2));
    }

    #[test]
    fn uptime_is_monotonic() {
        let clock = TradingClock::new();
        let a = clock.uptime_secs();
        let b = clock.uptime_secs();
        assert!(b >= a);
    }
}
