// =============================================================================
// Strategy runtime — shared strategy-facing types
// =============================================================================
//
// Strategies are state machines fed from the tick stream. They never touch
// the session directly: each update returns `OrderIntent`s, and the engine
// routes every intent through the validator → order monitor → session path.
// Submission ordering per strategy is preserved because intents are executed
// on the tick-delivery task, in the order they were produced.
// =============================================================================

pub mod features;
pub mod ofi;
pub mod position;
pub mod staged;

use serde::Serialize;

use crate::types::{Direction, Offset};

/// A strategy's request to trade, pending validation.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub strategy_id: &'static str,
    pub instrument_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
    /// Why the strategy wants this order (entry signal or exit reason).
    pub reason: String,
}

/// Daily win/loss aggregate over a strategy's trade records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
}

impl DailyStats {
    pub fn from_net_pnls(net_pnls: &[f64]) -> Self {
        if net_pnls.is_empty() {
            return Self::default();
        }
        let winning = net_pnls.iter().filter(|p| **p > 0.0).count();
        let total: f64 = net_pnls.iter().sum();
        Self {
            total_trades: net_pnls.len(),
            winning_trades: winning,
            win_rate: winning as f64 / net_pnls.len() as f64,
            total_pnl_pct: total,
            avg_pnl_pct: total / net_pnls.len() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_stats_aggregate() {
        let stats = DailyStats::from_net_pnls(&[0.001, -0.002, 0.003]);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.total_pnl_pct - 0.002).abs() < 1e-12);
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = DailyStats::from_net_pnls(&[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
    }
}
