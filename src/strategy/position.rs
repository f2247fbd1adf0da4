// =============================================================================
// Staged position ladder — flat → probe → full → trail
// =============================================================================
//
// Positions open at a reduced probe size, scale to full size once the trade
// confirms, then trail a drawdown stop from peak profit. Thresholds derive
// from the base stop-loss:
//
//   probe:  upgrade at +sl, stop at -sl
//   full:   trail at +(sl + 0.002), stop at -(sl + 0.001)
//   trail:  take profit at +tp, or give back `trail_dd` of peak profit
//
// A reverse signal exits from any non-flat state. Every exit reduces the
// position to zero and returns the machine to flat; no state is revisited
// without crossing flat.
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Ladder thresholds. `sl` and `tp` are fractions of entry price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    pub sl: f64,
    pub tp: f64,
    pub rsi_upper: f64,
    pub rsi_lower: f64,
    pub threshold: f64,
    pub probe_size: f64,
    pub full_size: f64,
    pub trail_dd: f64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            sl: 0.004,
            tp: 0.012,
            rsi_upper: 55.0,
            rsi_lower: 45.0,
            threshold: 0.5,
            probe_size: 0.3,
            full_size: 1.0,
            trail_dd: 0.30,
        }
    }
}

impl LadderConfig {
    pub fn probe_sl(&self) -> f64 {
        self.sl
    }

    pub fn probe_to_full(&self) -> f64 {
        self.sl
    }

    pub fn full_sl(&self) -> f64 {
        self.sl + 0.001
    }

    pub fn full_to_trail(&self) -> f64 {
        self.sl + 0.002
    }

    pub fn trail_tp(&self) -> f64 {
        self.tp
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionState {
    Flat,
    Probe,
    Full,
    Trail,
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Flat => "flat",
            Self::Probe => "probe",
            Self::Full => "full",
            Self::Trail => "trail",
        };
        write!(f, "{s}")
    }
}

/// The live position while non-flat.
#[derive(Debug, Clone, Serialize)]
pub struct StagedPosition {
    /// 1 = long, -1 = short.
    pub direction: i32,
    pub entry_price: f64,
    /// Fraction of the configured order size currently held.
    pub current_size: f64,
    pub entry_bar_count: u64,
    pub hold_bars: u64,
    pub peak_profit: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub entry_prob: f64,
    pub entry_rsi: f64,
}

// ---------------------------------------------------------------------------
// Ladder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PositionLadder {
    config: LadderConfig,
    state: PositionState,
    position: Option<StagedPosition>,
}

impl PositionLadder {
    pub fn new(config: LadderConfig) -> Self {
        Self {
            config,
            state: PositionState::Flat,
            position: None,
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn position(&self) -> Option<&StagedPosition> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.state == PositionState::Flat
    }

    pub fn has_position(&self) -> bool {
        !self.is_flat()
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Direction implied by (probability, RSI) regardless of current state:
    /// 1 = long, -1 = short, 0 = none. Long requires the RSI not overbought,
    /// short requires it not oversold.
    pub fn raw_signal(&self, prob: f64, rsi: f64) -> i32 {
        let signal = if prob > self.config.threshold {
            1
        } else if prob < 1.0 - self.config.threshold {
            -1
        } else {
            return 0;
        };

        if signal == 1 && rsi > self.config.rsi_upper {
            return 0;
        }
        if signal == -1 && rsi < self.config.rsi_lower {
            return 0;
        }
        signal
    }

    /// Entry signal: as `raw_signal`, but only while flat.
    pub fn check_entry_signal(&self, prob: f64, rsi: f64) -> i32 {
        if !self.is_flat() {
            return 0;
        }
        self.raw_signal(prob, rsi)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Open at probe size; only legal from flat.
    pub fn enter(&mut self, direction: i32, price: f64, prob: f64, rsi: f64, bar_count: u64) -> bool {
        if !self.is_flat() || direction == 0 || price <= 0.0 {
            return false;
        }
        self.position = Some(StagedPosition {
            direction,
            entry_price: price,
            current_size: self.config.probe_size,
            entry_bar_count: bar_count,
            hold_bars: 0,
            peak_profit: 0.0,
            highest_price: price,
            lowest_price: price,
            entry_prob: prob,
            entry_rsi: rsi,
        });
        self.state = PositionState::Probe;
        true
    }

    /// Advance the ladder one price observation.
    ///
    /// Returns `(should_exit, exit_reason, pnl_pct)`. Upgrades (probe→full,
    /// full→trail) happen internally and report no exit.
    pub fn update(&mut self, price: f64, pending_signal: i32) -> (bool, String, f64) {
        if self.is_flat() {
            return (false, String::new(), 0.0);
        }
        let Some(position) = self.position.as_mut() else {
            self.state = PositionState::Flat;
            return (false, String::new(), 0.0);
        };

        position.hold_bars += 1;
        position.highest_price = position.highest_price.max(price);
        position.lowest_price = position.lowest_price.min(price);

        let pnl_pct = if position.entry_price > 0.0 {
            position.direction as f64 * (price - position.entry_price) / position.entry_price
        } else {
            0.0
        };
        if pnl_pct > position.peak_profit {
            position.peak_profit = pnl_pct;
        }

        let reverse =
            pending_signal != 0 && pending_signal != position.direction;
        let peak = position.peak_profit;

        match self.state {
            PositionState::Probe => {
                if pnl_pct >= self.config.probe_to_full() {
                    position.current_size = self.config.full_size;
                    self.state = PositionState::Full;
                    return (false, String::new(), pnl_pct);
                }
                if pnl_pct <= -self.config.probe_sl() {
                    return (true, "probe_sl".into(), pnl_pct);
                }
                if reverse {
                    return (true, "reverse_signal".into(), pnl_pct);
                }
            }
            PositionState::Full => {
                if pnl_pct >= self.config.full_to_trail() {
                    self.state = PositionState::Trail;
                    return (false, String::new(), pnl_pct);
                }
                if pnl_pct <= -self.config.full_sl() {
                    return (true, "full_sl".into(), pnl_pct);
                }
                if reverse {
                    return (true, "reverse_signal".into(), pnl_pct);
                }
            }
            PositionState::Trail => {
                if pnl_pct >= self.config.trail_tp() {
                    return (true, "trail_tp".into(), pnl_pct);
                }
                if peak > 0.0 && (peak - pnl_pct) / peak >= self.config.trail_dd {
                    return (true, "trail_dd".into(), pnl_pct);
                }
                if reverse {
                    return (true, "reverse_signal".into(), pnl_pct);
                }
            }
            PositionState::Flat => {}
        }

        (false, String::new(), pnl_pct)
    }

    /// Reduce to zero and return to flat.
    pub fn exit(&mut self) -> Option<StagedPosition> {
        self.state = PositionState::Flat;
        self.position.take()
    }

    pub fn reset(&mut self) {
        self.state = PositionState::Flat;
        self.position = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> PositionLadder {
        PositionLadder::new(LadderConfig::default())
    }

    #[test]
    fn derived_thresholds() {
        let c = LadderConfig::default();
        assert!((c.probe_sl() - 0.004).abs() < 1e-12);
        assert!((c.probe_to_full() - 0.004).abs() < 1e-12);
        assert!((c.full_sl() - 0.005).abs() < 1e-12);
        assert!((c.full_to_trail() - 0.006).abs() < 1e-12);
        assert!((c.trail_tp() - 0.012).abs() < 1e-12);
    }

    #[test]
    fn signal_requires_probability_edge_and_rsi_room() {
        let l = ladder();
        assert_eq!(l.raw_signal(0.7, 50.0), 1);
        assert_eq!(l.raw_signal(0.3, 50.0), -1);
        assert_eq!(l.raw_signal(0.5, 50.0), 0);
        // Overbought blocks longs, oversold blocks shorts.
        assert_eq!(l.raw_signal(0.7, 60.0), 0);
        assert_eq!(l.raw_signal(0.3, 40.0), 0);
        // Boundary values pass.
        assert_eq!(l.raw_signal(0.7, 55.0), 1);
        assert_eq!(l.raw_signal(0.3, 45.0), -1);
    }

    #[test]
    fn entry_only_from_flat() {
        let mut l = ladder();
        assert!(l.enter(1, 100.0, 0.7, 50.0, 1));
        assert_eq!(l.state(), PositionState::Probe);
        assert!(!l.enter(1, 101.0, 0.7, 50.0, 2));
        assert_eq!(l.check_entry_signal(0.7, 50.0), 0);
    }

    #[test]
    fn full_cycle_probe_full_trail_take_profit() {
        // Entry long at 100.0; +0.4% upgrades, +0.7% starts trailing,
        // +1.2% takes profit.
        let mut l = ladder();
        l.enter(1, 100.0, 0.7, 50.0, 1);

        let (exit, _, pnl) = l.update(100.4, 0);
        assert!(!exit);
        assert_eq!(l.state(), PositionState::Full);
        assert!((pnl - 0.004).abs() < 1e-9);
        assert_eq!(l.position().unwrap().current_size, 1.0);

        let (exit, _, pnl) = l.update(100.7, 0);
        assert!(!exit);
        assert_eq!(l.state(), PositionState::Trail);
        assert!((pnl - 0.007).abs() < 1e-9);
        assert!((l.position().unwrap().peak_profit - 0.007).abs() < 1e-9);

        let (exit, reason, pnl) = l.update(101.2, 0);
        assert!(exit);
        assert_eq!(reason, "trail_tp");
        assert!((pnl - 0.012).abs() < 1e-9);

        let position = l.exit().unwrap();
        assert_eq!(l.state(), PositionState::Flat);
        assert_eq!(position.hold_bars, 3);
    }

    #[test]
    fn probe_stop_loss() {
        let mut l = ladder();
        l.enter(1, 100.0, 0.7, 50.0, 1);
        let (exit, reason, pnl) = l.update(99.6, 0);
        assert!(exit);
        assert_eq!(reason, "probe_sl");
        assert!((pnl + 0.004).abs() < 1e-9);
    }

    #[test]
    fn full_stop_loss_is_wider_than_probe() {
        let mut l = ladder();
        l.enter(1, 100.0, 0.7, 50.0, 1);
        l.update(100.4, 0); // -> full
        let (exit, _, _) = l.update(99.6, 0); // -0.4%: inside the full stop
        assert!(!exit);
        let (exit, reason, _) = l.update(99.5, 0); // -0.5%: full stop
        assert!(exit);
        assert_eq!(reason, "full_sl");
    }

    #[test]
    fn trail_drawdown_gives_back_a_fraction_of_peak() {
        let mut l = ladder();
        l.enter(1, 100.0, 0.7, 50.0, 1);
        l.update(100.4, 0); // probe -> full
        l.update(100.8, 0); // full -> trail, peak 0.8%
        let (exit, _, _) = l.update(100.7, 0); // drawdown 12.5% of peak
        assert!(!exit);
        let (exit, reason, _) = l.update(100.5, 0); // drawdown 37.5% of peak
        assert!(exit);
        assert_eq!(reason, "trail_dd");
    }

    #[test]
    fn reverse_signal_exits_any_state() {
        for prime in [0usize, 1, 2] {
            let mut l = ladder();
            l.enter(1, 100.0, 0.7, 50.0, 1);
            // Walk the ladder up `prime` stages first.
            if prime >= 1 {
                l.update(100.4, 0);
            }
            if prime >= 2 {
                l.update(100.7, 0);
            }
            let (exit, reason, _) = l.update(100.25, -1);
            assert!(exit, "no exit from stage {prime}");
            assert_eq!(reason, "reverse_signal");
        }
    }

    #[test]
    fn short_side_mirrors_pnl() {
        let mut l = ladder();
        l.enter(-1, 100.0, 0.3, 50.0, 1);
        let (exit, _, pnl) = l.update(99.6, 0);
        assert!(!exit);
        assert_eq!(l.state(), PositionState::Full);
        assert!((pnl - 0.004).abs() < 1e-9);

        let (exit, reason, _) = l.update(100.5, 0);
        assert!(exit);
        assert_eq!(reason, "full_sl");
    }

    #[test]
    fn states_advance_monotonically_within_a_lifecycle() {
        // flat < probe < full < trail; no state revisited without crossing
        // flat.
        fn rank(state: PositionState) -> u8 {
            match state {
                PositionState::Flat => 0,
                PositionState::Probe => 1,
                PositionState::Full => 2,
                PositionState::Trail => 3,
            }
        }

        let mut l = ladder();
        let mut states = vec![l.state()];
        l.enter(1, 100.0, 0.7, 50.0, 1);
        states.push(l.state());
        for price in [100.2, 100.4, 100.5, 100.7, 101.0, 101.2] {
            let (exit, _, _) = l.update(price, 0);
            states.push(l.state());
            if exit {
                l.exit();
                states.push(l.state());
                break;
            }
        }

        let ranks: Vec<u8> = states.iter().map(|s| rank(*s)).collect();
        // Strictly non-decreasing until the final return to flat.
        let last = ranks.len() - 1;
        for w in ranks[..last].windows(2) {
            assert!(w[0] <= w[1], "state regressed mid-lifecycle: {states:?}");
        }
        assert_eq!(ranks[last], 0);
        assert_eq!(ranks[last - 1], 3);
    }
}
