// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================
//
// Wire-level character codes follow the brokerage convention: direction
// '0' = buy / '1' = sell; offset '0' = open, '1' = close, '3' = close-today,
// '4' = close-yesterday; order status codes per the exchange status table.
// Adaptation between the raw feed and these types happens once, at the
// transport boundary.
// =============================================================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Direction / Offset
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn code(self) -> char {
        match self {
            Self::Buy => '0',
            Self::Sell => '1',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Buy),
            '1' => Some(Self::Sell),
            _ => None,
        }
    }

    /// The direction that closes a position opened in this direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Open / close flag on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    Open,
    Close,
    CloseToday,
    CloseYesterday,
}

impl Offset {
    pub fn code(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::CloseToday => '3',
            Self::CloseYesterday => '4',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '3' => Some(Self::CloseToday),
            '4' => Some(Self::CloseYesterday),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
            Self::CloseToday => write!(f, "CLOSE_TODAY"),
            Self::CloseYesterday => write!(f, "CLOSE_YESTERDAY"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Exchange-observed order status.
///
/// `Submitted` is the local state assigned when the request is accepted by
/// the transport; everything else arrives via order return callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Queued,
    PartFilledQueued,
    PartFilledGone,
    UnfilledGone,
    Cancelled,
    AllFilled,
    Unknown,
    NotTouched,
    Touched,
}

impl OrderStatus {
    pub fn from_code(c: char) -> Self {
        match c {
            '0' => Self::AllFilled,
            '1' => Self::PartFilledQueued,
            '2' => Self::PartFilledGone,
            '3' => Self::Queued,
            '4' => Self::UnfilledGone,
            '5' => Self::Cancelled,
            'b' => Self::NotTouched,
            'c' => Self::Touched,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::AllFilled => '0',
            Self::PartFilledQueued => '1',
            Self::PartFilledGone => '2',
            Self::Queued => '3',
            Self::UnfilledGone => '4',
            Self::Cancelled => '5',
            Self::Unknown => 'a',
            Self::NotTouched => 'b',
            Self::Touched => 'c',
            Self::Submitted => 's',
        }
    }

    /// Terminal statuses never advance again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AllFilled | Self::PartFilledGone | Self::UnfilledGone | Self::Cancelled
        )
    }

    /// An order still resting on the exchange, eligible for cancellation.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::PartFilledQueued)
    }

    /// Whether a status update is allowed to move `from` to `to`.
    ///
    /// Updates that repeat the current status are allowed (volume fields may
    /// still change). `Unknown` is reachable from anywhere as a diagnostic.
    pub fn can_advance(from: Self, to: Self) -> bool {
        if from == to || to == Self::Unknown {
            return true;
        }
        matches!(
            (from, to),
            (Self::Submitted, Self::Queued)
                | (Self::Submitted, Self::Cancelled)
                | (Self::Queued, Self::PartFilledQueued)
                | (Self::Queued, Self::AllFilled)
                | (Self::Queued, Self::UnfilledGone)
                | (Self::Queued, Self::Cancelled)
                | (Self::PartFilledQueued, Self::AllFilled)
                | (Self::PartFilledQueued, Self::PartFilledGone)
                | (Self::NotTouched, Self::Touched)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// Market data records
// ---------------------------------------------------------------------------

/// A point-in-time market-data sample for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_id: String,
    /// Exchange timestamp with millisecond resolution.
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub trading_day: String,
    #[serde(default)]
    pub action_day: String,
    pub last_price: f64,
    pub bid_price: f64,
    pub bid_volume: i64,
    pub ask_price: f64,
    pub ask_volume: i64,
    /// Cumulative session volume.
    pub volume: i64,
    /// Cumulative session turnover.
    pub turnover: f64,
    #[serde(default)]
    pub open_interest: f64,
}

/// One-minute OHLC aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time, floored to the minute.
    pub datetime: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Per-bar volume (delta of cumulative session volume).
    pub volume: i64,
    /// Per-bar turnover delta.
    pub turnover: f64,
    #[serde(default)]
    pub open_interest: f64,
}

// ---------------------------------------------------------------------------
// Trading records
// ---------------------------------------------------------------------------

/// A tracked order. Exactly one record exists per order reference; the
/// status only advances along [`OrderStatus::can_advance`] edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client reference, locally allocated, rendered decimal.
    pub order_ref: String,
    /// Exchange-assigned id, empty until acknowledged.
    #[serde(default)]
    pub order_sys_id: String,
    #[serde(default)]
    pub exchange_id: String,
    pub instrument_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume_original: i64,
    #[serde(default)]
    pub volume_traded: i64,
    #[serde(default)]
    pub volume_remaining: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub status_msg: String,
}

/// An executed fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub instrument_id: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
    pub trade_id: String,
    pub order_ref: String,
}

/// Side of a held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn code(self) -> char {
        match self {
            Self::Long => '2',
            Self::Short => '3',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            '2' => Some(Self::Long),
            '3' => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A held position for one (instrument, side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub instrument_id: String,
    pub side: PositionSide,
    pub volume: i64,
    pub today_volume: i64,
    pub yesterday_volume: i64,
}

impl PositionRecord {
    /// Map key used by the session's position cache and the validator.
    pub fn key(&self) -> String {
        position_key(&self.instrument_id, self.side)
    }
}

pub fn position_key(instrument_id: &str, side: PositionSide) -> String {
    format!("{}_{}", instrument_id, side.code())
}

/// Account funds snapshot from the trading-account query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub available: f64,
    pub balance: f64,
    pub frozen_margin: f64,
    pub frozen_commission: f64,
}

/// Static instrument descriptor, loaded once from the instrument query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub instrument_id: String,
    pub exchange_id: String,
    pub instrument_name: String,
    pub volume_multiple: i64,
    pub price_tick: f64,
    pub max_order_volume: i64,
    pub min_order_volume: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offset_codes_roundtrip() {
        for d in [Direction::Buy, Direction::Sell] {
            assert_eq!(Direction::from_code(d.code()), Some(d));
        }
        for o in [
            Offset::Open,
            Offset::Close,
            Offset::CloseToday,
            Offset::CloseYesterday,
        ] {
            assert_eq!(Offset::from_code(o.code()), Some(o));
        }
        assert_eq!(Direction::Buy.opposite(), Direction::Sell);
    }

    #[test]
    fn status_codes_map_to_variants() {
        assert_eq!(OrderStatus::from_code('0'), OrderStatus::AllFilled);
        assert_eq!(OrderStatus::from_code('3'), OrderStatus::Queued);
        assert_eq!(OrderStatus::from_code('5'), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::from_code('x'), OrderStatus::Unknown);
    }

    #[test]
    fn status_transitions_follow_allowed_edges() {
        use OrderStatus::*;

        assert!(OrderStatus::can_advance(Submitted, Queued));
        assert!(OrderStatus::can_advance(Queued, PartFilledQueued));
        assert!(OrderStatus::can_advance(PartFilledQueued, AllFilled));
        assert!(OrderStatus::can_advance(PartFilledQueued, PartFilledGone));
        assert!(OrderStatus::can_advance(Queued, UnfilledGone));
        assert!(OrderStatus::can_advance(Submitted, Cancelled));
        assert!(OrderStatus::can_advance(Queued, Cancelled));

        // Diagnostic edge is reachable from anywhere.
        assert!(OrderStatus::can_advance(AllFilled, Unknown));

        // Terminal statuses never move backwards.
        assert!(!OrderStatus::can_advance(AllFilled, Queued));
        assert!(!OrderStatus::can_advance(Cancelled, Queued));
        assert!(!OrderStatus::can_advance(PartFilledGone, AllFilled));
        // No skipping the queue.
        assert!(!OrderStatus::can_advance(Submitted, PartFilledQueued));
    }

    #[test]
    fn pending_and_terminal_sets() {
        assert!(OrderStatus::Queued.is_pending());
        assert!(OrderStatus::PartFilledQueued.is_pending());
        assert!(!OrderStatus::AllFilled.is_pending());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }

    #[test]
    fn position_key_embeds_side_code() {
        assert_eq!(position_key("rb2505", PositionSide::Long), "rb2505_2");
        assert_eq!(position_key("rb2505", PositionSide::Short), "rb2505_3");
    }
}
