// =============================================================================
// Monitoring — activity counters, threshold alerts, connection supervision
// =============================================================================

pub mod connection;
pub mod order_monitor;
pub mod threshold;

pub use connection::{ConnectionMonitor, ConnectionState, ReconnectPolicy};
pub use order_monitor::{OrderAction, OrderMonitor};
pub use threshold::{ThresholdAlert, ThresholdKind, ThresholdManager};
