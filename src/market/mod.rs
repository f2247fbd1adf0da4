// =============================================================================
// Market data plane — per-instrument caches and derived features
// =============================================================================

pub mod bar;
pub mod context;
pub mod depth;
pub mod feature_cache;
pub mod stats;
pub mod tick_cache;

pub use bar::{BarAggregator, BarBuffer};
pub use depth::{DepthBuffer, DepthSnapshot};
pub use feature_cache::{FeatureScaler, FeatureSequenceCache};
pub use tick_cache::TickCache;
