//! Analysis modules.
//!
//! The aggregation engine lives in [`aggregator`]; [`fallback`] owns the
//! canonical degraded values and the caching rule built on them.

pub mod aggregator;
pub mod events;
pub mod fallback;

pub use aggregator::{AggregationEngine, EngineConfig};
pub use events::{EventSink, PipelineEvent};
