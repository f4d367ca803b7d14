//! Advisory estimators derived from engine state.
//!
//! None of these gate streaming or scheduling; they feed response headers
//! and push notifications so a player can adapt.

pub mod buffer;
pub mod connection;
pub mod quality;

pub use buffer::{BufferHealthEstimator, estimate_buffer_health};
pub use connection::{ConnectionHealth, ConnectionHealthMonitor, connection_score};
pub use quality::{QualityLabel, classify_throughput};

/// One mebibyte, the unit every throughput threshold is expressed in.
pub const MIB: f64 = 1_048_576.0;
