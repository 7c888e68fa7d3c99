//! # Reservoir Percentiles: Mergeable Approximate Percentiles
//!
//! This crate provides a bounded-memory random sample ("reservoir") of a numeric
//! stream for approximate percentile and standard deviation queries inside a
//! columnar query engine.
//!
//! A reservoir is useful for:
//! - Estimating percentiles of a column scanned segment by segment
//! - Keeping aggregation state for many groups at a fixed memory cost per group
//! - Combining partial results from separate partitions or segments
//!
//! The engine drives the crate through aggregators: [`BuildAggregator`] feeds
//! one reservoir from a column cursor, [`BufferBuildAggregator`] keeps one
//! reservoir per buffer slot and follows slot relocation, and
//! [`ReservoirAggregatorFactory::combine`] merges partial results. The
//! post-aggregators in [`finalize`] turn a combined reservoir into numbers.
//!
//! ## Example
//!
//! ```
//! use reservoir_percentiles::Reservoir;
//!
//! let mut reservoir = Reservoir::new(1024);
//!
//! // Add values
//! reservoir.offer(1.0);
//! reservoir.offer(2.0);
//! reservoir.offer(3.0);
//!
//! // Get percentiles
//! let median = reservoir.percentile(0.5).unwrap();
//! let p99 = reservoir.percentile(0.99).unwrap();
//! assert_eq!(median, 2.0);
//! assert!(p99 > 2.9);
//! ```

pub mod aggregator;
pub mod buffer;
mod cache_key;
pub mod codec;
pub mod factory;
pub mod finalize;
pub mod planner;
pub mod reservoir;

pub use aggregator::{Aggregator, BuildAggregator, ColumnSelector, NoopAggregator, RowValue};
pub use buffer::{BufferAggregator, BufferBuildAggregator, NoopBufferAggregator, RegionId};
pub use codec::{IngestValue, ReservoirCodec, ReservoirInput};
pub use factory::{ReservoirAggregatorFactory, ReservoirCombiner};
pub use reservoir::{identity_order, Reservoir};

use thiserror::Error;

/// Errors that can occur in reservoir operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReservoirError {
    /// Aggregator construction parameter is missing or out of range
    #[error("invalid aggregator config: {field} {reason}")]
    InvalidConfig {
        /// The offending configuration field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Percentile fraction outside `[0, 1]`
    #[error("A fraction must be >= 0 and <= 1.0: {0}")]
    InvalidArgument(f64),

    /// Serialized reservoir could not be decoded
    #[error("cannot decode reservoir from {length} bytes at position {position}: {reason}")]
    Decode {
        /// Length of the rejected input in bytes
        length: usize,
        /// Byte offset where decoding failed
        position: usize,
        /// Decoder message
        reason: String,
    },

    /// Reservoir could not be encoded
    #[error("cannot encode reservoir: {0}")]
    Encode(String),

    /// Input of a shape that cannot be turned into a reservoir
    #[error("cannot interpret value of type {0} as a reservoir")]
    UnsupportedShape(String),
}

/// Result type for reservoir operations
pub type Result<T> = std::result::Result<T, ReservoirError>;
