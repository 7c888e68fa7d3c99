//! Aggregator factory
//!
//! The factory is the configured entry point the host registers under the type
//! name `doublesReservoir`. It validates its parameters, hands out aggregators
//! for a column, combines partial results and contributes a cache key.

use crate::aggregator::{Aggregator, BuildAggregator, ColumnSelector, NoopAggregator};
use crate::buffer::{BufferAggregator, BufferBuildAggregator, NoopBufferAggregator};
use crate::cache_key::CacheKeyBuilder;
use crate::codec::{ReservoirCodec, ReservoirInput};
use crate::reservoir::Reservoir;
use crate::{ReservoirError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Type name of the build factory in query specs
pub const BUILD_TYPE_NAME: &str = "doublesReservoir";

/// Type name of the merge factory in query specs
pub const MERGE_TYPE_NAME: &str = "doublesReservoirMerge";

const BUILD_CACHE_ID: u8 = 0x60;
const MERGE_CACHE_ID: u8 = 0x61;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FactoryKind {
    Build,
    Merge,
}

/// Wire form of the factory. Fields are optional so that missing ones surface as
/// `InvalidConfig` rather than as a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum FactorySpec {
    #[serde(rename = "doublesReservoir", rename_all = "camelCase")]
    Build {
        name: Option<String>,
        field_name: Option<String>,
        max_reservoir_size: Option<i64>,
    },
    #[serde(rename = "doublesReservoirMerge", rename_all = "camelCase")]
    Merge {
        name: Option<String>,
        max_reservoir_size: Option<i64>,
    },
}

/// Configured reservoir aggregator factory
///
/// Deserializes from
/// `{"type": "doublesReservoir", "name": ..., "fieldName": ..., "maxReservoirSize": ...}`
/// or `{"type": "doublesReservoirMerge", "name": ..., "maxReservoirSize": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FactorySpec", into = "FactorySpec")]
pub struct ReservoirAggregatorFactory {
    kind: FactoryKind,
    name: String,
    field_name: String,
    max_reservoir_size: usize,
}

impl ReservoirAggregatorFactory {
    /// Create a factory that samples column `field_name` into output `name`
    ///
    /// # Arguments
    /// * `name` - The output name, non-blank
    /// * `field_name` - The input column, non-blank
    /// * `max_reservoir_size` - The reservoir capacity, positive
    pub fn new(
        name: impl Into<String>,
        field_name: impl Into<String>,
        max_reservoir_size: usize,
    ) -> Result<Self> {
        Self::validated(FactoryKind::Build, name.into(), field_name.into(), max_reservoir_size)
    }

    /// Create a factory that merges reservoirs stored under `name`
    pub fn merging(name: impl Into<String>, max_reservoir_size: usize) -> Result<Self> {
        let name = name.into();
        Self::validated(FactoryKind::Merge, name.clone(), name, max_reservoir_size)
    }

    fn validated(
        kind: FactoryKind,
        name: String,
        field_name: String,
        max_reservoir_size: usize,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(ReservoirError::InvalidConfig {
                field: "name",
                reason: "must be a non-blank string",
            });
        }
        if field_name.trim().is_empty() {
            return Err(ReservoirError::InvalidConfig {
                field: "fieldName",
                reason: "must be a non-blank string",
            });
        }
        if max_reservoir_size == 0 {
            return Err(ReservoirError::InvalidConfig {
                field: "maxReservoirSize",
                reason: "must be greater than 0",
            });
        }
        if max_reservoir_size > i32::MAX as usize {
            return Err(ReservoirError::InvalidConfig {
                field: "maxReservoirSize",
                reason: "must fit in a signed 32-bit integer",
            });
        }

        debug!(%name, %field_name, max_reservoir_size, ?kind, "reservoir aggregator factory");
        Ok(ReservoirAggregatorFactory {
            kind,
            name,
            field_name,
            max_reservoir_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn max_reservoir_size(&self) -> usize {
        self.max_reservoir_size
    }

    /// The type name this factory is registered under
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            FactoryKind::Build => BUILD_TYPE_NAME,
            FactoryKind::Merge => MERGE_TYPE_NAME,
        }
    }

    /// Columns the aggregators read
    pub fn required_fields(&self) -> Vec<&str> {
        vec![self.field_name.as_str()]
    }

    /// Upper bound of the slot size the host reserves per group
    pub fn max_intermediate_size(&self) -> usize {
        self.max_reservoir_size * std::mem::size_of::<f64>()
    }

    /// Same configuration under another output name
    pub fn with_name(&self, name: impl Into<String>) -> Result<Self> {
        match self.kind {
            FactoryKind::Build => Self::new(name, self.field_name.clone(), self.max_reservoir_size),
            FactoryKind::Merge => Self::merging(name, self.max_reservoir_size),
        }
    }

    /// Factory that merges this factory's output when partial results are combined
    pub fn combining_factory(&self) -> Self {
        ReservoirAggregatorFactory {
            kind: FactoryKind::Merge,
            name: self.name.clone(),
            field_name: self.name.clone(),
            max_reservoir_size: self.max_reservoir_size,
        }
    }

    /// Aggregator over `selector`; `None` means the column does not exist
    pub fn factorize<S>(&self, selector: Option<S>) -> Box<dyn Aggregator>
    where
        S: ColumnSelector + 'static,
    {
        match selector {
            Some(selector) => Box::new(BuildAggregator::new(selector, self.max_reservoir_size)),
            None => Box::new(NoopAggregator::new()),
        }
    }

    /// Buffer aggregator over `selector`; `None` means the column does not exist
    pub fn factorize_buffered<S>(&self, selector: Option<S>) -> Box<dyn BufferAggregator>
    where
        S: ColumnSelector + 'static,
    {
        match selector {
            Some(selector) => {
                Box::new(BufferBuildAggregator::new(selector, self.max_reservoir_size))
            }
            None => Box::new(NoopBufferAggregator::new()),
        }
    }

    /// Merge two partial results
    ///
    /// Either side may be absent, a reservoir, or anything the codec can coerce.
    /// Absent is the identity: the other side is returned as is.
    ///
    /// # Returns
    /// The merged reservoir, or `None` when both sides are absent
    pub fn combine(
        &self,
        codec: &ReservoirCodec,
        lhs: ReservoirInput,
        rhs: ReservoirInput,
    ) -> Result<Option<Reservoir>> {
        match (lhs, rhs) {
            (ReservoirInput::Absent, ReservoirInput::Absent) => Ok(None),
            (ReservoirInput::Absent, other) | (other, ReservoirInput::Absent) => {
                codec.coerce_owned(other).map(Some)
            }
            (lhs, rhs) => {
                let mut merged = codec.coerce_owned(lhs)?;
                let rhs = codec.coerce_owned(rhs)?;
                merged.merge(&rhs);
                Ok(Some(merged))
            }
        }
    }

    /// Stateful combiner for folding a column of partial results
    pub fn make_combiner(&self) -> ReservoirCombiner {
        ReservoirCombiner {
            capacity: self.max_reservoir_size,
            combined: None,
        }
    }

    /// Decode a stored or transported value into a reservoir
    pub fn deserialize(&self, codec: &ReservoirCodec, input: ReservoirInput) -> Result<Reservoir> {
        codec.coerce_owned(input)
    }

    /// The intermediate reservoir is also the final result
    pub fn finalize(&self, reservoir: Reservoir) -> Reservoir {
        reservoir
    }

    /// Deterministic key for the host's result cache
    pub fn cache_key(&self) -> Vec<u8> {
        let tag = match self.kind {
            FactoryKind::Build => BUILD_CACHE_ID,
            FactoryKind::Merge => MERGE_CACHE_ID,
        };
        CacheKeyBuilder::new(tag)
            .string(&self.name)
            .string(&self.field_name)
            .int(self.max_reservoir_size as u32)
            .build()
    }
}

impl TryFrom<FactorySpec> for ReservoirAggregatorFactory {
    type Error = ReservoirError;

    fn try_from(spec: FactorySpec) -> Result<Self> {
        match spec {
            FactorySpec::Build {
                name,
                field_name,
                max_reservoir_size,
            } => Self::new(
                name.unwrap_or_default(),
                field_name.unwrap_or_default(),
                positive_size(max_reservoir_size)?,
            ),
            FactorySpec::Merge {
                name,
                max_reservoir_size,
            } => Self::merging(name.unwrap_or_default(), positive_size(max_reservoir_size)?),
        }
    }
}

fn positive_size(size: Option<i64>) -> Result<usize> {
    match size {
        Some(size) if size > 0 => usize::try_from(size).map_err(|_| ReservoirError::InvalidConfig {
            field: "maxReservoirSize",
            reason: "is out of range",
        }),
        _ => Err(ReservoirError::InvalidConfig {
            field: "maxReservoirSize",
            reason: "must be specified and greater than 0",
        }),
    }
}

impl From<ReservoirAggregatorFactory> for FactorySpec {
    fn from(factory: ReservoirAggregatorFactory) -> Self {
        let max_reservoir_size = Some(factory.max_reservoir_size as i64);
        match factory.kind {
            FactoryKind::Build => FactorySpec::Build {
                name: Some(factory.name),
                field_name: Some(factory.field_name),
                max_reservoir_size,
            },
            FactoryKind::Merge => FactorySpec::Merge {
                name: Some(factory.name),
                max_reservoir_size,
            },
        }
    }
}

/// Folds a column of partial reservoirs, row by row
#[derive(Debug, Clone)]
pub struct ReservoirCombiner {
    capacity: usize,
    combined: Option<Reservoir>,
}

impl ReservoirCombiner {
    /// Start over from `value`
    pub fn reset(&mut self, value: Option<&Reservoir>) {
        self.combined = None;
        self.fold(value);
    }

    /// Merge `value` into the running result; `None` is skipped
    pub fn fold(&mut self, value: Option<&Reservoir>) {
        if let Some(other) = value {
            let capacity = self.capacity;
            self.combined
                .get_or_insert_with(|| Reservoir::new(capacity))
                .merge(other);
        }
    }

    /// The running result, `None` until something was folded
    pub fn get(&self) -> Option<&Reservoir> {
        self.combined.as_ref()
    }
}
