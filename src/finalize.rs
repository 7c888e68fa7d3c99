//! Finalizers
//!
//! Pure functions that turn a combined reservoir into the statistic a query asked
//! for, plus the serializable post-aggregator specs the host plans with. A
//! post-aggregator reads its input reservoir from a row of named partial results.

use crate::cache_key::CacheKeyBuilder;
use crate::codec::{ReservoirCodec, ReservoirInput};
use crate::reservoir::{check_fraction, Reservoir};
use crate::{ReservoirError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

const PERCENTILES_CACHE_ID: u8 = 0x62;
const PERCENTILE_CACHE_ID: u8 = 0x63;
const STDDEV_CACHE_ID: u8 = 0x64;

/// Named partial results, as the host hands them to post-aggregators
pub type Row = HashMap<String, ReservoirInput>;

/// Percentile at `fraction` of a combined reservoir
pub fn percentile(reservoir: &Reservoir, fraction: f64) -> Result<f64> {
    reservoir.percentile(fraction)
}

/// Percentiles at each of `fractions`, sharing one sort
pub fn percentiles(reservoir: &Reservoir, fractions: &[f64]) -> Result<Vec<f64>> {
    reservoir.percentiles(fractions)
}

/// Standard deviation of a combined reservoir
pub fn stddev(reservoir: &Reservoir) -> f64 {
    reservoir.stddev()
}

fn check_names(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ReservoirError::InvalidConfig {
            field: "name",
            reason: "must be a non-blank string",
        });
    }
    if field.trim().is_empty() {
        return Err(ReservoirError::InvalidConfig {
            field: "field",
            reason: "must be a non-blank string",
        });
    }
    Ok(())
}

/// Look up `field` in `row` and coerce it; a missing entry is the empty reservoir
fn input_reservoir<'a>(
    row: &'a Row,
    field: &str,
    codec: &ReservoirCodec,
) -> Result<Cow<'a, Reservoir>> {
    match row.get(field) {
        Some(input) => codec.coerce(input),
        None => Ok(Cow::Owned(Reservoir::empty())),
    }
}

/// Single percentile of the reservoir stored under `field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "doublesReservoirToPercentile")]
pub struct PercentilePostAggregator {
    name: String,
    field: String,
    fraction: f64,
}

impl PercentilePostAggregator {
    pub fn new(name: impl Into<String>, field: impl Into<String>, fraction: f64) -> Result<Self> {
        let (name, field) = (name.into(), field.into());
        check_names(&name, &field)?;
        check_fraction(fraction)?;
        Ok(PercentilePostAggregator { name, field, fraction })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn dependent_fields(&self) -> Vec<&str> {
        vec![self.field.as_str()]
    }

    pub fn compute(&self, row: &Row, codec: &ReservoirCodec) -> Result<f64> {
        // The fraction is checked again: deserialized specs skip `new`.
        input_reservoir(row, &self.field, codec)?.percentile(self.fraction)
    }

    /// Order of two results; NaN sorts after every number
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        a.total_cmp(&b)
    }

    pub fn cache_key(&self) -> Vec<u8> {
        CacheKeyBuilder::new(PERCENTILE_CACHE_ID)
            .string(&self.field)
            .double(self.fraction)
            .build()
    }
}

/// Several percentiles of the reservoir stored under `field`
///
/// The result is a vector and has no ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "doublesReservoirToPercentiles")]
pub struct PercentilesPostAggregator {
    name: String,
    field: String,
    fractions: Vec<f64>,
}

impl PercentilesPostAggregator {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        fractions: Vec<f64>,
    ) -> Result<Self> {
        let (name, field) = (name.into(), field.into());
        check_names(&name, &field)?;
        for &fraction in &fractions {
            check_fraction(fraction)?;
        }
        Ok(PercentilesPostAggregator { name, field, fractions })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    pub fn dependent_fields(&self) -> Vec<&str> {
        vec![self.field.as_str()]
    }

    pub fn compute(&self, row: &Row, codec: &ReservoirCodec) -> Result<Vec<f64>> {
        input_reservoir(row, &self.field, codec)?.percentiles(&self.fractions)
    }

    pub fn cache_key(&self) -> Vec<u8> {
        let mut key = CacheKeyBuilder::new(PERCENTILES_CACHE_ID)
            .string(&self.field)
            .int(self.fractions.len() as u32);
        for &fraction in &self.fractions {
            key = key.double(fraction);
        }
        key.build()
    }
}

/// Standard deviation of the reservoir stored under `field`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename = "doublesReservoirToStddev")]
pub struct StddevPostAggregator {
    name: String,
    field: String,
}

impl StddevPostAggregator {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Result<Self> {
        let (name, field) = (name.into(), field.into());
        check_names(&name, &field)?;
        Ok(StddevPostAggregator { name, field })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependent_fields(&self) -> Vec<&str> {
        vec![self.field.as_str()]
    }

    pub fn compute(&self, row: &Row, codec: &ReservoirCodec) -> Result<f64> {
        Ok(input_reservoir(row, &self.field, codec)?.stddev())
    }

    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        a.total_cmp(&b)
    }

    pub fn cache_key(&self) -> Vec<u8> {
        CacheKeyBuilder::new(STDDEV_CACHE_ID).string(&self.field).build()
    }
}
