//! Serialization for reservoirs
//!
//! A reservoir is stored as a small JSON document with the fields `maxSize`,
//! `totalItemsSeen` and `reservoir` (the samples, ascending). The byte form is the
//! UTF-8 encoding of that document, except that the canonical empty reservoir
//! encodes to zero bytes.
//!
//! The codec also normalizes the loosely typed values a host hands over during
//! merging and finalization (see [`ReservoirInput`]).

use crate::reservoir::Reservoir;
use crate::{ReservoirError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredRef<'a> {
    max_size: usize,
    total_items_seen: u64,
    #[serde(serialize_with = "write_samples")]
    reservoir: &'a [f64],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stored {
    max_size: usize,
    #[serde(default)]
    total_items_seen: Option<u64>,
    #[serde(deserialize_with = "read_samples")]
    reservoir: Vec<f64>,
}

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

/// One stored sample. JSON has no non-finite numbers, so NaN and the
/// infinities are written as the strings `"NaN"`, `"Infinity"` and
/// `"-Infinity"`. `null` reads back as NaN.
struct Sample(f64);

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_finite() {
            serializer.serialize_f64(v)
        } else if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v > 0.0 {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }
}

impl<'de> Deserialize<'de> for Sample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(SampleVisitor)
    }
}

struct SampleVisitor;

impl<'de> Visitor<'de> for SampleVisitor {
    type Value = Sample;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, null, or one of \"NaN\", \"Infinity\", \"-Infinity\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Sample, E> {
        Ok(Sample(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Sample, E> {
        Ok(Sample(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Sample, E> {
        Ok(Sample(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Sample, E> {
        match v {
            NAN => Ok(Sample(f64::NAN)),
            INFINITY => Ok(Sample(f64::INFINITY)),
            NEG_INFINITY => Ok(Sample(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Sample, E> {
        Ok(Sample(f64::NAN))
    }
}

fn write_samples<S>(samples: &&[f64], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(samples.iter().map(|&v| Sample(v)))
}

fn read_samples<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let samples = Vec::<Sample>::deserialize(deserializer)?;
    Ok(samples.into_iter().map(|Sample(v)| v).collect())
}

/// A value that may stand for a reservoir
///
/// Each variant has exactly one decode path in [`ReservoirCodec::coerce`].
#[derive(Debug, Clone)]
pub enum ReservoirInput {
    /// No value; coerces to the empty reservoir
    Absent,
    /// An already built reservoir, passed through
    Reservoir(Reservoir),
    /// Raw samples, e.g. a partially decoded array column
    Values(Vec<f64>),
    /// The structured form with `maxSize`, `totalItemsSeen`, `reservoir` keys
    Map(Map<String, Value>),
    /// The JSON text form
    Text(String),
    /// The stored byte form
    Bytes(Vec<u8>),
}

impl ReservoirInput {
    /// Classify a loosely typed JSON value
    ///
    /// `null`, numeric arrays, objects and strings are accepted; anything else is
    /// an `UnsupportedShape` error naming the observed type.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(ReservoirInput::Absent),
            Value::Object(map) => Ok(ReservoirInput::Map(map)),
            Value::String(text) => Ok(ReservoirInput::Text(text)),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in &items {
                    match item.as_f64() {
                        Some(v) => values.push(v),
                        None => {
                            return Err(ReservoirError::UnsupportedShape(format!(
                                "array of {}",
                                json_type_name(item)
                            )))
                        }
                    }
                }
                Ok(ReservoirInput::Values(values))
            }
            other => Err(ReservoirError::UnsupportedShape(json_type_name(&other).to_string())),
        }
    }
}

impl From<Reservoir> for ReservoirInput {
    fn from(reservoir: Reservoir) -> Self {
        ReservoirInput::Reservoir(reservoir)
    }
}

impl From<Option<Reservoir>> for ReservoirInput {
    fn from(reservoir: Option<Reservoir>) -> Self {
        reservoir.map_or(ReservoirInput::Absent, ReservoirInput::Reservoir)
    }
}

impl From<Vec<f64>> for ReservoirInput {
    fn from(values: Vec<f64>) -> Self {
        ReservoirInput::Values(values)
    }
}

/// A raw value read from an ingested row
#[derive(Debug, Clone)]
pub enum IngestValue {
    /// A plain number, to be offered to a reservoir
    Number(f64),
    /// A pre-aggregated reservoir, to be merged
    Reservoir(Reservoir),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encoder and decoder for reservoirs
///
/// The codec is an immutable value; construct one per query context and pass it
/// to whatever needs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservoirCodec {
    seed: Option<u64>,
}

impl ReservoirCodec {
    /// Create a codec whose decoded reservoirs draw from OS entropy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec whose decoded reservoirs use a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        ReservoirCodec { seed: Some(seed) }
    }

    /// Encode a reservoir to its stored byte form
    ///
    /// The canonical empty reservoir (capacity 0, nothing seen) encodes to zero bytes.
    pub fn to_bytes(&self, reservoir: &Reservoir) -> Result<Vec<u8>> {
        if reservoir.capacity() == 0 && reservoir.total_seen() == 0 {
            return Ok(Vec::new());
        }
        Ok(self.to_json(reservoir)?.into_bytes())
    }

    /// Encode a reservoir to its JSON text form
    pub fn to_json(&self, reservoir: &Reservoir) -> Result<String> {
        let stored = StoredRef {
            max_size: reservoir.capacity(),
            total_items_seen: reservoir.total_seen(),
            reservoir: reservoir.sorted_values(),
        };
        serde_json::to_string(&stored).map_err(|err| ReservoirError::Encode(err.to_string()))
    }

    /// Decode the stored byte form
    ///
    /// # Arguments
    /// * `bytes` - The encoded reservoir; empty input is the empty reservoir
    ///
    /// # Returns
    /// The reservoir, or a `Decode` error naming the input length and the byte
    /// offset where decoding failed
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Reservoir> {
        if bytes.is_empty() {
            return Ok(Reservoir::empty());
        }

        let stored: Stored = serde_json::from_slice(bytes).map_err(|err| {
            let position = byte_offset(bytes, err.line(), err.column());
            debug!(length = bytes.len(), position, error = %err, "rejected reservoir bytes");
            ReservoirError::Decode {
                length: bytes.len(),
                position,
                reason: err.to_string(),
            }
        })?;

        self.assemble(stored, bytes.len())
    }

    /// Decode the JSON text form; an empty string is the empty reservoir
    pub fn from_json(&self, text: &str) -> Result<Reservoir> {
        self.from_bytes(text.as_bytes())
    }

    fn assemble(&self, stored: Stored, length: usize) -> Result<Reservoir> {
        let samples = stored.reservoir;
        let total_seen = stored.total_items_seen.unwrap_or(samples.len() as u64);

        let invalid = if samples.len() > stored.max_size {
            Some(format!(
                "{} samples exceed maxSize {}",
                samples.len(),
                stored.max_size
            ))
        } else if total_seen < samples.len() as u64 {
            Some(format!(
                "totalItemsSeen {} is less than the {} retained samples",
                total_seen,
                samples.len()
            ))
        } else {
            None
        };

        if let Some(reason) = invalid {
            debug!(length, %reason, "rejected reservoir fields");
            return Err(ReservoirError::Decode {
                length,
                position: length,
                reason,
            });
        }

        let reservoir = Reservoir::from_parts(stored.max_size, samples, total_seen);
        Ok(self.apply_seed(reservoir))
    }

    fn apply_seed(&self, reservoir: Reservoir) -> Reservoir {
        match self.seed {
            Some(seed) => reservoir.seeded(seed),
            None => reservoir,
        }
    }

    /// Normalize an input to a reservoir, borrowing when it already is one
    pub fn coerce<'a>(&self, input: &'a ReservoirInput) -> Result<Cow<'a, Reservoir>> {
        match input {
            ReservoirInput::Reservoir(reservoir) => Ok(Cow::Borrowed(reservoir)),
            ReservoirInput::Values(values) => Ok(Cow::Owned(self.from_values(values.clone()))),
            ReservoirInput::Absent => Ok(Cow::Owned(Reservoir::empty())),
            ReservoirInput::Map(map) => self.decode_map(map).map(Cow::Owned),
            ReservoirInput::Text(text) => self.from_json(text).map(Cow::Owned),
            ReservoirInput::Bytes(bytes) => self.from_bytes(bytes).map(Cow::Owned),
        }
    }

    /// Normalize an owned input to a reservoir
    pub fn coerce_owned(&self, input: ReservoirInput) -> Result<Reservoir> {
        match input {
            ReservoirInput::Reservoir(reservoir) => Ok(reservoir),
            ReservoirInput::Values(values) => Ok(self.from_values(values)),
            other => self.coerce(&other).map(Cow::into_owned),
        }
    }

    fn from_values(&self, values: Vec<f64>) -> Reservoir {
        self.apply_seed(Reservoir::from_values(values))
    }

    fn decode_map(&self, map: &Map<String, Value>) -> Result<Reservoir> {
        let bytes =
            serde_json::to_vec(map).map_err(|err| ReservoirError::Encode(err.to_string()))?;
        self.from_bytes(&bytes)
    }

    /// Convert a raw ingested value into something an aggregator can consume
    ///
    /// Numbers and numeric strings become [`IngestValue::Number`]; `null` is
    /// absent; everything else is coerced to a reservoir.
    pub fn extract_ingest_value(&self, raw: Value) -> Result<Option<IngestValue>> {
        match raw {
            Value::Null => Ok(None),
            Value::Number(number) => Ok(number.as_f64().map(IngestValue::Number)),
            Value::String(text) => {
                let parsed = text.trim().parse::<f64>();
                match parsed {
                    Ok(v) if v.is_finite() => Ok(Some(IngestValue::Number(v))),
                    _ => self
                        .coerce_owned(ReservoirInput::Text(text))
                        .map(|r| Some(IngestValue::Reservoir(r))),
                }
            }
            other => {
                let input = ReservoirInput::from_json(other)?;
                self.coerce_owned(input).map(|r| Some(IngestValue::Reservoir(r)))
            }
        }
    }
}

/// Translate serde_json's 1-based line/column into a byte offset
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> usize {
    let mut offset = 0;
    if line > 1 {
        let mut newlines = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                newlines += 1;
                if newlines == line - 1 {
                    offset = i + 1;
                    break;
                }
            }
        }
    }
    (offset + column.saturating_sub(1)).min(bytes.len())
}
