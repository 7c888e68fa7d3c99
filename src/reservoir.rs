//! Core reservoir implementation
//!
//! This module provides the bounded random sample of a numeric stream together
//! with the statistics computed over it (percentiles, mean, standard deviation).

use crate::{ReservoirError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A bounded uniform random sample of a stream of `f64` values
///
/// The reservoir keeps at most `capacity` values. Once full, each further value
/// replaces a retained one with probability `capacity / total_seen` (Algorithm R),
/// so every offered value is equally likely to be in the sample.
///
/// A reservoir with capacity 0 is the canonical empty reservoir, see [`Reservoir::empty`].
pub struct Reservoir {
    /// Maximum number of retained samples
    capacity: usize,

    /// Retained values, in no particular order
    samples: Vec<f64>,

    /// Number of values ever offered, retained or not
    total_seen: u64,

    /// Ascending copy of `samples`, dropped on every mutation
    sorted: OnceCell<Vec<f64>>,

    rng: StdRng,

    /// Bookkeeping key for [`identity_order`]
    identity: u64,
}

impl Reservoir {
    /// Create a new empty reservoir that retains up to `capacity` values
    ///
    /// The random source is seeded from the operating system.
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, Vec::with_capacity(capacity), 0, StdRng::from_entropy())
    }

    /// Create a new empty reservoir with a deterministic random source
    ///
    /// # Arguments
    /// * `capacity` - The maximum number of retained values
    /// * `seed` - Seed for the replacement draws
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, Vec::with_capacity(capacity), 0, StdRng::seed_from_u64(seed))
    }

    /// The canonical empty reservoir: capacity 0, no samples, nothing seen.
    pub fn empty() -> Self {
        Self::new(0)
    }

    /// Build a full reservoir directly from already representative values
    ///
    /// The capacity and the seen count both equal `values.len()`.
    pub fn from_values(values: Vec<f64>) -> Self {
        let count = values.len();
        Self::with_rng(count, values, count as u64, StdRng::from_entropy())
    }

    /// Reassemble a reservoir from its stored fields
    ///
    /// Callers validate `samples.len() <= capacity` and `total_seen >= samples.len()`.
    pub(crate) fn from_parts(capacity: usize, samples: Vec<f64>, total_seen: u64) -> Self {
        debug_assert!(samples.len() <= capacity);
        debug_assert!(total_seen >= samples.len() as u64);
        Self::with_rng(capacity, samples, total_seen, StdRng::from_entropy())
    }

    fn with_rng(capacity: usize, samples: Vec<f64>, total_seen: u64, rng: StdRng) -> Self {
        Reservoir {
            capacity,
            samples,
            total_seen,
            sorted: OnceCell::new(),
            rng,
            identity: next_identity(),
        }
    }

    /// Replace the random source with a deterministic one
    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Offer a value to the reservoir
    ///
    /// While the reservoir has room the value is appended. Afterwards a random
    /// index in `[0, total_seen)` is drawn and the value overwrites that slot when
    /// the index falls inside the reservoir.
    pub fn offer(&mut self, value: f64) {
        self.total_seen += 1;

        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else if self.capacity > 0 {
            let index = self.rng.gen_range(0..self.total_seen);
            if index < self.capacity as u64 {
                self.samples[index as usize] = value;
            }
        }

        self.sorted = OnceCell::new();
    }

    /// Offer every value of `values` in order
    pub fn add_all(&mut self, values: &[f64]) {
        for &value in values {
            self.offer(value);
        }
    }

    /// Merge another reservoir into this one
    ///
    /// Every retained value of `other` is offered as if it were observed once at
    /// merge time. This undercounts what `other` had already sampled away; the
    /// approximation is intentional.
    ///
    /// A reservoir that has never seen a value is the merge identity: it adopts
    /// the samples and seen count of `other` when they fit (a zero-capacity
    /// reservoir also adopts the capacity of `other`).
    ///
    /// # Returns
    /// `self`, for chaining
    pub fn merge(&mut self, other: &Reservoir) -> &mut Self {
        if other.total_seen == 0 {
            return self;
        }

        if self.total_seen == 0 && (self.capacity == 0 || other.samples.len() <= self.capacity) {
            if self.capacity == 0 {
                self.capacity = other.capacity;
            }
            self.samples.clear();
            self.samples.extend_from_slice(&other.samples);
            self.total_seen = other.total_seen;
            self.sorted = OnceCell::new();
            return self;
        }

        self.add_all(&other.samples);
        self
    }

    /// Merge an optional reservoir; `None` leaves `self` unchanged
    pub fn merge_opt(&mut self, other: Option<&Reservoir>) -> &mut Self {
        match other {
            Some(other) => self.merge(other),
            None => self,
        }
    }

    /// Maximum number of retained samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values ever offered
    pub fn total_seen(&self) -> u64 {
        self.total_seen
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if no samples are retained
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The retained samples in storage order
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// The retained samples in ascending order
    ///
    /// The sorted copy is cached until the next `offer` or `merge`. The borrow
    /// keeps the reservoir from being mutated while the slice is alive.
    pub fn sorted_values(&self) -> &[f64] {
        self.sorted.get_or_init(|| {
            let mut sorted = self.samples.clone();
            sorted.sort_unstable_by(f64::total_cmp);
            sorted
        })
    }

    /// Get the value at the given fraction of the sample
    ///
    /// Linearly interpolates between the two closest ranks of the sorted sample.
    ///
    /// # Arguments
    /// * `fraction` - The percentile as a fraction in `[0, 1]`
    ///
    /// # Returns
    /// The estimate, or `NaN` when no samples are retained
    pub fn percentile(&self, fraction: f64) -> Result<f64> {
        check_fraction(fraction)?;
        Ok(interpolate(self.sorted_values(), fraction))
    }

    /// Get values for several fractions, sorting the sample once
    pub fn percentiles(&self, fractions: &[f64]) -> Result<Vec<f64>> {
        let sorted = self.sorted_values();
        fractions
            .iter()
            .map(|&fraction| {
                check_fraction(fraction)?;
                Ok(interpolate(sorted, fraction))
            })
            .collect()
    }

    /// Arithmetic mean of the retained samples, `NaN` when there are none
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Bias-corrected standard deviation of the retained samples
    ///
    /// Fewer than two samples give `NaN`.
    pub fn stddev(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return f64::NAN;
        }

        let mean = self.mean();
        let squares: f64 = self.samples.iter().map(|v| (v - mean) * (v - mean)).sum();
        (squares / (n - 1) as f64).sqrt()
    }
}

/// Reject fractions outside `[0, 1]`, including `NaN`
pub(crate) fn check_fraction(fraction: f64) -> Result<()> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(ReservoirError::InvalidArgument(fraction))
    }
}

fn interpolate(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }

    let rank = fraction * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        return sorted[lower];
    }

    let weight = rank - lower as f64;
    sorted[lower] + weight * (sorted[upper] - sorted[lower])
}

/// Stable bookkeeping order over reservoirs, `None` first
///
/// This compares instance identities assigned at construction, not contents. It
/// exists for hosts that need a total order over opaque values (cache keys,
/// sorted maps) and carries no statistical meaning.
pub fn identity_order(a: Option<&Reservoir>, b: Option<&Reservoir>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.identity.cmp(&b.identity),
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for Reservoir {
    fn clone(&self) -> Self {
        Reservoir {
            capacity: self.capacity,
            samples: self.samples.clone(),
            total_seen: self.total_seen,
            sorted: self.sorted.clone(),
            rng: self.rng.clone(),
            identity: next_identity(),
        }
    }
}

impl fmt::Debug for Reservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservoir")
            .field("capacity", &self.capacity)
            .field("total_seen", &self.total_seen)
            .field("sorted_cached", &self.sorted.get().is_some())
            .field("samples", &self.samples)
            .finish()
    }
}
