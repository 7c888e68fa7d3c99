//! Single-stream aggregation
//!
//! The host exposes the column being scanned through a [`ColumnSelector`]; an
//! [`Aggregator`] reads the current value each time the host advances the cursor.

use crate::reservoir::Reservoir;

/// The value under a column cursor
#[derive(Debug, Clone, Copy)]
pub enum RowValue<'a> {
    /// A raw number, offered to the reservoir
    Number(f64),
    /// A reservoir built upstream, merged into the reservoir
    Reservoir(&'a Reservoir),
}

/// Cursor over the input column, owned and advanced by the host
pub trait ColumnSelector {
    /// The current value, or `None` when the row has no value
    fn current(&self) -> Option<RowValue<'_>>;
}

impl<S: ColumnSelector + ?Sized> ColumnSelector for Box<S> {
    fn current(&self) -> Option<RowValue<'_>> {
        (**self).current()
    }
}

/// Feed one cursor value into a reservoir
pub(crate) fn absorb(reservoir: &mut Reservoir, value: Option<RowValue<'_>>) {
    match value {
        Some(RowValue::Number(v)) => reservoir.offer(v),
        Some(RowValue::Reservoir(other)) => {
            reservoir.merge(other);
        }
        None => {}
    }
}

/// Trait for aggregators that own a single reservoir
///
/// Implementations are single-writer: the host never calls `aggregate`
/// concurrently on one instance.
pub trait Aggregator {
    /// Consume the value currently under the cursor
    fn aggregate(&mut self);

    /// The reservoir built so far; may be called repeatedly
    fn get(&self) -> &Reservoir;

    /// Release resources at the end of the scan
    fn close(&mut self);
}

/// Aggregator building one reservoir from a column cursor
#[derive(Debug)]
pub struct BuildAggregator<S> {
    selector: S,
    reservoir: Reservoir,
}

impl<S: ColumnSelector> BuildAggregator<S> {
    /// Create an aggregator retaining up to `capacity` values
    pub fn new(selector: S, capacity: usize) -> Self {
        Self::with_reservoir(selector, Reservoir::new(capacity))
    }

    /// Create an aggregator that fills a caller-supplied reservoir
    pub fn with_reservoir(selector: S, reservoir: Reservoir) -> Self {
        BuildAggregator { selector, reservoir }
    }

    /// Take the built reservoir
    pub fn into_reservoir(self) -> Reservoir {
        self.reservoir
    }
}

impl<S: ColumnSelector> Aggregator for BuildAggregator<S> {
    fn aggregate(&mut self) {
        absorb(&mut self.reservoir, self.selector.current());
    }

    fn get(&self) -> &Reservoir {
        &self.reservoir
    }

    fn close(&mut self) {}
}

/// Aggregator for a column that does not exist; always yields the empty reservoir
#[derive(Debug, Default)]
pub struct NoopAggregator {
    empty: Reservoir,
}

impl NoopAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for NoopAggregator {
    fn aggregate(&mut self) {}

    fn get(&self) -> &Reservoir {
        &self.empty
    }

    fn close(&mut self) {}
}
