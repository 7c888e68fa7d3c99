//! Segment scan -> partial reservoirs -> storage -> combine -> finalize

use reservoir_percentiles::finalize::{PercentilesPostAggregator, Row, StddevPostAggregator};
use reservoir_percentiles::{
    BufferAggregator, ColumnSelector, RegionId, Reservoir, ReservoirAggregatorFactory,
    ReservoirCodec, ReservoirInput, RowValue,
};
use std::cell::Cell;
use std::rc::Rc;

struct Column {
    values: Vec<Option<f64>>,
    row: Rc<Cell<usize>>,
}

impl ColumnSelector for Column {
    fn current(&self) -> Option<RowValue<'_>> {
        self.values[self.row.get()].map(RowValue::Number)
    }
}

fn column(values: Vec<Option<f64>>) -> (Column, Rc<Cell<usize>>) {
    let row = Rc::new(Cell::new(0));
    (
        Column {
            values,
            row: Rc::clone(&row),
        },
        row,
    )
}

#[test]
fn grouped_scan_with_compaction() {
    let factory = ReservoirAggregatorFactory::new("latency", "latency_ms", 64).unwrap();
    let codec = ReservoirCodec::with_seed(17);

    // Two groups interleaved: even rows belong to group 0, odd rows to group 1.
    let values: Vec<Option<f64>> = (0..40)
        .map(|i| if i % 10 == 9 { None } else { Some(i as f64) })
        .collect();
    let (selector, row) = column(values.clone());
    let mut agg = factory.factorize_buffered(Some(selector));

    let first = RegionId::new(1);
    let second = RegionId::new(2);
    let stride = factory.max_intermediate_size();
    agg.init(first, 0);
    agg.init(first, stride);

    for i in 0..20 {
        row.set(i);
        agg.aggregate(first, (i % 2) * stride);
    }

    // The host compacts: both slots move to a new region in swapped order.
    let before = agg.get(first, 0).sorted_values().to_vec();
    agg.relocate(first, 0, second, stride);
    agg.relocate(first, stride, second, 0);
    assert_eq!(agg.get(second, stride).sorted_values(), before.as_slice());

    for i in 20..40 {
        row.set(i);
        let offset = if i % 2 == 0 { stride } else { 0 };
        agg.aggregate(second, offset);
    }

    let even = agg.get(second, stride);
    let odd = agg.get(second, 0);
    assert_eq!(even.total_seen(), 20);
    assert_eq!(odd.total_seen(), 16);
    assert!(even.sorted_values().iter().all(|v| *v as i64 % 2 == 0));

    // Partial results leave the aggregator as bytes and are merged downstream.
    let even_bytes = codec.to_bytes(even).unwrap();
    let odd_bytes = codec.to_bytes(odd).unwrap();
    agg.close();

    let combined = factory
        .combining_factory()
        .combine(
            &codec,
            ReservoirInput::Bytes(even_bytes),
            ReservoirInput::Bytes(odd_bytes),
        )
        .unwrap()
        .unwrap();
    assert_eq!(combined.len(), 36);

    let expected: Vec<f64> = values.iter().flatten().copied().collect();
    let mut row = Row::new();
    row.insert("latency".to_string(), combined.into());

    let percentiles = PercentilesPostAggregator::new("p", "latency", vec![0.0, 1.0])
        .unwrap()
        .compute(&row, &codec)
        .unwrap();
    assert_eq!(percentiles, vec![0.0, 38.0]);

    let stddev = StddevPostAggregator::new("sd", "latency")
        .unwrap()
        .compute(&row, &codec)
        .unwrap();
    assert!((stddev - Reservoir::from_values(expected).stddev()).abs() < 1e-9);
}

#[test]
fn combiner_over_stored_partials() {
    let factory = ReservoirAggregatorFactory::new("r", "x", 1000).unwrap();
    let codec = ReservoirCodec::new();

    let partials: Vec<Vec<u8>> = (0..4)
        .map(|segment| {
            let mut reservoir = Reservoir::with_seed(1000, segment);
            for i in 0..100 {
                reservoir.offer((segment * 100 + i) as f64);
            }
            codec.to_bytes(&reservoir).unwrap()
        })
        .collect();

    let mut combiner = factory.make_combiner();
    for bytes in &partials {
        let partial = codec.from_bytes(bytes).unwrap();
        combiner.fold(Some(&partial));
    }
    combiner.fold(None);

    let combined = combiner.get().unwrap();
    assert_eq!(combined.total_seen(), 400);
    assert_eq!(combined.percentile(0.0).unwrap(), 0.0);
    assert_eq!(combined.percentile(1.0).unwrap(), 399.0);
    assert!((combined.percentile(0.5).unwrap() - 199.5).abs() < 1e-9);
}

#[test]
fn factory_from_query_spec() {
    let spec = r#"{"type": "doublesReservoir", "name": "p", "fieldName": "value", "maxReservoirSize": 16}"#;
    let factory: ReservoirAggregatorFactory = serde_json::from_str(spec).unwrap();

    let (selector, row) = column(vec![Some(2.0), Some(1.0), None, Some(3.0)]);
    let mut agg = factory.factorize(Some(selector));
    for i in 0..4 {
        row.set(i);
        agg.aggregate();
    }

    assert_eq!(agg.get().sorted_values(), &[1.0, 2.0, 3.0]);
    assert_eq!(agg.get().capacity(), 16);
}
