use proptest::prelude::*;
use reservoir_percentiles::{Reservoir, ReservoirCodec};

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Retained count is min(capacity, offers); every offer is counted
    #[test]
    fn test_size_bounded_by_capacity(
        capacity in 1usize..64,
        values in prop::collection::vec(-1e6f64..1e6, 0..300),
        seed in any::<u64>(),
    ) {
        let mut reservoir = Reservoir::with_seed(capacity, seed);
        reservoir.add_all(&values);

        prop_assert_eq!(reservoir.len(), capacity.min(values.len()));
        prop_assert_eq!(reservoir.total_seen(), values.len() as u64);
        prop_assert!(reservoir.samples().iter().all(|v| values.contains(v)));
    }

    /// Below capacity nothing is dropped
    #[test]
    fn test_under_capacity_keeps_all(values in prop::collection::vec(-1e6f64..1e6, 0..50)) {
        let mut reservoir = Reservoir::new(50);
        reservoir.add_all(&values);

        let expected = sorted(values);
        prop_assert_eq!(reservoir.sorted_values(), expected.as_slice());
    }

    /// The extreme fractions hit the extremes, and percentiles are monotone
    #[test]
    fn test_percentile_bounds(
        values in prop::collection::vec(-1e6f64..1e6, 1..100),
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        let reservoir = Reservoir::from_values(values.clone());
        let sorted = sorted(values);

        prop_assert_eq!(reservoir.percentile(0.0).unwrap(), sorted[0]);
        prop_assert_eq!(reservoir.percentile(1.0).unwrap(), sorted[sorted.len() - 1]);

        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(reservoir.percentile(lo).unwrap() <= reservoir.percentile(hi).unwrap() + 1e-6);

        let batch = reservoir.percentiles(&[lo, hi]).unwrap();
        prop_assert_eq!(batch[0], reservoir.percentile(lo).unwrap());
        prop_assert_eq!(batch[1], reservoir.percentile(hi).unwrap());
    }

    #[test]
    fn test_fraction_out_of_range(fraction in prop_oneof![-1e3f64..-1e-9, 1.0f64 + 1e-9..1e3]) {
        prop_assert!(Reservoir::from_values(vec![1.0]).percentile(fraction).is_err());
        prop_assert!(Reservoir::new(3).percentile(fraction).is_err());
    }

    /// Encoding preserves capacity, seen count and the exact bits of every sample
    #[test]
    fn test_bytes_round_trip(
        capacity in 0usize..32,
        values in prop::collection::vec(
            prop::num::f64::NORMAL
                | prop::num::f64::SUBNORMAL
                | prop::num::f64::INFINITE
                | prop::num::f64::ZERO,
            0..100,
        ),
        seed in any::<u64>(),
    ) {
        let mut reservoir = Reservoir::with_seed(capacity, seed);
        reservoir.add_all(&values);

        let codec = ReservoirCodec::new();
        let decoded = codec.from_bytes(&codec.to_bytes(&reservoir).unwrap()).unwrap();

        prop_assert_eq!(decoded.capacity(), reservoir.capacity());
        prop_assert_eq!(decoded.total_seen(), reservoir.total_seen());
        prop_assert_eq!(bits(decoded.sorted_values()), bits(reservoir.sorted_values()));
    }

    /// Merging into an empty reservoir is the same as the other operand alone
    #[test]
    fn test_empty_is_merge_identity(
        capacity in 1usize..32,
        values in prop::collection::vec(-1e6f64..1e6, 0..100),
    ) {
        let mut other = Reservoir::with_seed(capacity, 5);
        other.add_all(&values);

        let mut empty = Reservoir::empty();
        empty.merge(&other);
        prop_assert_eq!(empty.total_seen(), other.total_seen());
        prop_assert_eq!(empty.sorted_values(), other.sorted_values());

        let mut fresh = Reservoir::new(capacity);
        fresh.merge(&other);
        prop_assert_eq!(fresh.total_seen(), other.total_seen());
        prop_assert_eq!(fresh.sorted_values(), other.sorted_values());
    }
}
