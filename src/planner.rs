//! Query planning surface
//!
//! Turns SQL-level calls into aggregator factories and post-aggregators. Numeric
//! arguments (capacity, fractions) must be literals; anything else cannot be
//! planned and yields `Ok(None)` so the host can fall back or report it.

use crate::factory::ReservoirAggregatorFactory;
use crate::finalize::{PercentilePostAggregator, PercentilesPostAggregator, StddevPostAggregator};
use crate::reservoir::check_fraction;
use crate::{ReservoirError, Result};

/// `DR_PERCENTILE_AGG(column, maxSize)`
pub const PERCENTILE_AGG: &str = "DR_PERCENTILE_AGG";
/// `DR_GET_PERCENTILE(reservoir, fraction)`
pub const GET_PERCENTILE: &str = "DR_GET_PERCENTILE";
/// `DR_GET_PERCENTILES(reservoir, fraction, ...)`
pub const GET_PERCENTILES: &str = "DR_GET_PERCENTILES";
/// `DR_GET_STDDEV(reservoir)`
pub const GET_STDDEV: &str = "DR_GET_STDDEV";

/// An argument of a planned call
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A numeric literal
    Literal(f64),
    /// A direct reference to a column or an aggregator output
    Column(String),
    /// A computed expression the host exposes under this virtual column name
    Expression(String),
}

impl Operand {
    fn literal(&self) -> Option<f64> {
        match self {
            Operand::Literal(value) => Some(*value),
            _ => None,
        }
    }
}

/// Hands out unique post-aggregator output names: prefix plus a counter
#[derive(Debug, Clone)]
pub struct OutputNamer {
    prefix: String,
    counter: usize,
}

impl OutputNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        OutputNamer {
            prefix: prefix.into(),
            counter: 0,
        }
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.counter);
        self.counter += 1;
        name
    }
}

/// Plan `DR_PERCENTILE_AGG(input, max_size)` with output `name`
///
/// The factory's output is named `<name>:agg`. A literal input, or a non-literal
/// capacity, cannot be planned.
pub fn plan_aggregation(
    name: &str,
    input: &Operand,
    max_size: &Operand,
) -> Result<Option<ReservoirAggregatorFactory>> {
    let field_name = match input {
        Operand::Column(column) | Operand::Expression(column) => column,
        Operand::Literal(_) => return Ok(None),
    };
    let Some(size) = max_size.literal() else {
        return Ok(None);
    };
    if size.fract() != 0.0 || size < 1.0 {
        return Err(ReservoirError::InvalidConfig {
            field: "maxReservoirSize",
            reason: "must be a positive integer",
        });
    }

    ReservoirAggregatorFactory::new(format!("{}:agg", name), field_name.as_str(), size as usize)
        .map(Some)
}

fn reservoir_field(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Column(field) => Some(field.as_str()),
        _ => None,
    }
}

/// Plan `DR_GET_PERCENTILE(reservoir, fraction)`
pub fn plan_percentile(
    namer: &mut OutputNamer,
    reservoir: &Operand,
    fraction: &Operand,
) -> Result<Option<PercentilePostAggregator>> {
    let (Some(field), Some(fraction)) = (reservoir_field(reservoir), fraction.literal()) else {
        return Ok(None);
    };
    check_fraction(fraction)?;
    PercentilePostAggregator::new(namer.next_name(), field, fraction).map(Some)
}

/// Plan `DR_GET_PERCENTILES(reservoir, fraction, ...)`; needs at least one fraction
pub fn plan_percentiles(
    namer: &mut OutputNamer,
    reservoir: &Operand,
    fractions: &[Operand],
) -> Result<Option<PercentilesPostAggregator>> {
    let Some(field) = reservoir_field(reservoir) else {
        return Ok(None);
    };
    if fractions.is_empty() {
        return Ok(None);
    }

    let mut literals = Vec::with_capacity(fractions.len());
    for operand in fractions {
        match operand.literal() {
            Some(fraction) => {
                check_fraction(fraction)?;
                literals.push(fraction);
            }
            None => return Ok(None),
        }
    }
    PercentilesPostAggregator::new(namer.next_name(), field, literals).map(Some)
}

/// Plan `DR_GET_STDDEV(reservoir)`
pub fn plan_stddev(
    namer: &mut OutputNamer,
    reservoir: &Operand,
) -> Result<Option<StddevPostAggregator>> {
    match reservoir_field(reservoir) {
        Some(field) => StddevPostAggregator::new(namer.next_name(), field).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> Operand {
        Operand::Column(name.to_string())
    }

    #[test]
    fn test_plan_aggregation() {
        let factory = plan_aggregation("a0", &column("price"), &Operand::Literal(256.0))
            .unwrap()
            .unwrap();
        assert_eq!(factory.name(), "a0:agg");
        assert_eq!(factory.field_name(), "price");
        assert_eq!(factory.max_reservoir_size(), 256);

        let virtual_column = Operand::Expression("v0".to_string());
        let factory = plan_aggregation("a1", &virtual_column, &Operand::Literal(8.0))
            .unwrap()
            .unwrap();
        assert_eq!(factory.field_name(), "v0");
    }

    #[test]
    fn test_plan_aggregation_needs_literal_size() {
        assert!(plan_aggregation("a0", &column("price"), &column("n"))
            .unwrap()
            .is_none());
        assert!(plan_aggregation("a0", &Operand::Literal(1.0), &Operand::Literal(8.0))
            .unwrap()
            .is_none());
        assert!(plan_aggregation("a0", &column("price"), &Operand::Literal(0.0)).is_err());
        assert!(plan_aggregation("a0", &column("price"), &Operand::Literal(2.5)).is_err());
    }

    #[test]
    fn test_plan_percentile() {
        let mut namer = OutputNamer::new("p");
        let post = plan_percentile(&mut namer, &column("a0:agg"), &Operand::Literal(0.9))
            .unwrap()
            .unwrap();
        assert_eq!(post.name(), "p0");
        assert_eq!(post.fraction(), 0.9);

        assert!(plan_percentile(&mut namer, &column("a0:agg"), &column("f"))
            .unwrap()
            .is_none());
        assert_eq!(
            plan_percentile(&mut namer, &column("a0:agg"), &Operand::Literal(1.2)).unwrap_err(),
            ReservoirError::InvalidArgument(1.2)
        );
    }

    #[test]
    fn test_plan_percentiles() {
        let mut namer = OutputNamer::new("p");
        namer.next_name();

        let fractions = [Operand::Literal(0.1), Operand::Literal(0.5)];
        let post = plan_percentiles(&mut namer, &column("r"), &fractions)
            .unwrap()
            .unwrap();
        assert_eq!(post.name(), "p1");
        assert_eq!(post.fractions(), &[0.1, 0.5]);

        assert!(plan_percentiles(&mut namer, &column("r"), &[]).unwrap().is_none());
        let mixed = [Operand::Literal(0.1), column("x")];
        assert!(plan_percentiles(&mut namer, &column("r"), &mixed)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_plan_stddev() {
        let mut namer = OutputNamer::new("s");
        let post = plan_stddev(&mut namer, &column("r")).unwrap().unwrap();
        assert_eq!(post.name(), "s0");

        let expression = Operand::Expression("x + 1".to_string());
        assert!(plan_stddev(&mut namer, &expression).unwrap().is_none());
    }
}
