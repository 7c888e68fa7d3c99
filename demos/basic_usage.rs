use reservoir_percentiles::finalize::{PercentilesPostAggregator, Row};
use reservoir_percentiles::{Reservoir, ReservoirAggregatorFactory, ReservoirCodec, ReservoirInput};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Create a reservoir that keeps up to 256 samples
    let mut reservoir = Reservoir::new(256);

    // Add some values
    for i in 1..=1000 {
        reservoir.offer(i as f64);
    }

    // Get some percentiles
    println!("Total seen: {}", reservoir.total_seen());
    println!("Retained: {}", reservoir.len());
    println!("Median (50th percentile): {:.2}", reservoir.percentile(0.5)?);
    println!("90th percentile: {:.2}", reservoir.percentile(0.9)?);
    println!("99th percentile: {:.2}", reservoir.percentile(0.99)?);
    println!("Std dev: {:.2}", reservoir.stddev());

    // Partial results travel as bytes and are combined by the factory
    let factory = ReservoirAggregatorFactory::new("latency", "latency_ms", 256)?;
    let codec = ReservoirCodec::new();

    let mut other = Reservoir::new(256);
    for i in 1001..=2000 {
        other.offer(i as f64);
    }

    let combined = factory.combine(
        &codec,
        ReservoirInput::Bytes(codec.to_bytes(&reservoir)?),
        ReservoirInput::Bytes(codec.to_bytes(&other)?),
    )?;

    let mut row = Row::new();
    row.insert(factory.name().to_string(), combined.into());
    let post = PercentilesPostAggregator::new("p", factory.name(), vec![0.0, 0.5, 1.0])?;

    println!("\nAfter combining:");
    println!("Min / median / max: {:?}", post.compute(&row, &codec)?);
    println!("Stored spec: {}", serde_json::to_string(&factory)?);

    Ok(())
}
