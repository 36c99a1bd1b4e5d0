use memtsdb::telemetry::{EngineEvent, EngineEventListener};
use memtsdb::types::now_nanos;
use memtsdb::{Engine, EngineConfig, Point, Tag, TsdbError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Forwards engine events to stdout so the demo can show the sweep happening.
#[derive(Debug)]
struct PrintListener;

impl EngineEventListener for PrintListener {
    fn on_event(&self, event: EngineEvent) {
        println!("  event: {:?}", event);
    }
}

fn main() -> Result<(), TsdbError> {
    let config = EngineConfig {
        retention: Some(Duration::from_secs(2)),
        retention_check_interval: Some(Duration::from_millis(500)),
        event_listener: Arc::new(PrintListener),
        ..EngineConfig::default()
    };
    let db: Engine<f64> = Engine::with_config(config)?;

    println!("Writing 100 points across 5 hosts...");
    let start = now_nanos();
    let points = (0..100).map(|i| {
        let tags = vec![
            Tag::new("host", format!("server{}", i % 5)),
            Tag::new("region", if i % 2 == 0 { "west" } else { "east" }),
        ];
        Point::new(tags, start + i * 1_000_000, i as f64 / 10.0).with_measurement("cpu_usage")
    });
    db.write_points(points)?;

    let filter = [Tag::new("region", "west")];
    let result = db.query_points(&filter, start, i64::MAX)?;
    println!("region=west matched {} series:", result.len());
    for (series, values) in &result {
        println!("  {} -> {} values", series, values.len());
    }

    println!("Waiting for the retention horizon to pass...");
    thread::sleep(Duration::from_secs(4));

    let result = db.query_points(&filter, start, i64::MAX)?;
    println!("region=west after retention: {} series with data", result.len());
    println!("series still indexed: {}", db.series_count()?);

    db.close();
    match db.write_points(vec![Point::new(vec![Tag::new("host", "late")], now_nanos(), 1.0)]) {
        Err(TsdbError::Closed) => println!("write after close rejected as expected"),
        other => println!("unexpected result after close: {:?}", other),
    }
    Ok(())
}
