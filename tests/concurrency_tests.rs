//! Concurrent writers, readers, sweeps and close racing against each other.

use memtsdb::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn tags_from(pairs: &[(&str, &str)]) -> Vec<Tag> {
    pairs.iter().map(|(k, v)| Tag::new(*k, *v)).collect()
}

fn open() -> Arc<Engine<i64>> {
    Arc::new(Engine::new(Duration::ZERO).unwrap())
}

#[test]
fn test_concurrent_writers_same_series_lose_nothing() {
    let db = open();
    let num_threads = 8;
    let points_per_thread = 1_000;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for j in 0..points_per_thread {
                    let ts = (t * points_per_thread + j) as i64;
                    db.write_points(vec![Point::new(tags_from(&[("a", "b")]), ts, ts)])
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let result = db
        .query_points(&tags_from(&[("a", "b")]), i64::MIN, i64::MAX)
        .unwrap();
    let values = &result["a=b"];
    assert_eq!(values.len(), num_threads * points_per_thread);

    let mut seen: Vec<i64> = values.iter().map(|v| v.timestamp).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), num_threads * points_per_thread);
    assert_eq!(db.series_count().unwrap(), 1);
}

#[test]
fn test_concurrent_writers_racing_to_create_many_series() {
    let db = open();
    let num_threads = 8;
    let series = 200;
    let barrier = Arc::new(Barrier::new(num_threads));

    // Every thread writes to every series, so each series sees N racing first writes.
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for s in 0..series {
                    let id = s.to_string();
                    db.write_points(vec![Point::new(
                        tags_from(&[("host", id.as_str()), ("dc", "eu")]),
                        t as i64,
                        1,
                    )])
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    assert_eq!(db.series_count().unwrap(), series);
    assert_eq!(db.stored_series_count().unwrap(), series);

    let result = db
        .query_points(&tags_from(&[("dc", "eu")]), i64::MIN, i64::MAX)
        .unwrap();
    assert_eq!(result.len(), series);
    assert!(result.values().all(|v| v.len() == num_threads));
}

#[test]
fn test_writes_queries_and_sweeps_interleave() {
    let db = open();
    let iterations = 1_000i64;

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..iterations {
                db.write_points(vec![Point::new(tags_from(&[("a", "b")]), i, 100)])
                    .unwrap();
            }
        })
    };
    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..iterations {
                let result = db.query_points(&tags_from(&[("a", "b")]), i, i).unwrap();
                assert!(result.get("a=b").map_or(true, |v| v.len() <= 1));
            }
        })
    };
    let sweeper = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..iterations {
                db.remove_before(i / 2).unwrap();
            }
        })
    };

    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");
    sweeper.join().expect("sweeper panicked");

    // Nothing at or after the final cutoff may have been dropped.
    let last_cutoff = (iterations - 1) / 2;
    let result = db
        .query_points(&tags_from(&[("a", "b")]), last_cutoff, i64::MAX)
        .unwrap();
    assert_eq!(result["a=b"].len() as i64, iterations - last_cutoff);
}

#[test]
fn test_close_races_with_writers_without_deadlock() {
    let mut cfg = EngineConfig::with_retention(Duration::from_secs(60));
    cfg.retention_check_interval = Some(Duration::from_millis(1));
    let db: Arc<Engine<i64>> = Arc::new(Engine::with_config(cfg).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let id = t.to_string();
                let mut accepted = 0usize;
                for i in 0..10_000i64 {
                    match db.write_points(vec![Point::new(tags_from(&[("w", id.as_str())]), i, i)]) {
                        Ok(()) => accepted += 1,
                        Err(TsdbError::Closed) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                accepted
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    db.close();

    for w in writers {
        w.join().expect("writer panicked");
    }
    assert!(db.is_closed());
    assert_eq!(
        db.write_points(vec![Point::new(tags_from(&[("w", "0")]), 0, 0)]),
        Err(TsdbError::Closed)
    );
}
