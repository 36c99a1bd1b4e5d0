//! An embeddable, in-memory time-series storage engine.
//!
//! Points carry a set of `key=value` tags, a nanosecond timestamp and a scalar field.
//! Points with the same tag set form a series. The [`Engine`] indexes series by tag,
//! stores their values in hash-partitioned, lock-striped partitions, answers
//! tag-equality + time-window queries, and drops values older than the retention
//! horizon from a background thread.
//!
//! ```rust,ignore
//! use memtsdb::{Engine, Point, Tag};
//! use std::time::Duration;
//!
//! let db: Engine<i64> = Engine::new(Duration::from_secs(3600))?;
//! db.write_points(vec![Point::new(vec![Tag::new("cpu", "#0")], 100, 42)])?;
//! let result = db.query_points(&[Tag::new("cpu", "#0")], 0, 200)?;
//! assert_eq!(result["cpu=#0"][0].value, 42);
//! db.close();
//! ```

// Declare modules
pub mod engine;
pub mod error;
pub mod index;
pub mod settings;
pub mod storage;
pub mod telemetry;
pub mod types;

/// Main entry point: the storage engine.
pub use crate::engine::Engine;
/// Configuration options for the engine.
pub use crate::engine::EngineConfig;
/// Query output keyed by series identifier.
pub use crate::engine::QueryResult;
/// Error type and result alias for engine operations.
pub use crate::error::{Result, TsdbError};
/// Tag -> series inverted index.
pub use crate::index::SeriesIndex;
/// Layered file/env configuration loading.
pub use crate::settings::{load_config, EngineFileConfig};
/// Storage building blocks and sweep statistics.
pub use crate::storage::{Entry, Partition, Shard, SweepStats, DEFAULT_PARTITION_COUNT};
/// Structured event hook for observability.
pub use crate::telemetry::{EngineEvent, EngineEventListener};
/// Point model.
pub use crate::types::{Point, SeriesId, Tag, Timestamp, Value};
