//! Engine: composes the series index and the partitioned store, exposes write/query/close,
//! and owns the background retention thread.

use crate::error::TsdbError;
use crate::index::SeriesIndex;
use crate::storage::{Shard, SweepStats, DEFAULT_PARTITION_COUNT};
use crate::telemetry::{engine_metrics, noop_event_listener, EngineEvent, EngineEventListener};
use crate::types::{duration_nanos, now_nanos, Point, SeriesId, Tag, Timestamp, Value};

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Query output: series identifier -> values in `[min, max]`, in arrival order.
pub type QueryResult<T> = HashMap<SeriesId, Vec<Value<T>>>;

/// Commands sent to the background retention thread.
#[derive(Debug)]
enum RetentionCommand {
    Shutdown,
}

/// Configuration options for the [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retention horizon. Values older than `now - retention` are dropped by the sweep.
    /// `None` disables the retention thread.
    pub retention: Option<Duration>,
    /// Sweep period. Defaults to the retention horizon itself.
    pub retention_check_interval: Option<Duration>,
    /// Number of partitions series are striped across.
    pub partition_count: usize,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn EngineEventListener>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retention: None,
            retention_check_interval: None,
            partition_count: DEFAULT_PARTITION_COUNT,
            event_listener: noop_event_listener(),
        }
    }
}

impl EngineConfig {
    /// Default configuration with the given retention horizon; zero disables retention.
    pub fn with_retention(retention: Duration) -> Self {
        EngineConfig {
            retention: (!retention.is_zero()).then_some(retention),
            ..Default::default()
        }
    }

    /// Effective sweep period, if retention is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.retention
            .map(|retention| self.retention_check_interval.unwrap_or(retention))
    }

    pub fn validate(&self) -> Result<(), TsdbError> {
        if self.partition_count == 0 {
            return Err(TsdbError::Config("partition_count must be at least 1".to_string()));
        }
        if self.retention.is_some_and(|d| d.is_zero()) {
            return Err(TsdbError::Config("retention must be non-zero".to_string()));
        }
        if self.retention_check_interval.is_some_and(|d| d.is_zero()) {
            return Err(TsdbError::Config(
                "retention_check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RetentionTask {
    cmd_tx: mpsc::Sender<RetentionCommand>,
    handle: JoinHandle<()>,
}

/// The in-memory time-series engine, generic over the stored scalar `T`.
///
/// Lifecycle is one-way: open until [`Engine::close`] (or drop), closed afterwards.
#[derive(Debug)]
pub struct Engine<T> {
    index: Arc<SeriesIndex>,
    shard: Arc<Shard<T>>,
    closed: AtomicBool,
    retention_task: Mutex<Option<RetentionTask>>,
    config: EngineConfig,
}

impl<T: Clone + Send + Sync + 'static> Engine<T> {
    /// Creates an engine with default settings and the given retention horizon.
    /// A zero horizon disables the retention sweep.
    pub fn new(retention: Duration) -> Result<Self, TsdbError> {
        Self::with_config(EngineConfig::with_retention(retention))
    }

    /// Creates an engine from `config` and, when retention is enabled, spawns the
    /// background retention thread.
    ///
    /// # Errors
    /// Returns `TsdbError::Config` for an invalid configuration and
    /// `TsdbError::BackgroundTask` if the retention thread cannot be spawned.
    pub fn with_config(config: EngineConfig) -> Result<Self, TsdbError> {
        config.validate()?;

        let index = Arc::new(SeriesIndex::new());
        let shard = Arc::new(Shard::new(config.partition_count));

        let retention_task = match (config.retention, config.sweep_interval()) {
            (Some(retention), Some(interval)) => Some(Self::spawn_retention_task(
                Arc::clone(&shard),
                Arc::clone(&config.event_listener),
                retention,
                interval,
            )?),
            _ => None,
        };

        Ok(Self {
            index,
            shard,
            closed: AtomicBool::new(false),
            retention_task: Mutex::new(retention_task),
            config,
        })
    }

    fn spawn_retention_task(
        shard: Arc<Shard<T>>,
        events: Arc<dyn EngineEventListener>,
        retention: Duration,
        interval: Duration,
    ) -> Result<RetentionTask, TsdbError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<RetentionCommand>();

        let handle = thread::Builder::new()
            .name("memtsdb-retention".to_string())
            .spawn(move || {
                events.on_event(EngineEvent::RetentionTaskStarted);
                loop {
                    match cmd_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let cutoff = now_nanos().saturating_sub(duration_nanos(retention));
                            // Failures are reported through the listener; the next tick retries.
                            let _ = sweep(&shard, events.as_ref(), cutoff);
                        }
                        Ok(RetentionCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            break
                        }
                    }
                }
                events.on_event(EngineEvent::RetentionTaskStopping);
            })
            .map_err(|e| {
                TsdbError::BackgroundTask(format!("Failed to spawn retention thread: {}", e))
            })?;

        Ok(RetentionTask { cmd_tx, handle })
    }

    /// Writes a batch of points.
    ///
    /// Every point is validated before anything is stored: if any point has no tags the
    /// whole call fails with `TsdbError::MissingTag` and nothing is written. New series are
    /// registered in the index before their values reach storage.
    ///
    /// # Errors
    /// `TsdbError::Closed` after [`Engine::close`]; `TsdbError::MissingTag` as above.
    pub fn write_points(&self, points: impl IntoIterator<Item = Point<T>>) -> Result<(), TsdbError> {
        if self.is_closed() {
            return Err(TsdbError::Closed);
        }

        let mut series_tags: HashMap<SeriesId, Vec<Tag>> = HashMap::new();
        let mut batch: HashMap<SeriesId, Vec<Value<T>>> = HashMap::new();
        let mut accepted = 0u64;

        for point in points {
            let series = point.series_id();
            if series.is_empty() {
                return Err(TsdbError::MissingTag);
            }
            let (tags, value) = point.into_parts();
            series_tags.entry(series.clone()).or_insert(tags);
            batch.entry(series).or_default().push(value);
            accepted += 1;
        }

        if batch.is_empty() {
            return Ok(());
        }

        let created = self.index.register_series_if_absent(&series_tags)?;
        if created > 0 {
            engine_metrics::record_series_created(created as u64);
            self.config
                .event_listener
                .on_event(EngineEvent::SeriesCreated { count: created });
        }

        self.shard.write_multi(batch)?;
        engine_metrics::record_points_written(accepted);
        Ok(())
    }

    /// Returns, for every series carrying all of `tags`, its values with
    /// `min <= timestamp <= max`. Series with no value in the window are omitted.
    ///
    /// Queries are still served after close, from whatever data remains.
    pub fn query_points(
        &self,
        tags: &[Tag],
        min: Timestamp,
        max: Timestamp,
    ) -> Result<QueryResult<T>, TsdbError> {
        if min > max {
            return Ok(QueryResult::new());
        }

        let candidates = self.index.find_series(tags)?;
        let shard = &self.shard;
        let fetched = candidates
            .into_par_iter()
            .map(|series| -> Result<(SeriesId, Vec<Value<T>>), TsdbError> {
                let values = shard.values_between(&series, min, max)?;
                Ok((series, values))
            })
            .collect::<Result<Vec<_>, TsdbError>>()?;

        Ok(fetched
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .collect())
    }

    /// Runs one retention sweep now with cutoff `now - retention`.
    /// Returns empty stats when retention is disabled.
    ///
    /// # Errors
    /// `TsdbError::Closed` after [`Engine::close`].
    pub fn enforce_retention(&self) -> Result<SweepStats, TsdbError> {
        if self.is_closed() {
            return Err(TsdbError::Closed);
        }
        match self.config.retention {
            Some(retention) => {
                self.remove_before(now_nanos().saturating_sub(duration_nanos(retention)))
            }
            None => Ok(SweepStats::default()),
        }
    }

    /// Drops every value older than `cutoff` and unlinks entries that stayed empty
    /// since the previous sweep.
    ///
    /// # Errors
    /// `TsdbError::Closed` after [`Engine::close`]; data left at close stays queryable.
    pub fn remove_before(&self, cutoff: Timestamp) -> Result<SweepStats, TsdbError> {
        if self.is_closed() {
            return Err(TsdbError::Closed);
        }
        sweep(&self.shard, self.config.event_listener.as_ref(), cutoff)
    }

    /// Number of series registered in the index (including ones whose data expired).
    pub fn series_count(&self) -> Result<usize, TsdbError> {
        self.index.series_count()
    }

    /// Number of series currently holding an entry in storage.
    pub fn stored_series_count(&self) -> Result<usize, TsdbError> {
        self.shard.series_count()
    }
}

impl<T> Engine<T> {
    /// Stops the retention thread and marks the engine closed. Later writes and sweeps
    /// fail with `TsdbError::Closed`. Calling it again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let task = self
            .retention_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            // The thread may already be gone; joining below is what matters.
            let _ = task.cmd_tx.send(RetentionCommand::Shutdown);
            if task.handle.join().is_err() {
                self.config
                    .event_listener
                    .on_event(EngineEvent::RetentionTaskPanicked);
            }
        }
        self.config.event_listener.on_event(EngineEvent::EngineClosed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<T> Drop for Engine<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn sweep<T: Clone + Send + Sync>(
    shard: &Shard<T>,
    events: &dyn EngineEventListener,
    cutoff: Timestamp,
) -> Result<SweepStats, TsdbError> {
    let started = Instant::now();
    match shard.remove_before(cutoff) {
        Ok(stats) => {
            engine_metrics::record_sweep(
                started.elapsed(),
                stats.values_removed as u64,
                stats.entries_evicted as u64,
            );
            events.on_event(EngineEvent::RetentionSweepCompleted {
                cutoff,
                values_removed: stats.values_removed,
                entries_evicted: stats.entries_evicted,
            });
            Ok(stats)
        }
        Err(e) => {
            events.on_event(EngineEvent::RetentionSweepFailed {
                cutoff,
                error: e.to_string(),
            });
            Err(e)
        }
    }
}
