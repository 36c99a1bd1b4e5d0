use std::sync::Arc;

use crate::types::Timestamp;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
pub trait EngineEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: EngineEvent);
}

/// Structured events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    RetentionTaskStarted,
    RetentionTaskStopping,
    RetentionTaskPanicked,

    RetentionSweepCompleted {
        cutoff: Timestamp,
        values_removed: usize,
        entries_evicted: usize,
    },
    RetentionSweepFailed { cutoff: Timestamp, error: String },

    SeriesCreated { count: usize },

    EngineClosed,
}

#[derive(Debug)]
pub struct NoopEventListener;

impl EngineEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: EngineEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn EngineEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Emitting is effectively a no-op until a recorder is installed. With the `prometheus`
/// feature, [`engine_metrics::InProcessPrometheus`] installs one that can be scraped
/// in-process.
pub mod engine_metrics {
    use ::metrics::{describe_counter, describe_histogram, Unit};
    use std::time::Duration;

    #[cfg(feature = "prometheus")]
    pub use self::prometheus::InProcessPrometheus;

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const POINTS_WRITTEN: &str = "memtsdb_points_written";
    pub const SERIES_CREATED: &str = "memtsdb_series_created";
    pub const VALUES_EXPIRED: &str = "memtsdb_values_expired";
    pub const ENTRIES_EVICTED: &str = "memtsdb_entries_evicted";
    pub const SWEEP_DURATION_SECONDS: &str = "memtsdb_retention_sweep_duration_seconds";

    #[cfg(feature = "prometheus")]
    mod prometheus {
        use crate::error::TsdbError;
        use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
        use std::fmt;
        use std::sync::mpsc::{self, RecvTimeoutError};
        use std::thread::{self, JoinHandle};
        use std::time::Duration;

        struct Upkeep {
            stop_tx: mpsc::Sender<()>,
            thread: JoinHandle<()>,
        }

        /// Process-global Prometheus recorder that is scraped in-process with
        /// [`InProcessPrometheus::render`]. No HTTP listener is started.
        ///
        /// Histograms are drained by an upkeep thread every `upkeep_interval`; dropping the
        /// handle disconnects its channel and joins it.
        pub struct InProcessPrometheus {
            handle: PrometheusHandle,
            upkeep: Option<Upkeep>,
        }

        impl InProcessPrometheus {
            /// Installs the recorder. Only one recorder can exist per process; a second
            /// call fails with `TsdbError::Metrics`.
            pub fn install(upkeep_interval: Duration) -> Result<Self, TsdbError> {
                super::describe_all();

                let handle = PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| match e {
                        BuildError::FailedToSetGlobalRecorder(_) => {
                            TsdbError::Metrics("recorder already installed".to_string())
                        }
                        other => TsdbError::Metrics(other.to_string()),
                    })?;

                let (stop_tx, stop_rx) = mpsc::channel::<()>();
                let upkeep_handle = handle.clone();
                let thread = thread::Builder::new()
                    .name("memtsdb-metrics-upkeep".to_string())
                    .spawn(move || {
                        // Runs until the handle is dropped and the sender disconnects.
                        while let Err(RecvTimeoutError::Timeout) =
                            stop_rx.recv_timeout(upkeep_interval)
                        {
                            upkeep_handle.run_upkeep();
                        }
                    })
                    .map_err(|e| {
                        TsdbError::BackgroundTask(format!(
                            "Failed to spawn metrics upkeep thread: {}",
                            e
                        ))
                    })?;

                Ok(Self {
                    handle,
                    upkeep: Some(Upkeep { stop_tx, thread }),
                })
            }

            /// Current metrics in the Prometheus text exposition format.
            pub fn render(&self) -> String {
                self.handle.render()
            }
        }

        impl fmt::Debug for InProcessPrometheus {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct("InProcessPrometheus")
                    .field("upkeep_running", &self.upkeep.is_some())
                    .finish_non_exhaustive()
            }
        }

        impl Drop for InProcessPrometheus {
            fn drop(&mut self) {
                if let Some(Upkeep { stop_tx, thread }) = self.upkeep.take() {
                    drop(stop_tx);
                    let _ = thread.join();
                }
            }
        }
    }

    #[inline]
    pub fn record_points_written(points: u64) {
        if points > 0 {
            ::metrics::counter!(POINTS_WRITTEN).increment(points);
        }
    }

    #[inline]
    pub fn record_series_created(series: u64) {
        if series > 0 {
            ::metrics::counter!(SERIES_CREATED).increment(series);
        }
    }

    #[inline]
    pub fn record_sweep(duration: Duration, values_expired: u64, entries_evicted: u64) {
        ::metrics::histogram!(SWEEP_DURATION_SECONDS).record(duration.as_secs_f64());
        if values_expired > 0 {
            ::metrics::counter!(VALUES_EXPIRED).increment(values_expired);
        }
        if entries_evicted > 0 {
            ::metrics::counter!(ENTRIES_EVICTED).increment(entries_evicted);
        }
    }

    /// Registers descriptions for every engine metric with the installed recorder.
    pub fn describe_all() {
        describe_counter!(
            POINTS_WRITTEN,
            Unit::Count,
            "Total number of points accepted by Engine::write_points."
        );
        describe_counter!(
            SERIES_CREATED,
            Unit::Count,
            "Total number of series registered in the tag index."
        );
        describe_counter!(
            VALUES_EXPIRED,
            Unit::Count,
            "Total number of values dropped by retention sweeps."
        );
        describe_counter!(
            ENTRIES_EVICTED,
            Unit::Count,
            "Total number of drained series entries unlinked from their partition."
        );
        describe_histogram!(
            SWEEP_DURATION_SECONDS,
            Unit::Seconds,
            "Time to sweep every partition once."
        );
    }
}
