use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

/// Telemetry events sent from the loader for progress tracking
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Loader started working on a dataset
    DatasetStarted { dataset: String },
    /// A batch was appended to the dataset's table
    BatchLoaded {
        dataset: String,
        chunk_index: usize,
        records_loaded: u64,
        duration_ms: u64,
    },
    /// Loader is done with a dataset, whatever the outcome
    DatasetFinished { dataset: String, succeeded: bool },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub datasets_started: usize,
    pub datasets_succeeded: usize,
    pub datasets_failed: usize,
    pub batches_loaded: usize,
    pub records_loaded: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::DatasetStarted { .. } => {
                self.datasets_started += 1;
            }
            TelemetryEvent::BatchLoaded {
                records_loaded,
                duration_ms,
                ..
            } => {
                self.batches_loaded += 1;
                self.records_loaded += records_loaded;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::DatasetFinished { succeeded, .. } => {
                if *succeeded {
                    self.datasets_succeeded += 1;
                } else {
                    self.datasets_failed += 1;
                }
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

/// Render telemetry as a terminal spinner until every sender is dropped.
///
/// Returns the aggregated stats once the channel closes.
pub fn spawn_progress_display(
    mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
) -> tokio::task::JoinHandle<ProgressStats> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    tokio::spawn(async move {
        let mut stats = ProgressStats::new();

        while let Some(event) = telemetry_rx.recv().await {
            stats.update(&event);

            match &event {
                TelemetryEvent::DatasetStarted { dataset } => {
                    spinner.set_message(format!("{}: starting", dataset));
                }
                TelemetryEvent::BatchLoaded {
                    dataset,
                    chunk_index,
                    ..
                } => {
                    spinner.set_message(format!(
                        "{}: chunk {} | {} rows total",
                        dataset, chunk_index, stats.records_loaded
                    ));
                }
                TelemetryEvent::DatasetFinished { .. } => {}
            }
        }

        let (p50, p90, p99) = stats.get_percentiles();
        let timing = match (p50, p90, p99) {
            (Some(p50), Some(p90), Some(p99)) => {
                format!(" | batch p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99)
            }
            _ => String::new(),
        };
        spinner.finish_with_message(format!(
            "{} datasets ({} failed), {} rows{}",
            stats.datasets_started, stats.datasets_failed, stats.records_loaded, timing
        ));

        stats
    })
}
