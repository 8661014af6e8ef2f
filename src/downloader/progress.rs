//! Turns the raw progress events emitted by the acquisition layer into the
//! canonical snapshot fields. Raw shapes stop here.

use super::registry::TaskRegistry;
use super::DownloadStatus;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const UNKNOWN: &str = "N/A";

/// Progress event as produced by a strategy. Depending on the transport, a
/// downloading event carries byte counts, only a fragment index, or both.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProgressEvent {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
        total_bytes_estimate: Option<u64>,
        /// Bytes per second.
        speed: Option<f64>,
        /// Seconds.
        eta: Option<f64>,
        fragment_index: Option<u64>,
        filename: Option<String>,
    },
    Finished {
        filename: Option<String>,
    },
}

impl RawProgressEvent {
    /// Byte-level event, the shape the in-process transfer produces.
    pub fn bytes(
        downloaded: u64,
        total: Option<u64>,
        speed: Option<f64>,
        eta: Option<f64>,
    ) -> Self {
        RawProgressEvent::Downloading {
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            total_bytes_estimate: None,
            speed,
            eta,
            fragment_index: None,
            filename: None,
        }
    }
}

/// Normalised view of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub finished: bool,
}

pub fn normalize(event: &RawProgressEvent) -> ProgressUpdate {
    match event {
        RawProgressEvent::Downloading {
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate,
            speed,
            eta,
            fragment_index,
            filename,
        } => {
            let total = total_bytes.or(*total_bytes_estimate).filter(|t| *t > 0);
            let progress = match total {
                Some(total) => downloaded_bytes.unwrap_or(0) as f64 / total as f64 * 100.0,
                None => fragment_index.unwrap_or(0) as f64 * 10.0,
            };

            ProgressUpdate {
                progress: round2(progress.clamp(0.0, 100.0)),
                speed: Some(
                    speed
                        .filter(|s| *s > 0.0 && s.is_finite())
                        .map(format_speed)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                ),
                eta: Some(
                    eta.filter(|e| *e >= 0.0 && e.is_finite())
                        .map(format_eta)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                ),
                filename: filename.clone().filter(|f| !f.is_empty()),
                finished: false,
            }
        }
        RawProgressEvent::Finished { filename } => ProgressUpdate {
            progress: 100.0,
            speed: None,
            eta: None,
            filename: filename.clone().filter(|f| !f.is_empty()),
            finished: true,
        },
    }
}

/// Largest fitting unit, one decimal place above bytes.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= MIB {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    } else if bytes_per_sec >= KIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

pub fn format_eta(secs: f64) -> String {
    format!("{}s", secs as u64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Callback surface handed to strategies; writes into one task's registry entry.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: String,
    registry: TaskRegistry,
}

impl ProgressReporter {
    pub fn new(task_id: impl Into<String>, registry: TaskRegistry) -> Self {
        Self {
            task_id: task_id.into(),
            registry,
        }
    }

    /// Reporter bound to no registered task; every report is dropped.
    pub fn detached() -> Self {
        Self::new("", TaskRegistry::new())
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn report(&self, event: RawProgressEvent) {
        let update = normalize(&event);
        self.registry
            .update(&self.task_id, move |task| {
                if !update.finished {
                    task.status = DownloadStatus::Downloading;
                }
                task.progress = update.progress;
                task.speed = update.speed;
                task.eta = update.eta;
                if let Some(filename) = update.filename {
                    task.filename = Some(filename);
                }
            })
            .await;
    }

    /// Coarse progress step, used where the transport reports nothing finer.
    /// The next `report` overwrites it, even with a lower value.
    pub async fn milestone(&self, progress: f64) {
        self.registry
            .update(&self.task_id, |task| task.progress = progress.clamp(0.0, 100.0))
            .await;
    }

    pub async fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.task_id).await
    }
}
