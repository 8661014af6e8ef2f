pub mod chain;
pub mod http_pool;
pub mod manager;
pub mod progress;
pub mod registry;
pub mod strategies;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::errors::Result;
use crate::identifier::ContentId;
use progress::ProgressReporter;

/// Registry entry for one download task. Lives as long as the manager.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
    pub quality: Quality,
    pub status: DownloadStatus,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadTask {
    pub fn new(id: String, url: String, quality: Quality) -> Self {
        Self {
            id,
            url,
            quality,
            status: DownloadStatus::Pending,
            progress: 0.0,
            speed: None,
            eta: None,
            filename: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            speed: self.speed.clone(),
            eta: self.eta.clone(),
            filename: self.filename.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Error | DownloadStatus::Cancelled
        )
    }
}

/// Point-in-time view of a task, as handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadSnapshot {
    pub task_id: String,
    pub status: DownloadStatus,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Best,
    /// Upper bound on video height, falling back to best when nothing fits.
    MaxHeight(u32),
    /// Audio-only, transcoded.
    Audio,
}

impl Quality {
    /// Unknown labels fall back to `Best`.
    pub fn parse(raw: &str) -> Self {
        let label = raw.trim().to_lowercase();
        match label.as_str() {
            "" | "best" => Quality::Best,
            "audio" => Quality::Audio,
            _ => match label.strip_suffix('p').and_then(|h| h.parse::<u32>().ok()) {
                Some(height) if height > 0 => Quality::MaxHeight(height),
                _ => {
                    log::warn!("[QUALITY] Unknown quality '{}', using best", raw);
                    Quality::Best
                }
            },
        }
    }

    /// Format selector understood by yt-dlp and youtube-dl.
    pub fn format_selector(&self) -> String {
        match self {
            Quality::Best => "best[ext=mp4]/best".to_string(),
            Quality::MaxHeight(h) => format!("best[height<={h}][ext=mp4]/best[height<={h}]/best"),
            Quality::Audio => "bestaudio/best".to_string(),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Quality::Audio)
    }
}

/// Everything a strategy needs to fetch one video.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub url: String,
    pub id: ContentId,
    pub quality: Quality,
    pub output_dir: PathBuf,
}

impl AcquireRequest {
    /// Output template handed to the extraction tools; the tool fills in title and extension.
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("%(title)s-{}.%(ext)s", self.id))
    }
}

/// One self-contained way of turning a URL into a local file.
#[async_trait::async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(Some(path))` hands a candidate file to the chain for validation;
    /// `Ok(None)` means the method produced nothing.
    async fn acquire(
        &self,
        request: &AcquireRequest,
        progress: &ProgressReporter,
    ) -> Result<Option<PathBuf>>;
}
