use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use crate::config::LibraryConfig;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::progress::ProgressReporter;
use crate::downloader::{AcquireRequest, AcquisitionStrategy};
use crate::errors::{AppError, Result};
use crate::metadata::resolver::dump_info;
use crate::metadata::RawVideoInfo;
use crate::utils::sanitize_filename;

/// Asks yt-dlp for the media URL of a single progressive format and fetches it
/// in-process, so TLS and retry behaviour stay under our control.
pub struct DirectHttpStrategy {
    ytdlp_path: String,
    user_agent: String,
    lookup_timeout: Duration,
    pool: HttpPool,
}

impl DirectHttpStrategy {
    pub fn new(config: &LibraryConfig) -> Result<Self> {
        Ok(Self {
            ytdlp_path: config.ytdlp_path.clone(),
            user_agent: config.user_agent.clone(),
            lookup_timeout: config.metadata_timeout(),
            pool: HttpPool::new(config)?,
        })
    }
}

/// Direct URL of a single-file format, or the reason there is none.
fn direct_media_url(info: &RawVideoInfo) -> std::result::Result<&str, &'static str> {
    if info.requested_formats.as_ref().map_or(false, |f| !f.is_empty()) {
        return Err("selected format needs merging");
    }
    if let Some(protocol) = info.protocol.as_deref() {
        if protocol.starts_with("m3u8") || protocol.contains("dash") {
            return Err("selected format is segmented");
        }
    }
    info.url.as_deref().filter(|u| !u.is_empty()).ok_or("no direct media URL")
}

#[async_trait]
impl AcquisitionStrategy for DirectHttpStrategy {
    fn name(&self) -> &str {
        "direct-http"
    }

    async fn acquire(
        &self,
        request: &AcquireRequest,
        progress: &ProgressReporter,
    ) -> Result<Option<PathBuf>> {
        if request.quality.is_audio() {
            log::info!("[HTTP] Audio requests need transcoding, skipping direct transfer");
            return Ok(None);
        }

        let args = vec![
            "--format".to_string(),
            request.quality.format_selector(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
        ];
        let info = dump_info(&self.ytdlp_path, &args, &request.url, self.lookup_timeout)
            .await
            .map_err(|e| AppError::Strategy(format!("format lookup failed: {}", e)))?;

        let media_url = match direct_media_url(&info) {
            Ok(url) => url,
            Err(reason) => {
                log::info!("[HTTP] Not attempting direct transfer: {}", reason);
                return Ok(None);
            }
        };

        let title = sanitize_filename(info.title.as_deref().unwrap_or(request.id.as_str()));
        let ext = info.ext.as_deref().unwrap_or("mp4");
        let dest = request
            .output_dir
            .join(format!("{}-{}.{}", title, request.id, ext));
        let headers = info.http_headers.clone().unwrap_or_default();

        self.pool
            .download_to_file(media_url, &headers, &dest, progress)
            .await?;
        Ok(Some(dest))
    }
}
