use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use async_trait::async_trait;
use crate::config::LibraryConfig;
use crate::errors::{AppError, Result};
use crate::identifier::ContentId;
use super::cache::MetadataCache;
use super::{MetadataSource, RawVideoInfo, VideoMetadata};

/// Metadata lookups through `yt-dlp --dump-json`; nothing is downloaded.
pub struct YtDlpResolver {
    ytdlp_path: String,
    user_agent: String,
    socket_timeout: Duration,
    timeout: Duration,
    cache: MetadataCache<VideoMetadata>,
}

impl YtDlpResolver {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            user_agent: config.user_agent.clone(),
            socket_timeout: config.socket_timeout(),
            timeout: config.metadata_timeout(),
            cache: MetadataCache::new(Duration::from_secs(config.metadata_cache_ttl_secs)),
        }
    }

    fn target_url(identifier_or_url: &str) -> String {
        match ContentId::parse(identifier_or_url.trim()) {
            Some(id) => id.watch_url(),
            None => identifier_or_url.trim().to_string(),
        }
    }
}

#[async_trait]
impl MetadataSource for YtDlpResolver {
    async fn resolve(&self, identifier_or_url: &str) -> Result<VideoMetadata> {
        if let Some(cached) = self.cache.get(identifier_or_url).await {
            log::debug!("[METADATA] Cache hit for {}", identifier_or_url);
            return Ok(cached);
        }

        let url = Self::target_url(identifier_or_url);
        log::info!("[METADATA] Resolving {}", url);

        let args = vec![
            "--user-agent".to_string(),
            self.user_agent.clone(),
            "--socket-timeout".to_string(),
            self.socket_timeout.as_secs().to_string(),
        ];
        let info = dump_info(&self.ytdlp_path, &args, &url, self.timeout).await?;
        let metadata = VideoMetadata::from(info);

        self.cache.clear_expired().await;
        self.cache.set(identifier_or_url.to_string(), metadata.clone()).await;
        Ok(metadata)
    }
}

/// Runs the extraction tool in query-only mode and parses its JSON document.
pub async fn dump_info(
    program: &str,
    extra_args: &[String],
    url: &str,
    timeout: Duration,
) -> Result<RawVideoInfo> {
    let mut cmd = Command::new(program);
    cmd.args([
        "--dump-json",
        "--skip-download",
        "--no-warnings",
        "--no-playlist",
        "--no-check-certificate",
    ])
    .args(extra_args)
    .arg(url)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    log::debug!("[METADATA] Running {:?}", cmd);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            AppError::ResolutionFailed(format!(
                "{} timed out after {}s",
                program,
                timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::ResolutionFailed(format!("failed to start {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::ResolutionFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let document = stdout
        .lines()
        .find(|line| line.trim_start().starts_with('{'))
        .ok_or_else(|| AppError::ResolutionFailed(format!("{} produced no metadata", program)))?;

    serde_json::from_str(document)
        .map_err(|e| {
            AppError::ResolutionFailed(format!("unreadable metadata from {}: {}", program, e))
        })
}
