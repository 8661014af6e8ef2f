use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::io::AsyncWriteExt;
use crate::config::LibraryConfig;
use crate::errors::{AppError, Result};
use super::progress::{ProgressReporter, RawProgressEvent};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// HTTP client for in-process media transfers. Certificate validation is
/// relaxed: this only ever fetches URLs the user asked for.
pub struct HttpPool {
    client: Client,
}

impl HttpPool {
    pub fn new(config: &LibraryConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .connect_timeout(config.socket_timeout())
            .timeout(config.command_timeout())
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Streams `url` into `dest`, retrying whole transfers. A failed attempt
    /// never leaves a partial file behind.
    pub async fn download_to_file(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        dest: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            log::info!("[HTTP] Attempt {} of {} for {:?}", attempt, MAX_RETRIES, dest);

            match self.try_download(url, headers, dest, progress).await {
                Ok(bytes) => {
                    log::info!("[HTTP] Transfer finished on attempt {} ({} bytes)", attempt, bytes);
                    return Ok(bytes);
                }
                Err(e) => {
                    log::warn!("[HTTP] Attempt {} failed: {}", attempt, e);
                    let _ = tokio::fs::remove_file(dest).await;
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Strategy("HTTP transfer never attempted".to_string())))
    }

    async fn try_download(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        dest: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Strategy(format!("HTTP error: {}", response.status())));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if last_report.map_or(true, |at| at.elapsed() >= REPORT_INTERVAL) {
                let elapsed = started.elapsed().as_secs_f64();
                let speed = (elapsed > 0.0).then(|| downloaded as f64 / elapsed);
                let eta = match (total, speed) {
                    (Some(total), Some(speed)) if speed > 0.0 => {
                        Some(total.saturating_sub(downloaded) as f64 / speed)
                    }
                    _ => None,
                };
                progress
                    .report(RawProgressEvent::bytes(downloaded, total, speed, eta))
                    .await;
                last_report = Some(Instant::now());
            }
        }

        file.flush().await?;

        if let Some(total) = total {
            if downloaded < total {
                return Err(AppError::Strategy(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        progress
            .report(RawProgressEvent::Finished {
                filename: Some(dest.to_string_lossy().to_string()),
            })
            .await;

        Ok(downloaded)
    }
}
