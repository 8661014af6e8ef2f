use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use dirs;
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "VIDEOLIB";
const DEFAULT_MEDIA_PATH: &str = "/opt/youtube-videos";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    pub media_path: PathBuf,
    pub max_concurrent_downloads: usize,
    /// Files at or below this size are treated as failed downloads.
    pub min_file_size: u64,
    pub ytdlp_path: String,
    pub youtube_dl_path: String,
    pub socket_timeout_secs: u64,
    pub retries: u32,
    pub fragment_retries: u32,
    pub command_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub metadata_cache_ttl_secs: u64,
    pub audio_bitrate_kbps: u32,
    pub user_agent: String,
    pub referer: String,
    pub proxy: Option<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            media_path: dirs::video_dir()
                .map(|dir| dir.join("library"))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_PATH)),
            max_concurrent_downloads: 3,
            min_file_size: 1024,
            ytdlp_path: "yt-dlp".to_string(),
            youtube_dl_path: "youtube-dl".to_string(),
            socket_timeout_secs: 60,
            retries: 10,
            fragment_retries: 10,
            command_timeout_secs: 600,
            metadata_timeout_secs: 120,
            metadata_cache_ttl_secs: 3600,
            audio_bitrate_kbps: 192,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            referer: "https://www.youtube.com/".to_string(),
            proxy: None,
        }
    }
}

impl LibraryConfig {
    /// Defaults, then the JSON config file, then `VIDEOLIB_*` variables, then `MEDIA_PATH`.
    pub fn load() -> Result<Self> {
        let defaults = config::Config::try_from(&LibraryConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        match Self::get_config_path() {
            Ok(path) => {
                log::debug!("[CONFIG] Reading optional config file {:?}", path);
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Json)
                        .required(false),
                );
            }
            Err(e) => log::warn!("[CONFIG] {}", e),
        }

        let mut loaded: LibraryConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        if let Ok(media_path) = std::env::var("MEDIA_PATH") {
            if !media_path.trim().is_empty() {
                loaded.media_path = PathBuf::from(media_path);
            }
        }

        Ok(loaded)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Could not find config directory".to_string(),
            ))
        })?;

        Ok(config_dir.join("video-library").join("config.json"))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}
