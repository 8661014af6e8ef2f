use crate::errors::{AppError, Result};
use url::Url;

const SUPPORTED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

#[derive(Debug, Clone, Default)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Rejects anything that is not an http(s) URL on a supported video host.
    pub fn validate_source_url(&self, url: &str) -> Result<Url> {
        if url.trim().is_empty() {
            return Err(AppError::InvalidSource("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url.trim())
            .map_err(|e| AppError::InvalidSource(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidSource(format!(
                "Unsupported scheme: {}",
                parsed_url.scheme()
            )));
        }

        let host = parsed_url
            .host_str()
            .ok_or_else(|| AppError::InvalidSource("URL must have a host".to_string()))?
            .to_lowercase();

        let is_supported = SUPPORTED_HOSTS
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));

        if !is_supported {
            return Err(AppError::InvalidSource(format!(
                "Unsupported platform: {}. Supported platforms: YouTube",
                host
            )));
        }

        Ok(parsed_url)
    }
}
