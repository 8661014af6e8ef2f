pub mod cache;
pub mod resolver;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use crate::errors::Result;

pub use resolver::YtDlpResolver;

/// Upper bound on stored tags per video.
pub const MAX_TAGS: usize = 50;
const MAX_FORMAT_OPTIONS: usize = 5;

/// Descriptive metadata for one remote video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub channel_name: Option<String>,
    pub channel_id: Option<String>,
    /// Seconds.
    pub duration: Option<u64>,
    pub upload_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub tags: Vec<String>,
    pub resolution: Option<String>,
    /// Distinct video heights on offer, highest first.
    pub formats: Vec<FormatOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatOption {
    pub format_id: String,
    pub resolution: String,
    pub ext: String,
    pub filesize: u64,
}

/// Raw `--dump-json` document from the extraction tool. Every field is optional;
/// the tool omits or nulls whatever the site does not provide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub tags: Option<Vec<Option<String>>>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub resolution: Option<String>,
    pub format_note: Option<String>,
    pub formats: Option<Vec<RawFormat>>,
    /// Direct media URL, present when a single non-merged format was selected.
    pub url: Option<String>,
    pub ext: Option<String>,
    pub protocol: Option<String>,
    pub requested_formats: Option<Vec<serde_json::Value>>,
    pub http_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u64>,
    pub vcodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl From<RawVideoInfo> for VideoMetadata {
    fn from(info: RawVideoInfo) -> Self {
        let resolution = derive_resolution(&info);
        let formats = info.formats.as_deref().map(format_options).unwrap_or_default();
        let upload_date = info.upload_date.as_deref().and_then(parse_upload_date);
        let tags = info
            .tags
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .take(MAX_TAGS)
            .collect();

        Self {
            id: info.id,
            title: info.title,
            thumbnail_url: info.thumbnail,
            channel_name: info.uploader.or(info.channel),
            channel_id: info.channel_id,
            duration: info.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
            upload_date,
            description: info.description,
            view_count: info.view_count,
            like_count: info.like_count,
            tags,
            resolution,
            formats,
        }
    }
}

/// Compact `YYYYMMDD`; anything else is dropped.
pub fn parse_upload_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").ok()
}

fn derive_resolution(info: &RawVideoInfo) -> Option<String> {
    match (info.width, info.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
        _ => info
            .resolution
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| info.format_note.clone()),
    }
}

fn format_options(formats: &[RawFormat]) -> Vec<FormatOption> {
    let mut seen = BTreeSet::new();
    let mut options: Vec<(u64, FormatOption)> = formats
        .iter()
        .filter(|f| f.vcodec.as_deref() != Some("none"))
        .filter_map(|f| {
            let height = f.height.filter(|h| *h > 0)?;
            if !seen.insert(height) {
                return None;
            }
            Some((
                height,
                FormatOption {
                    format_id: f.format_id.clone(),
                    resolution: format!("{}p", height),
                    ext: f.ext.clone().unwrap_or_else(|| "mp4".to_string()),
                    filesize: f.filesize.or(f.filesize_approx).unwrap_or(0),
                },
            ))
        })
        .collect();

    options.sort_by(|a, b| b.0.cmp(&a.0));
    options
        .into_iter()
        .take(MAX_FORMAT_OPTIONS)
        .map(|(_, option)| option)
        .collect()
}

/// Read-only lookup of descriptive metadata for an identifier or URL.
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    async fn resolve(&self, identifier_or_url: &str) -> Result<VideoMetadata>;
}
