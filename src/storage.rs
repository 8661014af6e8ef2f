use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use crate::errors::{AppError, Result};
use crate::identifier::ContentId;
use crate::metadata::{VideoMetadata, MAX_TAGS};

pub const LIBRARY_INDEX: &str = "library.json";
const UNKNOWN_CHANNEL: &str = "Unknown Channel";
const UNKNOWN_RESOLUTION: &str = "Unknown";

/// One library entry, keyed by content id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: ContentId,
    pub file_path: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub channel_name: String,
    pub channel_id: Option<String>,
    /// Seconds.
    pub duration: u64,
    pub upload_date: Option<NaiveDate>,
    pub description: String,
    pub view_count: u64,
    pub like_count: u64,
    /// JSON-encoded list.
    pub tags: String,
    pub resolution: String,
    pub file_size: u64,
    pub added_date: DateTime<Utc>,
    pub last_watched: Option<DateTime<Utc>>,
    pub watched: bool,
    pub local_views: u64,
}

impl VideoRecord {
    /// Builds the record for a freshly acquired file. Missing metadata falls
    /// back to defaults and the file stem as title.
    pub async fn from_download(
        path: &Path,
        id: &ContentId,
        metadata: Option<&VideoMetadata>,
    ) -> Result<Self> {
        let file_size = tokio::fs::metadata(path).await?.len();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| id.to_string());

        let meta = metadata.cloned().unwrap_or_default();
        let tags: Vec<String> = meta.tags.into_iter().take(MAX_TAGS).collect();

        Ok(Self {
            id: id.clone(),
            file_path: path.to_string_lossy().to_string(),
            title: meta.title.filter(|t| !t.is_empty()).unwrap_or(stem),
            thumbnail_url: meta.thumbnail_url,
            channel_name: meta.channel_name.unwrap_or_else(|| UNKNOWN_CHANNEL.to_string()),
            channel_id: meta.channel_id,
            duration: meta.duration.unwrap_or(0),
            upload_date: meta.upload_date,
            description: meta.description.unwrap_or_default(),
            view_count: meta.view_count.unwrap_or(0),
            like_count: meta.like_count.unwrap_or(0),
            tags: serde_json::to_string(&tags)?,
            resolution: meta.resolution.unwrap_or_else(|| UNKNOWN_RESOLUTION.to_string()),
            file_size,
            added_date: Utc::now(),
            last_watched: None,
            watched: false,
            local_views: 0,
        })
    }
}

/// Persistence collaborator for the download pipeline. Records are insert-only.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn exists(&self, id: &ContentId) -> Result<bool>;

    /// Fails with `PersistenceFailed` if the id is already present or the
    /// write cannot be committed.
    async fn insert(&self, record: VideoRecord) -> Result<()>;

    async fn get(&self, id: &ContentId) -> Result<Option<VideoRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ContentId, VideoRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn insert(&self, record: VideoRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AppError::PersistenceFailed(format!("{} already in library", record.id)));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> Result<Option<VideoRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }
}

/// Library index kept as a JSON array on disk. Every insert rewrites the
/// whole file through a temp file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<ContentId, VideoRecord>>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<VideoRecord> = serde_json::from_str(&content).map_err(|e| {
                    let reason = format!("unreadable library index {:?}: {}", path, e);
                    AppError::PersistenceFailed(reason)
                })?;
                list.into_iter().map(|r| (r.id.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        log::info!("[STORE] Opened {:?} with {} records", path, records.len());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Index location inside a media directory.
    pub fn index_path(media_path: &Path) -> PathBuf {
        media_path.join(LIBRARY_INDEX)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_index(&self, records: &BTreeMap<ContentId, VideoRecord>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let list: Vec<&VideoRecord> = records.values().collect();
        let content = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl VideoStore for JsonFileStore {
    async fn exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.records.lock().await.contains_key(id))
    }

    async fn insert(&self, record: VideoRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(AppError::PersistenceFailed(format!("{} already in library", record.id)));
        }

        let mut next = records.clone();
        let id = record.id.clone();
        next.insert(id.clone(), record);
        self.write_index(&next)
            .await
            .map_err(|e| AppError::PersistenceFailed(format!("writing {:?}: {}", self.path, e)))?;

        *records = next;
        log::info!("[STORE] Added {} to library", id);
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> Result<Option<VideoRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }
}
