pub mod config;
pub mod downloader;
pub mod errors;
pub mod identifier;
pub mod metadata;
pub mod storage;
pub mod utils;
pub mod validation;

pub use config::LibraryConfig;
pub use downloader::manager::DownloadManager;
pub use downloader::{DownloadSnapshot, DownloadStatus, Quality};
pub use errors::{AppError, Result};
pub use identifier::ContentId;
pub use metadata::{MetadataSource, VideoMetadata};
pub use storage::{JsonFileStore, MemoryStore, VideoRecord, VideoStore};
