pub mod command;
pub mod direct_http;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use crate::config::LibraryConfig;
use crate::errors::Result;
use crate::identifier::ContentId;
use crate::utils::is_partial_file;
use super::AcquisitionStrategy;

pub use command::CommandStrategy;
pub use direct_http::DirectHttpStrategy;

/// Default fallback order: tracked yt-dlp, direct HTTP transfer, relaxed
/// yt-dlp, then youtube-dl.
pub fn default_strategies(config: &LibraryConfig) -> Result<Vec<Arc<dyn AcquisitionStrategy>>> {
    Ok(vec![
        Arc::new(CommandStrategy::ytdlp_tracked(config)),
        Arc::new(DirectHttpStrategy::new(config)?),
        Arc::new(CommandStrategy::ytdlp_relaxed(config)),
        Arc::new(CommandStrategy::youtube_dl(config)),
    ])
}

/// Most recently created finished file in `dir` whose name contains `id`.
/// Tools pick the final name themselves, so this is how their output is found.
pub async fn find_downloaded_file(dir: &Path, id: &ContentId) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.contains(id.as_str()) || is_partial_file(&name) {
            continue;
        }

        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        let stamp = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(_, best)| stamp >= *best) {
            newest = Some((entry.path(), stamp));
        }
    }

    Ok(newest.map(|(path, _)| path))
}
