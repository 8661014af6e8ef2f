use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use crate::config::LibraryConfig;
use crate::downloader::chain::{StrategyChain, CHAIN_START_PROGRESS};
use crate::downloader::progress::ProgressReporter;
use crate::downloader::registry::TaskRegistry;
use crate::downloader::{AcquireRequest, DownloadSnapshot, DownloadStatus, DownloadTask, Quality};
use crate::errors::{AppError, Result};
use crate::identifier::ContentId;
use crate::metadata::{MetadataSource, VideoMetadata, YtDlpResolver};
use crate::storage::{VideoRecord, VideoStore};
use crate::utils::{ensure_dir_exists, generate_task_id};
use crate::validation::InputValidator;

pub const CANCELLED_BY_USER: &str = "Download cancelled by user";
pub const ALREADY_IN_LIBRARY: &str = "Video already exists in library";
pub const ALREADY_IN_PROGRESS: &str = "Video is already being downloaded by another task";
pub const ID_EXTRACTION_FAILED: &str = "Could not extract video ID from URL";
const PROCESSING_PROGRESS: f64 = 90.0;

/// State shared between the manager front end and its background workers.
#[derive(Clone)]
struct Pipeline {
    registry: TaskRegistry,
    chain: Arc<StrategyChain>,
    resolver: Arc<dyn MetadataSource>,
    store: Arc<dyn VideoStore>,
    in_flight: Arc<Mutex<HashSet<ContentId>>>,
    output_dir: PathBuf,
}

/// Creates download tasks and runs them in the background, at most
/// `max_concurrent_downloads` at a time.
pub struct DownloadManager {
    pipeline: Pipeline,
    workers: Arc<Semaphore>,
    validator: InputValidator,
}

impl DownloadManager {
    pub fn new(
        config: &LibraryConfig,
        chain: StrategyChain,
        resolver: Arc<dyn MetadataSource>,
        store: Arc<dyn VideoStore>,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                registry: TaskRegistry::new(),
                chain: Arc::new(chain),
                resolver,
                store,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                output_dir: config.media_path.clone(),
            },
            workers: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            validator: InputValidator::new(),
        }
    }

    /// Default strategy chain and yt-dlp metadata resolver.
    pub fn from_config(config: &LibraryConfig, store: Arc<dyn VideoStore>) -> Result<Self> {
        let chain = StrategyChain::from_config(config)?;
        let resolver = Arc::new(YtDlpResolver::new(config));
        Ok(Self::new(config, chain, resolver, store))
    }

    /// Registers a task and returns its id without waiting for any work.
    pub async fn start_task(&self, url: &str, quality: &str) -> Result<String> {
        self.validator.validate_source_url(url)?;

        let task_id = generate_task_id();
        let quality = Quality::parse(quality);
        let url = url.trim().to_string();
        self.pipeline
            .registry
            .insert(DownloadTask::new(task_id.clone(), url.clone(), quality))
            .await;
        log::info!("[MANAGER] Queued task {} for {}", task_id, url);

        let pipeline = self.pipeline.clone();
        let workers = self.workers.clone();
        let worker_task_id = task_id.clone();
        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    log::error!("[MANAGER] Worker pool closed, task {} not run", worker_task_id);
                    return;
                }
            };
            pipeline.run(&worker_task_id, url, quality).await;
        });

        Ok(task_id)
    }

    pub async fn get_status(&self, task_id: &str) -> Result<DownloadSnapshot> {
        self.pipeline
            .registry
            .snapshot(task_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
    }

    pub async fn list_tasks(&self) -> Vec<DownloadSnapshot> {
        self.pipeline.registry.list().await
    }

    /// Flags the task cancelled. Work already running is not interrupted; it
    /// stops at the next strategy boundary and never overwrites the flag.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.pipeline.registry.cancel(task_id, CANCELLED_BY_USER).await;
        if cancelled {
            log::info!("[MANAGER] Task {} cancelled", task_id);
        }
        cancelled
    }

    /// Read-only metadata preview, independent of any task.
    pub async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata> {
        self.pipeline.resolver.resolve(url).await
    }

    /// Forgets terminal tasks that finished more than `older_than` ago.
    pub async fn cleanup_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let removed = self
            .pipeline
            .registry
            .remove_finished_before(chrono::Utc::now() - age)
            .await;
        if removed > 0 {
            log::info!("[MANAGER] Cleaned up {} finished tasks", removed);
        }
        removed
    }
}

impl Pipeline {
    async fn run(&self, task_id: &str, url: String, quality: Quality) {
        if self.registry.is_cancelled(task_id).await {
            log::info!("[MANAGER] Task {} cancelled before start", task_id);
            return;
        }

        let content_id = match ContentId::from_url(&url) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("[MANAGER] Task {}: {}", task_id, e);
                self.fail(task_id, ID_EXTRACTION_FAILED.to_string()).await;
                return;
            }
        };

        // Claimed before the library lookup, released on every path below.
        if !self.in_flight.lock().await.insert(content_id.clone()) {
            log::info!("[MANAGER] {} is already being downloaded", content_id);
            self.complete_without_download(task_id, ALREADY_IN_PROGRESS).await;
            return;
        }

        match self.store.exists(&content_id).await {
            Ok(true) => {
                log::info!("[MANAGER] {} already in library, skipping download", content_id);
                self.complete_without_download(task_id, ALREADY_IN_LIBRARY).await;
            }
            Ok(false) => self.acquire_and_register(task_id, url, quality, &content_id).await,
            Err(e) => {
                log::warn!(
                    "[MANAGER] Library lookup for {} failed ({}): {}",
                    content_id,
                    e.code(),
                    e
                );
                self.acquire_and_register(task_id, url, quality, &content_id).await;
            }
        }

        self.in_flight.lock().await.remove(&content_id);
    }

    async fn acquire_and_register(
        &self,
        task_id: &str,
        url: String,
        quality: Quality,
        content_id: &ContentId,
    ) {
        self.registry
            .update(task_id, |task| {
                task.status = DownloadStatus::Downloading;
                task.progress = CHAIN_START_PROGRESS;
                task.started_at = Some(chrono::Utc::now());
            })
            .await;

        if let Err(e) = ensure_dir_exists(&self.output_dir).await {
            log::warn!("[MANAGER] Could not create {:?}: {}", self.output_dir, e);
        }

        let reporter = ProgressReporter::new(task_id, self.registry.clone());
        let request = AcquireRequest {
            url,
            id: content_id.clone(),
            quality,
            output_dir: self.output_dir.clone(),
        };

        let path = match self.chain.acquire(&request, &reporter).await {
            Ok(path) => path,
            Err(AppError::Cancelled(_)) => return,
            Err(e) => {
                log::error!("[MANAGER] Task {} failed: {}", task_id, e);
                self.fail(task_id, e.to_string()).await;
                return;
            }
        };

        let filename = path.to_string_lossy().to_string();
        self.registry
            .update(task_id, |task| {
                task.status = DownloadStatus::Processing;
                task.progress = task.progress.max(PROCESSING_PROGRESS);
                task.filename = Some(filename);
                task.speed = None;
                task.eta = None;
            })
            .await;

        let metadata = match self.resolver.resolve(content_id.as_str()).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                log::warn!(
                    "[MANAGER] Metadata for {} unavailable ({}): {}",
                    content_id,
                    e.code(),
                    e
                );
                None
            }
        };

        let record = VideoRecord::from_download(&path, content_id, metadata.as_ref()).await;
        let persisted = match record {
            Ok(record) => self.store.insert(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            log::warn!(
                "[MANAGER] Could not record {} in library ({}): {}",
                content_id,
                e.code(),
                e
            );
        }

        self.registry
            .update(task_id, |task| {
                task.status = DownloadStatus::Completed;
                task.progress = 100.0;
                task.finished_at = Some(chrono::Utc::now());
            })
            .await;
        log::info!("[MANAGER] Task {} completed: {:?}", task_id, path);
    }

    async fn complete_without_download(&self, task_id: &str, message: &str) {
        self.registry
            .update(task_id, |task| {
                task.status = DownloadStatus::Completed;
                task.progress = 100.0;
                task.error = Some(message.to_string());
                task.finished_at = Some(chrono::Utc::now());
            })
            .await;
    }

    async fn fail(&self, task_id: &str, message: String) {
        self.registry
            .update(task_id, |task| {
                task.status = DownloadStatus::Error;
                task.error = Some(message);
                task.speed = None;
                task.eta = None;
                task.finished_at = Some(chrono::Utc::now());
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use crate::downloader::chain::tests::{Script, ScriptedStrategy};
    use crate::downloader::AcquisitionStrategy;
    use crate::storage::MemoryStore;

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    struct StubResolver {
        fail: bool,
    }

    #[async_trait]
    impl MetadataSource for StubResolver {
        async fn resolve(&self, identifier_or_url: &str) -> Result<VideoMetadata> {
            if self.fail {
                return Err(AppError::ResolutionFailed(identifier_or_url.to_string()));
            }
            Ok(VideoMetadata {
                title: Some("Never Gonna Give You Up".to_string()),
                channel_name: Some("Rick Astley".to_string()),
                duration: Some(213),
                ..VideoMetadata::default()
            })
        }
    }

    /// Accepts lookups but refuses every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl VideoStore for ReadOnlyStore {
        async fn exists(&self, _id: &ContentId) -> Result<bool> {
            Ok(false)
        }

        async fn insert(&self, record: VideoRecord) -> Result<()> {
            Err(AppError::PersistenceFailed(format!("read-only library, dropping {}", record.id)))
        }

        async fn get(&self, _id: &ContentId) -> Result<Option<VideoRecord>> {
            Ok(None)
        }
    }

    /// Blocks inside `acquire` until released.
    struct GatedStrategy {
        started: Arc<Notify>,
        release: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    impl GatedStrategy {
        fn new() -> Self {
            Self {
                started: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AcquisitionStrategy for GatedStrategy {
        fn name(&self) -> &str {
            "gated"
        }

        async fn acquire(
            &self,
            request: &AcquireRequest,
            _progress: &ProgressReporter,
        ) -> Result<Option<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            let path = request.output_dir.join(format!("Gated-{}.mp4", request.id));
            tokio::fs::write(&path, vec![0u8; 2048]).await?;
            Ok(Some(path))
        }
    }

    /// Library whose lookups after the first one hang until released.
    struct SlowLookupStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
        release_later_lookups: Notify,
    }

    impl SlowLookupStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                lookups: AtomicUsize::new(0),
                release_later_lookups: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl VideoStore for SlowLookupStore {
        async fn exists(&self, id: &ContentId) -> Result<bool> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            let answer = self.inner.exists(id).await?;
            if n > 0 {
                self.release_later_lookups.notified().await;
            }
            Ok(answer)
        }

        async fn insert(&self, record: VideoRecord) -> Result<()> {
            self.inner.insert(record).await
        }

        async fn get(&self, id: &ContentId) -> Result<Option<VideoRecord>> {
            self.inner.get(id).await
        }
    }

    /// Records how many acquisitions run at the same time.
    #[derive(Default)]
    struct CountingStrategy {
        live: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AcquisitionStrategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        async fn acquire(
            &self,
            request: &AcquireRequest,
            _progress: &ProgressReporter,
        ) -> Result<Option<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;
            let path = request.output_dir.join(format!("Clip-{}.mp4", request.id));
            let written = tokio::fs::write(&path, vec![0u8; 2048]).await;

            self.live.fetch_sub(1, Ordering::SeqCst);
            written?;
            Ok(Some(path))
        }
    }

    fn manager(
        dir: &Path,
        strategies: Vec<Arc<dyn AcquisitionStrategy>>,
        store: Arc<dyn VideoStore>,
        resolver_fails: bool,
    ) -> DownloadManager {
        manager_with_pool(dir, 2, strategies, store, resolver_fails)
    }

    fn manager_with_pool(
        dir: &Path,
        pool: usize,
        strategies: Vec<Arc<dyn AcquisitionStrategy>>,
        store: Arc<dyn VideoStore>,
        resolver_fails: bool,
    ) -> DownloadManager {
        let config = LibraryConfig {
            media_path: dir.to_path_buf(),
            max_concurrent_downloads: pool,
            ..LibraryConfig::default()
        };
        DownloadManager::new(
            &config,
            StrategyChain::new(strategies, config.min_file_size),
            Arc::new(StubResolver { fail: resolver_fails }),
            store,
        )
    }

    async fn wait_until<F>(manager: &DownloadManager, task_id: &str, done: F) -> DownloadSnapshot
    where
        F: Fn(&DownloadSnapshot) -> bool,
    {
        for _ in 0..500 {
            let snapshot = manager.get_status(task_id).await.unwrap();
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not reach the expected state", task_id);
    }

    async fn wait_terminal(manager: &DownloadManager, task_id: &str) -> DownloadSnapshot {
        wait_until(manager, task_id, |s| s.status.is_terminal()).await
    }

    #[tokio::test]
    async fn start_returns_a_queryable_task() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedStrategy::new());
        let manager = manager(dir.path(), vec![gated.clone()], Arc::new(MemoryStore::new()), false);

        let task_id = manager.start_task(URL, "best").await.unwrap();
        let snapshot = manager.get_status(&task_id).await.unwrap();
        assert_eq!(snapshot.task_id, task_id);
        assert!(!snapshot.status.is_terminal());

        gated.started.notified().await;
        gated.release.notify_one();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Vec::new(), Arc::new(MemoryStore::new()), false);
        let err = manager.get_status("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!manager.cancel_task("missing").await);
    }

    #[tokio::test]
    async fn rejects_unsupported_sources() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Vec::new(), Arc::new(MemoryStore::new()), false);

        let err = manager.start_task("https://vimeo.com/123", "best").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSource(_)));
        assert!(manager.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn url_without_identifier_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Vec::new(), Arc::new(MemoryStore::new()), false);

        let task_id = manager
            .start_task("https://www.youtube.com/feed/trending", "best")
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some(ID_EXTRACTION_FAILED));
    }

    #[tokio::test]
    async fn existing_record_skips_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Old-dQw4w9WgXcQ.mp4");
        std::fs::write(&file, vec![0u8; 2048]).unwrap();
        let id = ContentId::parse("dQw4w9WgXcQ").unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .insert(VideoRecord::from_download(&file, &id, None).await.unwrap())
            .await
            .unwrap();

        let strategy = Arc::new(ScriptedStrategy::new("never", Script::Write("New", 2048)));
        let manager = manager(dir.path(), vec![strategy.clone()], store, false);

        let task_id = manager.start_task(URL, "best").await.unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(snapshot.error.as_deref(), Some(ALREADY_IN_LIBRARY));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_and_records_the_video() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = manager(
            dir.path(),
            vec![
                Arc::new(ScriptedStrategy::new("broken", Script::Fail("network unreachable"))),
                Arc::new(ScriptedStrategy::new("tiny", Script::Write("Tiny", 10))),
                Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 2048))),
            ],
            store.clone(),
            false,
        );

        let task_id = manager.start_task(URL, "720p").await.unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;

        let expected = dir.path().join("Good-dQw4w9WgXcQ.mp4").to_string_lossy().to_string();
        assert_eq!(snapshot.status, DownloadStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.filename.as_deref(), Some(expected.as_str()));
        assert!(!dir.path().join("Tiny-dQw4w9WgXcQ.mp4").exists());

        let id = ContentId::parse("dQw4w9WgXcQ").unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.title, "Never Gonna Give You Up");
        assert_eq!(record.file_size, 2048);
    }

    #[tokio::test]
    async fn exhausted_chain_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            dir.path(),
            vec![
                Arc::new(ScriptedStrategy::new("first", Script::Fail("403"))),
                Arc::new(ScriptedStrategy::new("second", Script::Nothing)),
            ],
            Arc::new(MemoryStore::new()),
            false,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Error);
        let error = snapshot.error.unwrap();
        assert!(error.starts_with("All download methods failed"));
        assert!(error.contains("first"));
        assert!(error.contains("second"));
    }

    #[tokio::test]
    async fn persistence_failure_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            dir.path(),
            vec![Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 4096)))],
            Arc::new(ReadOnlyStore),
            false,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Completed);
        assert!(snapshot.filename.is_some());
        assert!(dir.path().join("Good-dQw4w9WgXcQ.mp4").exists());
    }

    #[tokio::test]
    async fn metadata_failure_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = manager(
            dir.path(),
            vec![Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 4096)))],
            store.clone(),
            true,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        let snapshot = wait_terminal(&manager, &task_id).await;
        assert_eq!(snapshot.status, DownloadStatus::Completed);

        let id = ContentId::parse("dQw4w9WgXcQ").unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.title, "Good-dQw4w9WgXcQ");
        assert_eq!(record.channel_name, "Unknown Channel");
    }

    #[tokio::test]
    async fn cancellation_sticks_while_work_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedStrategy::new());
        let later = Arc::new(ScriptedStrategy::new("later", Script::Write("Later", 2048)));
        let manager = manager(
            dir.path(),
            vec![gated.clone(), later],
            Arc::new(MemoryStore::new()),
            false,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        gated.started.notified().await;

        assert!(manager.cancel_task(&task_id).await);
        gated.release.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = manager.get_status(&task_id).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some(CANCELLED_BY_USER));
    }

    #[tokio::test]
    async fn cancelling_a_finished_task_overwrites_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            dir.path(),
            vec![Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 2048)))],
            Arc::new(MemoryStore::new()),
            false,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        wait_terminal(&manager, &task_id).await;

        assert!(manager.cancel_task(&task_id).await);
        let snapshot = manager.get_status(&task_id).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_start_for_same_video_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedStrategy::new());
        let manager = manager(dir.path(), vec![gated.clone()], Arc::new(MemoryStore::new()), false);

        let first = manager.start_task(URL, "best").await.unwrap();
        gated.started.notified().await;
        let second = manager.start_task("https://youtu.be/dQw4w9WgXcQ", "best").await.unwrap();

        let duplicate = wait_terminal(&manager, &second).await;
        assert_eq!(duplicate.status, DownloadStatus::Completed);
        assert_eq!(duplicate.error.as_deref(), Some(ALREADY_IN_PROGRESS));

        gated.release.notify_one();
        let original = wait_terminal(&manager, &first).await;
        assert_eq!(original.status, DownloadStatus::Completed);
        assert_eq!(original.error, None);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_drops_only_old_finished_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            dir.path(),
            vec![Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 2048)))],
            Arc::new(MemoryStore::new()),
            false,
        );

        let task_id = manager.start_task(URL, "best").await.unwrap();
        wait_terminal(&manager, &task_id).await;

        assert_eq!(manager.cleanup_finished(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.cleanup_finished(Duration::from_millis(1)).await, 1);
        assert!(manager.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn tasks_are_listed_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Vec::new(), Arc::new(MemoryStore::new()), false);

        let first = manager.start_task(URL, "best").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.start_task("https://youtu.be/aaaaaaaaaaa", "audio").await.unwrap();

        let ids: Vec<String> = manager.list_tasks().await.into_iter().map(|s| s.task_id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn slow_library_lookup_does_not_let_a_duplicate_through() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedStrategy::new());
        let store = Arc::new(SlowLookupStore::new());
        let manager = manager(dir.path(), vec![gated.clone()], store.clone(), false);

        let first = manager.start_task(URL, "best").await.unwrap();
        let second = manager.start_task("https://youtu.be/dQw4w9WgXcQ", "best").await.unwrap();

        gated.started.notified().await;
        gated.release.notify_one();
        let a = wait_terminal(&manager, &first).await;
        store.release_later_lookups.notify_one();
        let b = wait_terminal(&manager, &second).await;

        let duplicates = [&a, &b]
            .iter()
            .filter(|s| s.error.as_deref() == Some(ALREADY_IN_PROGRESS))
            .count();
        assert_eq!(a.status, DownloadStatus::Completed);
        assert_eq!(b.status, DownloadStatus::Completed);
        assert_eq!(duplicates, 1);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrent_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let counting = Arc::new(CountingStrategy::default());
        let manager = manager_with_pool(
            dir.path(),
            3,
            vec![counting.clone()],
            Arc::new(MemoryStore::new()),
            false,
        );

        let mut task_ids = Vec::new();
        for i in 0..6 {
            let url = format!("https://youtu.be/clip{:07}", i);
            task_ids.push(manager.start_task(&url, "best").await.unwrap());
        }

        for task_id in &task_ids {
            let snapshot = wait_terminal(&manager, task_id).await;
            assert_eq!(snapshot.status, DownloadStatus::Completed);
            assert_eq!(snapshot.error, None);
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 6);
        assert_eq!(counting.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelling_a_queued_task_skips_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(GatedStrategy::new());
        let manager = manager_with_pool(
            dir.path(),
            1,
            vec![gated.clone()],
            Arc::new(MemoryStore::new()),
            false,
        );

        let running = manager.start_task(URL, "best").await.unwrap();
        gated.started.notified().await;
        let queued = manager.start_task("https://youtu.be/aaaaaaaaaaa", "best").await.unwrap();
        assert_eq!(manager.get_status(&queued).await.unwrap().status, DownloadStatus::Pending);

        assert!(manager.cancel_task(&queued).await);
        gated.release.notify_one();
        wait_terminal(&manager, &running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = manager.get_status(&queued).await.unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some(CANCELLED_BY_USER));
        assert_eq!(snapshot.progress, 0.0);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
    }
}
