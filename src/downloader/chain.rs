use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures_util::FutureExt;
use crate::config::LibraryConfig;
use crate::errors::{AppError, Result};
use super::progress::ProgressReporter;
use super::strategies::default_strategies;
use super::{AcquireRequest, AcquisitionStrategy};

/// Progress shown once the chain starts, before any method reports.
pub const CHAIN_START_PROGRESS: f64 = 10.0;
const MILESTONE_STEP: f64 = 20.0;
const MILESTONE_CAP: f64 = 80.0;

/// Ordered list of acquisition methods, tried until one yields a usable file.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn AcquisitionStrategy>>,
    min_file_size: u64,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn AcquisitionStrategy>>, min_file_size: u64) -> Self {
        Self {
            strategies,
            min_file_size,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Result<Self> {
        Ok(Self::new(default_strategies(config)?, config.min_file_size))
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn acquire(
        &self,
        request: &AcquireRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let total = self.strategies.len();
        let mut attempts = Vec::with_capacity(total);

        if total == 0 {
            attempts.push("no download methods configured".to_string());
        }

        for (index, strategy) in self.strategies.iter().enumerate() {
            if progress.is_cancelled().await {
                log::info!(
                    "[CHAIN] Task {} cancelled, stopping before {}",
                    progress.task_id(),
                    strategy.name()
                );
                return Err(AppError::Cancelled(progress.task_id().to_string()));
            }

            let attempt = index + 1;
            progress.milestone(milestone(attempt)).await;
            log::info!("[CHAIN] Trying method {}/{}: {}", attempt, total, strategy.name());

            let outcome = AssertUnwindSafe(strategy.acquire(request, progress))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(Some(path))) => match validate_candidate(&path, self.min_file_size).await {
                    Ok(size) => {
                        log::info!(
                            "[CHAIN] {} produced {:?} ({} bytes)",
                            strategy.name(),
                            path,
                            size
                        );
                        return Ok(path);
                    }
                    Err(reason) => reason,
                },
                Ok(Ok(None)) => "produced no file".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(_) => "panicked".to_string(),
            };

            log::warn!("[CHAIN] {} failed: {}", strategy.name(), failure);
            attempts.push(format!("{}: {}", strategy.name(), failure));
        }

        Err(AppError::AllStrategiesFailed { attempts })
    }
}

/// Coarse progress for the n-th attempt (1-based). A strategy that reports
/// byte-level progress replaces this value, so progress can drop below it
/// within one attempt.
pub fn milestone(attempt: usize) -> f64 {
    (CHAIN_START_PROGRESS + attempt as f64 * MILESTONE_STEP).min(MILESTONE_CAP)
}

/// Accepts a candidate only if it exists and is strictly larger than
/// `min_size`. Undersized files are deleted.
async fn validate_candidate(path: &Path, min_size: u64) -> std::result::Result<u64, String> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| format!("file {:?} does not exist", path))?;

    let size = meta.len();
    if size <= min_size {
        if let Err(e) = tokio::fs::remove_file(path).await {
            log::warn!("[CHAIN] Could not remove undersized file {:?}: {}", path, e);
        }
        return Err(format!("file too small ({} bytes), removed", size));
    }
    Ok(size)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use crate::downloader::Quality;
    use crate::identifier::ContentId;

    /// What a scripted strategy does when invoked.
    #[derive(Clone)]
    pub enum Script {
        Fail(&'static str),
        Nothing,
        /// Writes a file of the given size named after the content id.
        Write(&'static str, usize),
        /// Returns a path that was never written.
        Phantom,
    }

    pub struct ScriptedStrategy {
        pub name: &'static str,
        pub script: Script,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedStrategy {
        pub fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                script,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AcquisitionStrategy for ScriptedStrategy {
        fn name(&self) -> &str {
            self.name
        }

        async fn acquire(
            &self,
            request: &AcquireRequest,
            _progress: &ProgressReporter,
        ) -> Result<Option<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Fail(msg) => Err(AppError::Strategy(msg.to_string())),
                Script::Nothing => Ok(None),
                Script::Write(title, size) => {
                    let path = request.output_dir.join(format!("{}-{}.mp4", title, request.id));
                    tokio::fs::write(&path, vec![0u8; *size]).await?;
                    Ok(Some(path))
                }
                Script::Phantom => {
                    Ok(Some(request.output_dir.join(format!("ghost-{}.mp4", request.id))))
                }
            }
        }
    }

    fn request(dir: &Path) -> AcquireRequest {
        AcquireRequest {
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            id: ContentId::parse("dQw4w9WgXcQ").unwrap(),
            quality: Quality::Best,
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn milestones_are_capped() {
        assert_eq!(milestone(1), 30.0);
        assert_eq!(milestone(2), 50.0);
        assert_eq!(milestone(3), 70.0);
        assert_eq!(milestone(4), 80.0);
        assert_eq!(milestone(9), 80.0);
    }

    #[tokio::test]
    async fn falls_through_to_first_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let phantom = Arc::new(ScriptedStrategy::new("phantom", Script::Phantom));
        let tiny = Arc::new(ScriptedStrategy::new("tiny", Script::Write("Tiny", 100)));
        let good = Arc::new(ScriptedStrategy::new("good", Script::Write("Good", 2048)));
        let unused = Arc::new(ScriptedStrategy::new("unused", Script::Write("Unused", 4096)));
        let chain = StrategyChain::new(
            vec![phantom.clone(), tiny.clone(), good.clone(), unused.clone()],
            1024,
        );

        let path = chain
            .acquire(&request(dir.path()), &ProgressReporter::detached())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("Good-dQw4w9WgXcQ.mp4"));
        assert!(!dir.path().join("Tiny-dQw4w9WgXcQ.mp4").exists());
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn file_of_exactly_min_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(
            vec![Arc::new(ScriptedStrategy::new("edge", Script::Write("Edge", 1024)))],
            1024,
        );
        let err = chain
            .acquire(&request(dir.path()), &ProgressReporter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AllStrategiesFailed { .. }));
        assert!(!dir.path().join("Edge-dQw4w9WgXcQ.mp4").exists());
    }

    #[tokio::test]
    async fn reports_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(
            vec![
                Arc::new(ScriptedStrategy::new("a", Script::Fail("boom"))),
                Arc::new(ScriptedStrategy::new("b", Script::Nothing)),
            ],
            1024,
        );

        match chain.acquire(&request(dir.path()), &ProgressReporter::detached()).await {
            Err(AppError::AllStrategiesFailed { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("a: "));
                assert!(attempts[0].contains("boom"));
                assert_eq!(attempts[1], "b: produced no file");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(Vec::new(), 1024);
        assert!(chain.is_empty());
        let err = chain
            .acquire(&request(dir.path()), &ProgressReporter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AllStrategiesFailed { .. }));
    }
}
