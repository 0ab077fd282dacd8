//! Model Resolver
//!
//! Chooses the backend for the whole process, at most once. Resolution order:
//!
//! 1. the compact artifact, if present and loadable
//! 2. the graph artifact, fetching the real file first when only a pointer is
//!    checked out, then loading strictly and again with compatibility shims
//! 3. otherwise `Unavailable`, which puts every prediction in demo mode
//!
//! The outcome, including `Unavailable`, is memoized; nothing is retried until
//! the process restarts. Concurrent first callers share one attempt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{default_device, GraphBackend, GraphDevice};
use crate::config::ModelConfig;
use crate::model::compact::CompactModel;
use crate::model::fetch::{is_pointer_file, ArtifactFetcher};
use crate::model::graph::{load_graph_model, GraphModel};
use crate::model::shims::ShimTable;
use crate::model::BackendHandle;
use crate::utils::error::{DermaError, Result};

/// Lifecycle of the process-wide backend slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverState {
    NotAttempted,
    Attempting,
    LoadedCompact,
    LoadedGraph,
    Unavailable,
}

impl ResolverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolverState::LoadedCompact | ResolverState::LoadedGraph | ResolverState::Unavailable
        )
    }
}

impl std::fmt::Display for ResolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolverState::NotAttempted => "not_attempted",
            ResolverState::Attempting => "attempting",
            ResolverState::LoadedCompact => "loaded_compact",
            ResolverState::LoadedGraph => "loaded_graph",
            ResolverState::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Filesystem access and backend construction used by the resolver
///
/// Loading methods are blocking; the resolver runs them off the async runtime.
pub trait BackendLoader: Send + Sync + 'static {
    fn artifact_exists(&self, path: &Path) -> bool;

    /// Whether the artifact is a pointer left by large-file storage
    fn is_placeholder(&self, path: &Path) -> Result<bool>;

    fn load_compact(&self, path: &Path) -> Result<CompactModel>;

    /// Load the graph model, retrying once with compatibility shims
    fn load_graph(&self, path: &Path) -> Result<GraphModel<GraphBackend>>;
}

/// Loader backed by the real filesystem and runtimes
#[derive(Debug, Clone)]
pub struct FsBackendLoader {
    shims: ShimTable,
    device: GraphDevice,
}

impl Default for FsBackendLoader {
    fn default() -> Self {
        Self {
            shims: ShimTable::standard(),
            device: default_device(),
        }
    }
}

impl FsBackendLoader {
    pub fn new(shims: ShimTable) -> Self {
        Self {
            shims,
            device: default_device(),
        }
    }
}

impl BackendLoader for FsBackendLoader {
    fn artifact_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_placeholder(&self, path: &Path) -> Result<bool> {
        is_pointer_file(path)
    }

    fn load_compact(&self, path: &Path) -> Result<CompactModel> {
        CompactModel::load(path)
    }

    fn load_graph(&self, path: &Path) -> Result<GraphModel<GraphBackend>> {
        let (model, shimmed) = load_graph_model(path, &self.shims, &self.device)?;
        if shimmed {
            info!("Graph model loaded with compatibility shims");
        }
        Ok(model)
    }
}

/// The one resolution attempt, shared by every caller
type SharedAttempt = Shared<BoxFuture<'static, BackendHandle>>;

/// Process-wide, single-flight backend slot
pub struct ModelResolver {
    inner: Arc<ResolverInner>,
    attempt: OnceLock<SharedAttempt>,
}

/// What the spawned attempt needs; outlives any single caller
struct ResolverInner {
    config: ModelConfig,
    loader: Arc<dyn BackendLoader>,
    fetcher: Arc<dyn ArtifactFetcher>,
    outcome: OnceLock<BackendHandle>,
}

impl ModelResolver {
    pub fn new(
        config: ModelConfig,
        loader: Arc<dyn BackendLoader>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                config,
                loader,
                fetcher,
                outcome: OnceLock::new(),
            }),
            attempt: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// Return the memoized backend, resolving it on the first call
    ///
    /// The attempt runs on its own task, so dropping a caller mid-resolution
    /// never abandons or restarts it.
    pub async fn resolve(&self) -> BackendHandle {
        if let Some(handle) = self.inner.outcome.get() {
            return handle.clone();
        }
        let attempt = self.attempt.get_or_init(|| self.spawn_attempt()).clone();
        attempt.await
    }

    fn spawn_attempt(&self) -> SharedAttempt {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move { inner.attempt().await }
        });

        async move {
            match task.await {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Model resolution task failed: {}", e);
                    inner.outcome.get_or_init(|| BackendHandle::Unavailable).clone()
                }
            }
        }
        .boxed()
        .shared()
    }

    /// The backend if resolution already finished; never triggers loading
    pub fn peek(&self) -> Option<BackendHandle> {
        self.inner.outcome.get().cloned()
    }

    /// Current lifecycle state; never triggers loading
    pub fn state(&self) -> ResolverState {
        match self.inner.outcome.get() {
            Some(BackendHandle::Compact(_)) => ResolverState::LoadedCompact,
            Some(BackendHandle::Graph(_)) => ResolverState::LoadedGraph,
            Some(BackendHandle::Unavailable) => ResolverState::Unavailable,
            None if self.attempt.get().is_some() => ResolverState::Attempting,
            None => ResolverState::NotAttempted,
        }
    }
}

impl ResolverInner {
    /// Runs once per process and records its outcome before returning
    async fn attempt(&self) -> BackendHandle {
        let start = Instant::now();
        info!("Resolving model backend");

        let handle = match self.try_compact().await {
            Some(handle) => handle,
            None => self.try_graph().await,
        };

        match &handle {
            BackendHandle::Unavailable => {
                warn!("No usable model found, serving predictions in demo mode")
            }
            loaded => info!(
                "Model ready in {:.2}s: {}",
                start.elapsed().as_secs_f64(),
                loaded.describe()
            ),
        }
        self.outcome.get_or_init(|| handle).clone()
    }

    async fn try_compact(&self) -> Option<BackendHandle> {
        let path = self.config.compact_path.clone();
        if !self.loader.artifact_exists(&path) {
            info!("Compact model not found at {}", path.display());
            return None;
        }

        info!("Loading compact model from {}", path.display());
        let loader = Arc::clone(&self.loader);
        match run_blocking(move || loader.load_compact(&path)).await {
            Ok(model) => Some(BackendHandle::compact(model)),
            Err(e) => {
                warn!("Compact model failed to load, falling back: {}", e);
                None
            }
        }
    }

    async fn try_graph(&self) -> BackendHandle {
        let path = self.config.graph_path.clone();
        if !self.loader.artifact_exists(&path) {
            info!("Graph model not found at {}", path.display());
            return BackendHandle::Unavailable;
        }

        match self.loader.is_placeholder(&path) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(e) = self.replace_placeholder(&path).await {
                    error!("Could not fetch the real graph model: {}", e);
                    return BackendHandle::Unavailable;
                }
            }
            Err(e) => {
                error!("Could not inspect {}: {}", path.display(), e);
                return BackendHandle::Unavailable;
            }
        }

        info!("Loading graph model from {}", path.display());
        let loader = Arc::clone(&self.loader);
        match run_blocking(move || loader.load_graph(&path)).await {
            Ok(model) => BackendHandle::graph(model),
            Err(e) => {
                error!("Graph model failed to load: {}", e);
                BackendHandle::Unavailable
            }
        }
    }

    async fn replace_placeholder(&self, path: &Path) -> Result<()> {
        warn!("{} is a storage pointer, not a model", path.display());
        let url = self
            .config
            .download_url
            .as_deref()
            .ok_or_else(|| DermaError::Download("no download URL configured".to_string()))?;

        let bytes = self.fetcher.fetch(url, path).await?;
        info!("Fetched graph model ({} bytes)", bytes);
        Ok(())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DermaError::Model(format!("loader task failed: {}", e)))?
}

impl std::fmt::Debug for ModelResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResolver")
            .field("compact_path", &self.inner.config.compact_path)
            .field("graph_path", &self.inner.config.graph_path)
            .field("state", &self.state())
            .finish()
    }
}

/// Paths the resolver looks at, in order
pub fn candidate_paths(config: &ModelConfig) -> [PathBuf; 2] {
    [config.compact_path.clone(), config.graph_path.clone()]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::model::test_support::{constant_graph_model, constant_graph_writer};

    #[derive(Default)]
    struct Counts {
        exists: AtomicUsize,
        placeholder: AtomicUsize,
        compact: AtomicUsize,
        graph: AtomicUsize,
    }

    /// Loader stub that counts every call
    struct StubLoader {
        present: HashSet<PathBuf>,
        placeholder: bool,
        graph_ok: bool,
        load_delay: Duration,
        counts: Arc<Counts>,
    }

    impl StubLoader {
        fn new(present: &[&PathBuf]) -> Self {
            Self {
                present: present.iter().map(|p| (*p).clone()).collect(),
                placeholder: false,
                graph_ok: true,
                load_delay: Duration::ZERO,
                counts: Arc::new(Counts::default()),
            }
        }
    }

    impl BackendLoader for StubLoader {
        fn artifact_exists(&self, path: &Path) -> bool {
            self.counts.exists.fetch_add(1, Ordering::SeqCst);
            self.present.contains(path)
        }

        fn is_placeholder(&self, _path: &Path) -> Result<bool> {
            self.counts.placeholder.fetch_add(1, Ordering::SeqCst);
            Ok(self.placeholder)
        }

        fn load_compact(&self, _path: &Path) -> Result<CompactModel> {
            self.counts.compact.fetch_add(1, Ordering::SeqCst);
            Err(DermaError::Model("stub compact model is corrupt".to_string()))
        }

        fn load_graph(&self, _path: &Path) -> Result<GraphModel<GraphBackend>> {
            self.counts.graph.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.load_delay);
            if self.graph_ok {
                Ok(constant_graph_model(0.9))
            } else {
                Err(DermaError::Model("stub graph model is corrupt".to_string()))
            }
        }
    }

    struct StubFetcher {
        succeed: bool,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ArtifactFetcher for StubFetcher {
        fn fetch<'a>(&'a self, _url: &'a str, _dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.succeed {
                    Ok(1024)
                } else {
                    Err(DermaError::Download("connection reset".to_string()))
                }
            })
        }
    }

    fn config() -> ModelConfig {
        ModelConfig::in_dir("/nonexistent/models")
            .with_download_url(Some("http://models.invalid/model.dvg".to_string()))
    }

    fn resolver(loader: StubLoader, fetcher: Arc<StubFetcher>) -> ModelResolver {
        ModelResolver::new(config(), Arc::new(loader), fetcher)
    }

    #[tokio::test]
    async fn test_no_artifacts_is_unavailable() {
        let loader = StubLoader::new(&[]);
        let counts = Arc::clone(&loader.counts);
        let resolver = resolver(loader, StubFetcher::new(false));

        assert_eq!(resolver.state(), ResolverState::NotAttempted);
        assert!(resolver.peek().is_none());

        let handle = resolver.resolve().await;
        assert!(matches!(handle, BackendHandle::Unavailable));
        assert_eq!(resolver.state(), ResolverState::Unavailable);
        assert_eq!(counts.exists.load(Ordering::SeqCst), 2);
        assert_eq!(counts.compact.load(Ordering::SeqCst), 0);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let cfg = config();
        let loader = StubLoader::new(&[&cfg.graph_path]);
        let counts = Arc::clone(&loader.counts);
        let resolver = resolver(loader, StubFetcher::new(false));

        for _ in 0..10 {
            assert!(matches!(resolver.resolve().await, BackendHandle::Graph(_)));
        }
        assert_eq!(resolver.state(), ResolverState::LoadedGraph);
        assert_eq!(counts.exists.load(Ordering::SeqCst), 2);
        assert_eq!(counts.placeholder.load(Ordering::SeqCst), 1);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_memoized() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.graph_ok = false;
        let counts = Arc::clone(&loader.counts);
        let resolver = resolver(loader, StubFetcher::new(false));

        for _ in 0..5 {
            assert!(!resolver.resolve().await.is_loaded());
        }
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compact_failure_falls_back_to_graph() {
        let cfg = config();
        let loader = StubLoader::new(&[&cfg.compact_path, &cfg.graph_path]);
        let counts = Arc::clone(&loader.counts);
        let resolver = resolver(loader, StubFetcher::new(false));

        let handle = resolver.resolve().await;
        assert!(matches!(handle, BackendHandle::Graph(_)));
        assert_eq!(counts.compact.load(Ordering::SeqCst), 1);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_calls_load_once() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.load_delay = Duration::from_millis(200);
        let counts = Arc::clone(&loader.counts);
        let resolver = Arc::new(resolver(loader, StubFetcher::new(false)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve().await })
            })
            .collect();

        for task in tasks {
            assert!(matches!(task.await.unwrap(), BackendHandle::Graph(_)));
        }
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
        assert_eq!(counts.exists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_first_caller_does_not_restart_load() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.load_delay = Duration::from_millis(300);
        let counts = Arc::clone(&loader.counts);
        let resolver = Arc::new(resolver(loader, StubFetcher::new(false)));

        let first = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(resolver.state(), ResolverState::Attempting);

        assert!(matches!(resolver.resolve().await, BackendHandle::Graph(_)));
        assert_eq!(resolver.state(), ResolverState::LoadedGraph);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
        assert_eq!(counts.exists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_attempt_still_completes() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.load_delay = Duration::from_millis(100);
        let resolver = Arc::new(resolver(loader, StubFetcher::new(false)));

        let first = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();

        // Nobody awaits the attempt any more; it finishes on its own task.
        let mut state = resolver.state();
        for _ in 0..50 {
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = resolver.state();
        }
        assert_eq!(state, ResolverState::LoadedGraph);
        assert!(resolver.peek().is_some());
    }

    #[tokio::test]
    async fn test_placeholder_with_failing_fetch() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.placeholder = true;
        let counts = Arc::clone(&loader.counts);
        let fetcher = StubFetcher::new(false);
        let resolver = resolver(loader, Arc::clone(&fetcher));

        for _ in 0..3 {
            assert!(matches!(resolver.resolve().await, BackendHandle::Unavailable));
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.state(), ResolverState::Unavailable);
    }

    #[tokio::test]
    async fn test_placeholder_without_url_skips_fetch() {
        let cfg = config().with_download_url(None);
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.placeholder = true;
        let fetcher = StubFetcher::new(true);
        let resolver = ModelResolver::new(cfg, Arc::new(loader), Arc::clone(&fetcher) as _);

        assert!(matches!(resolver.resolve().await, BackendHandle::Unavailable));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_placeholder_fetched_then_loaded() {
        let cfg = config();
        let mut loader = StubLoader::new(&[&cfg.graph_path]);
        loader.placeholder = true;
        let counts = Arc::clone(&loader.counts);
        let fetcher = StubFetcher::new(true);
        let resolver = resolver(loader, Arc::clone(&fetcher));

        assert!(matches!(resolver.resolve().await, BackendHandle::Graph(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counts.graph.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fs_loader_with_real_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig::in_dir(dir.path()).with_download_url(None);
        constant_graph_writer(0.2).write_to(&cfg.graph_path).unwrap();

        let resolver = ModelResolver::new(
            cfg,
            Arc::new(FsBackendLoader::default()),
            StubFetcher::new(false),
        );
        let handle = resolver.resolve().await;
        assert!(matches!(handle, BackendHandle::Graph(_)));
        assert!(handle.describe().contains("constant"));
    }

    #[tokio::test]
    async fn test_fs_loader_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ModelResolver::new(
            ModelConfig::in_dir(dir.path()),
            Arc::new(FsBackendLoader::default()),
            StubFetcher::new(false),
        );
        assert!(!resolver.resolve().await.is_loaded());
        assert_eq!(resolver.state(), ResolverState::Unavailable);
    }

    #[tokio::test]
    async fn test_fs_loader_corrupt_compact_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig::in_dir(dir.path()).with_download_url(None);
        std::fs::write(&cfg.compact_path, b"corrupt").unwrap();
        constant_graph_writer(0.4).write_to(&cfg.graph_path).unwrap();

        let resolver = ModelResolver::new(
            cfg,
            Arc::new(FsBackendLoader::default()),
            StubFetcher::new(false),
        );
        assert_eq!(resolver.resolve().await.mode().as_str(), "production-graph");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ResolverState::LoadedGraph.to_string(), "loaded_graph");
        assert_eq!(
            serde_json::to_value(ResolverState::NotAttempted).unwrap(),
            "not_attempted"
        );
        assert!(ResolverState::Unavailable.is_terminal());
        assert!(!ResolverState::Attempting.is_terminal());
        let paths = candidate_paths(&config());
        assert!(paths[0].ends_with("skin_cancer_cnn.onnx"));
        assert!(paths[1].ends_with("skin_cancer_cnn.dvg"));
    }
}
