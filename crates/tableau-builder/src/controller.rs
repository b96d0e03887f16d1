//! Lifecycle controller that drives one builder backend.
//!
//! The controller owns the run-scoped state a backend needs: the resolved
//! configuration, the build cache, the current phase and the cancellation
//! token of the in-flight run.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tableau_presets::{ConfigType, Presets};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cache::BuildCache;
use crate::config::BundleConfig;
use crate::output::DevMount;
use crate::stats::BuildStats;
use crate::traits::{BuildArgs, Builder, BuilderError, StartArgs};

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ConfigResolved,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::ConfigResolved => "config-resolved",
            Phase::Running => "running",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Lifecycle {
    phase: Mutex<Phase>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            cancel: Mutex::new(None),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, phase: Phase) {
        *self.phase() = phase;
    }

    /// Enter `Running` with a fresh token, refusing if a run is in flight.
    fn begin(&self) -> Result<CancellationToken, BuilderError> {
        let mut phase = self.phase();
        if *phase == Phase::Running {
            return Err(BuilderError::AlreadyRunning);
        }
        *phase = Phase::Running;

        let token = CancellationToken::new();
        *self.cancel_slot() = Some(token.clone());
        Ok(token)
    }

    fn finish(&self, phase: Phase) {
        self.set(phase);
        self.cancel_slot().take();
    }
}

/// Handle that stops a dev session started by [`BuilderController::start`].
///
/// Cloneable and safe to call any number of times.
#[derive(Clone)]
pub struct BailHandle {
    builder: Arc<dyn Builder>,
    lifecycle: Arc<Lifecycle>,
}

impl BailHandle {
    pub async fn bail(&self, reason: Option<String>) -> Result<(), BuilderError> {
        let token = self.lifecycle.cancel_slot().take();

        match token {
            Some(token) => {
                tracing::info!(
                    reason = reason.as_deref().unwrap_or("requested"),
                    "Stopping {} builder",
                    self.builder.name()
                );
                token.cancel();
                self.lifecycle.set(Phase::Aborted);
            }
            None => tracing::debug!("Nothing in flight for {} builder", self.builder.name()),
        }

        self.builder.bail(reason).await
    }
}

impl fmt::Debug for BailHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BailHandle")
            .field("builder", &self.builder.name())
            .finish()
    }
}

/// Result of [`BuilderController::start`].
#[derive(Debug)]
pub struct StartOutcome {
    /// Stats of the initial compilation, when the backend reports one
    pub stats: Option<BuildStats>,
    pub total_time: Duration,
    pub bail: BailHandle,
}

/// Result of [`BuilderController::build`].
#[derive(Debug)]
pub struct BuildOutcome {
    pub stats: Option<BuildStats>,
    pub total_time: Duration,
}

impl BuildOutcome {
    pub fn has_errors(&self) -> bool {
        self.stats.as_ref().is_some_and(BuildStats::has_errors)
    }
}

/// Drives a [`Builder`] through `get_config`, `start`/`build` and `bail`.
pub struct BuilderController {
    builder: Arc<dyn Builder>,
    presets: Presets,
    cache: Arc<BuildCache>,
    config: OnceCell<Arc<BundleConfig>>,
    lifecycle: Arc<Lifecycle>,
}

impl BuilderController {
    /// Create a controller and lock the build cache for this run.
    pub fn new(builder: Arc<dyn Builder>, presets: Presets) -> Result<Self, BuilderError> {
        let cache = BuildCache::open(&presets.options().cache_dir)?;

        Ok(Self {
            builder,
            presets,
            cache: Arc::new(cache),
            config: OnceCell::new(),
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    pub fn builder_name(&self) -> &'static str {
        self.builder.name()
    }

    pub fn presets(&self) -> &Presets {
        &self.presets
    }

    pub fn phase(&self) -> Phase {
        *self.lifecycle.phase()
    }

    pub fn config_type(&self) -> ConfigType {
        self.presets.options().config_type
    }

    pub fn config_dir(&self) -> &Path {
        &self.presets.options().config_dir
    }

    pub fn docs_mode(&self) -> bool {
        self.presets.options().docs_mode
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    /// Resolve the backend configuration once; later calls return the
    /// memoized value without touching the presets again.
    pub async fn get_config(&self) -> Result<Arc<BundleConfig>, BuilderError> {
        let config = self
            .config
            .get_or_try_init(|| async {
                tracing::debug!("Resolving {} builder config", self.builder.name());
                self.builder.get_config(&self.presets).await.map(Arc::new)
            })
            .await?;

        let mut phase = self.lifecycle.phase();
        if *phase == Phase::Idle {
            *phase = Phase::ConfigResolved;
        }

        Ok(Arc::clone(config))
    }

    /// Start a dev session attached to `mount`.
    ///
    /// Returns once the backend is watching; the session runs until bailed.
    pub async fn start(&self, mount: Arc<dyn DevMount>) -> Result<StartOutcome, BuilderError> {
        let start_time = Instant::now();
        let config = self.get_config().await?;
        let cancel = self.lifecycle.begin()?;

        let args = StartArgs {
            options: Arc::clone(self.presets.options()),
            config,
            start_time,
            cache: Arc::clone(&self.cache),
            mount,
            cancel: cancel.clone(),
        };

        match self.builder.start(args).await {
            Ok(result) => {
                let (stats, total_time) = match result {
                    Some(result) => (Some(result.stats), result.total_time),
                    None => (None, start_time.elapsed()),
                };

                Ok(StartOutcome {
                    stats,
                    total_time,
                    bail: self.bail_handle(),
                })
            }
            Err(e) => {
                self.lifecycle
                    .finish(if cancel.is_cancelled() { Phase::Aborted } else { Phase::Failed });
                Err(e)
            }
        }
    }

    /// Run a production build to completion.
    ///
    /// Compile errors are reported in the returned stats and leave the
    /// controller `Failed`; only infrastructure failures are `Err`.
    pub async fn build(&self) -> Result<BuildOutcome, BuilderError> {
        let start_time = Instant::now();
        let config = self.get_config().await?;
        let cancel = self.lifecycle.begin()?;

        let args = BuildArgs {
            options: Arc::clone(self.presets.options()),
            config,
            start_time,
            cache: Arc::clone(&self.cache),
            cancel: cancel.clone(),
        };

        let result = self.builder.build(args).await;

        if cancel.is_cancelled() || matches!(result, Err(BuilderError::Aborted)) {
            self.lifecycle.finish(Phase::Aborted);
            return Err(BuilderError::Aborted);
        }

        match result {
            Ok(stats) => {
                let failed = stats.as_ref().is_some_and(BuildStats::has_errors);
                self.lifecycle
                    .finish(if failed { Phase::Failed } else { Phase::Succeeded });

                Ok(BuildOutcome {
                    stats,
                    total_time: start_time.elapsed(),
                })
            }
            Err(e) => {
                self.lifecycle.finish(Phase::Failed);
                Err(e)
            }
        }
    }

    /// Stop any in-flight run. A no-op when nothing is running.
    pub async fn bail(&self, reason: Option<String>) -> Result<(), BuilderError> {
        self.bail_handle().bail(reason).await
    }

    pub fn bail_handle(&self) -> BailHandle {
        BailHandle {
            builder: Arc::clone(&self.builder),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl fmt::Debug for BuilderController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderController")
            .field("builder", &self.builder.name())
            .field("phase", &self.phase())
            .field("presets", &self.presets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use tableau_presets::OptionsBuilder;
    use tempfile::tempdir;

    use crate::output::{DevEvent, EmittedFile};
    use crate::traits::StartResult;

    #[derive(Default)]
    struct CountingBuilder {
        configs: AtomicUsize,
        bails: AtomicUsize,
        fail_compile: bool,
    }

    #[async_trait]
    impl Builder for CountingBuilder {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn get_config(&self, presets: &Presets) -> Result<BundleConfig, BuilderError> {
            self.configs.fetch_add(1, Ordering::SeqCst);
            Ok(BundleConfig::seed(presets.options()))
        }

        async fn start(&self, args: StartArgs) -> Result<Option<StartResult>, BuilderError> {
            args.mount.publish(vec![EmittedFile::new("index.html", "ok")]);
            Ok(Some(StartResult {
                stats: BuildStats::default(),
                total_time: args.start_time.elapsed(),
            }))
        }

        async fn build(&self, _args: BuildArgs) -> Result<Option<BuildStats>, BuilderError> {
            let mut stats = BuildStats::default();
            if self.fail_compile {
                stats.errors.push("Module not found: ./missing.js".to_string());
            }
            Ok(Some(stats))
        }

        async fn bail(&self, _reason: Option<String>) -> Result<(), BuilderError> {
            self.bails.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullMount;

    impl DevMount for NullMount {
        fn publish(&self, _files: Vec<EmittedFile>) {}
        fn notify(&self, _event: DevEvent) {}
    }

    fn controller(builder: Arc<CountingBuilder>, dir: &Path) -> BuilderController {
        let options = OptionsBuilder::new(dir, ConfigType::Production)
            .cache_dir(dir.join("cache"))
            .build()
            .unwrap();
        BuilderController::new(builder, Presets::new(Vec::new(), Arc::new(options))).unwrap()
    }

    #[tokio::test]
    async fn config_is_resolved_once() {
        let temp = tempdir().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let controller = controller(Arc::clone(&builder), temp.path());

        assert_eq!(controller.phase(), Phase::Idle);

        controller.get_config().await.unwrap();
        controller.get_config().await.unwrap();
        controller.build().await.unwrap();

        assert_eq!(builder.configs.load(Ordering::SeqCst), 1);
        assert_eq!(controller.phase(), Phase::Succeeded);
    }

    #[tokio::test]
    async fn compile_errors_fail_without_err() {
        let temp = tempdir().unwrap();
        let builder = Arc::new(CountingBuilder {
            fail_compile: true,
            ..Default::default()
        });
        let controller = controller(builder, temp.path());

        let outcome = controller.build().await.unwrap();

        assert!(outcome.has_errors());
        assert_eq!(controller.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn bail_when_idle_is_a_no_op() {
        let temp = tempdir().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let controller = controller(Arc::clone(&builder), temp.path());

        controller.bail(None).await.unwrap();

        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn start_while_running_is_refused() {
        let temp = tempdir().unwrap();
        let builder = Arc::new(CountingBuilder::default());
        let controller = controller(Arc::clone(&builder), temp.path());

        let outcome = controller.start(Arc::new(NullMount)).await.unwrap();
        assert_eq!(controller.phase(), Phase::Running);

        assert!(matches!(
            controller.build().await,
            Err(BuilderError::AlreadyRunning)
        ));

        outcome.bail.bail(Some("shutdown".into())).await.unwrap();
        outcome.bail.bail(None).await.unwrap();

        assert_eq!(controller.phase(), Phase::Aborted);
        assert_eq!(builder.bails.load(Ordering::SeqCst), 2);
    }
}
