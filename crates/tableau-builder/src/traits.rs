//! Trait definitions for builder backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tableau_presets::{Options, PresetCatalog, PresetConfig, PresetError, Presets};
use tokio_util::sync::CancellationToken;

use crate::cache::{BuildCache, CacheError};
use crate::config::BundleConfig;
use crate::output::DevMount;
use crate::stats::BuildStats;

/// Arguments for starting a dev session.
#[derive(Clone)]
pub struct StartArgs {
    pub options: Arc<Options>,

    /// Configuration resolved by `get_config`; never re-resolved
    pub config: Arc<BundleConfig>,

    pub start_time: Instant,
    pub cache: Arc<BuildCache>,

    /// Dev server surface to publish into
    pub mount: Arc<dyn DevMount>,

    /// Cancelled when the session is bailed
    pub cancel: CancellationToken,
}

/// Arguments for a one-shot production build.
#[derive(Clone)]
pub struct BuildArgs {
    pub options: Arc<Options>,
    pub config: Arc<BundleConfig>,
    pub start_time: Instant,
    pub cache: Arc<BuildCache>,
    pub cancel: CancellationToken,
}

/// What a backend reports once a dev session has begun.
#[derive(Debug, Clone)]
pub struct StartResult {
    pub stats: BuildStats,
    pub total_time: Duration,
}

/// Errors that can occur while configuring or running a builder.
///
/// Compile errors are not represented here; they are reported in
/// [`BuildStats::errors`].
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Unknown builder `{name}` (available: {})", known.join(", "))]
    UnknownBuilder { name: String, known: Vec<String> },

    #[error("A build is already running")]
    AlreadyRunning,

    #[error("Build aborted")]
    Aborted,

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render template: {0}")]
    Template(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Build task failed: {0}")]
    Task(String),
}

/// Contract every build backend implements.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Backend identifier matched against `core.builder` (e.g., "bundle")
    fn name(&self) -> &'static str;

    /// Presets folded in ahead of framework and user presets.
    fn core_presets(&self) -> Vec<PresetConfig> {
        Vec::new()
    }

    /// Presets folded in after user presets.
    fn override_presets(&self) -> Vec<PresetConfig> {
        Vec::new()
    }

    /// Register the presets named by `core_presets`/`override_presets`.
    fn register_presets(&self, _catalog: &mut PresetCatalog) {}

    /// Resolve the backend configuration. Must not start a build.
    async fn get_config(&self, presets: &Presets) -> Result<BundleConfig, BuilderError>;

    /// Begin a watching dev session and return once it is running.
    async fn start(&self, args: StartArgs) -> Result<Option<StartResult>, BuilderError>;

    /// Run a production build to completion.
    async fn build(&self, args: BuildArgs) -> Result<Option<BuildStats>, BuilderError>;

    /// Stop any in-flight work. Safe to call when idle and more than once.
    async fn bail(&self, reason: Option<String>) -> Result<(), BuilderError>;
}
