//! The `bundle` builder backend.
//!
//! Compiles stories and entry modules into a self-contained static bundle:
//! a manager page, a preview frame and the modules they load.

mod assets;
mod compiler;
mod glob;
mod stories;
mod templates;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tableau_presets::{
    extension, ExtensionHandler, Options, PresetCatalog, PresetConfig, PresetDefinition, Presets,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::{resolve_config, BundleConfig};
use crate::output::{write_files, DevEvent, DevMount};
use crate::stats::BuildStats;
use crate::traits::{BuildArgs, Builder, BuilderError, StartArgs, StartResult};
use crate::watcher::FileWatcher;

pub use compiler::{Compilation, Compiler, VIRTUAL_PREFIX};
pub use glob::StoryGlob;
pub use stories::{StoryEntry, StoryFile};

/// Defaults the bundle backend folds in ahead of framework and user presets.
pub const BUNDLE_PRESET: &str = "tableau-builder-bundle/preset";

/// Settings the bundle backend forces after user presets.
pub const BUNDLE_OVERRIDE: &str = "tableau-builder-bundle/override";

/// Preview runtime module, always the first preview entry.
pub const RUNTIME_ENTRY: &str = "virtual:tableau/runtime";

const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

struct DevSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Builder backend producing a static manager + preview bundle.
#[derive(Default)]
pub struct BundleBuilder {
    session: Mutex<Option<DevSession>>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Builder for BundleBuilder {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn core_presets(&self) -> Vec<PresetConfig> {
        vec![PresetConfig::from(BUNDLE_PRESET)]
    }

    fn override_presets(&self) -> Vec<PresetConfig> {
        vec![PresetConfig::from(BUNDLE_OVERRIDE)]
    }

    fn register_presets(&self, catalog: &mut PresetCatalog) {
        catalog.register(BUNDLE_PRESET, |_options, _preset_options| Ok(bundle_preset()));
        catalog.register(BUNDLE_OVERRIDE, |options, _preset_options| {
            Ok(override_preset(options))
        });
    }

    async fn get_config(&self, presets: &Presets) -> Result<BundleConfig, BuilderError> {
        resolve_config(presets).await
    }

    async fn start(&self, args: StartArgs) -> Result<Option<StartResult>, BuilderError> {
        // A new session replaces any previous one
        self.bail(None).await?;

        let compiler = Arc::new(Compiler::new(Arc::clone(&args.config))?);
        let compilation = tokio::select! {
            biased;
            _ = args.cancel.cancelled() => return Err(BuilderError::Aborted),
            result = compiler.compile(&args.cache) => result?,
        };
        report(args.mount.as_ref(), &compilation);

        let (watcher, mut changes) = FileWatcher::new(&compilation.watch_dirs, WATCH_DEBOUNCE)?;
        let ignored = vec![args.config.output_dir.clone(), args.options.cache_dir.clone()];

        let cancel = args.cancel.clone();
        let cache = Arc::clone(&args.cache);
        let mount = Arc::clone(&args.mount);

        let task = tokio::spawn(async move {
            let _watcher = watcher;

            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = changes.recv() => match batch {
                        Some(batch) => batch,
                        None => break,
                    },
                };

                let changed = batch
                    .iter()
                    .filter(|event| !ignored.iter().any(|dir| event.path().starts_with(dir)))
                    .count();
                if changed == 0 {
                    continue;
                }
                tracing::info!("{} file(s) changed, rebuilding", changed);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = compiler.compile(&cache) => match result {
                        Ok(compilation) => report(mount.as_ref(), &compilation),
                        Err(e) => {
                            tracing::error!("Rebuild failed: {}", e);
                            mount.notify(DevEvent::Failed {
                                errors: vec![e.to_string()],
                            });
                        }
                    },
                }
            }

            tracing::debug!("Dev session stopped");
        });

        *self.session.lock().await = Some(DevSession {
            cancel: args.cancel,
            task,
        });

        Ok(Some(StartResult {
            stats: compilation.stats,
            total_time: args.start_time.elapsed(),
        }))
    }

    async fn build(&self, args: BuildArgs) -> Result<Option<BuildStats>, BuilderError> {
        let config = Arc::clone(&args.config);
        let compiler = Compiler::new(Arc::clone(&config))?;

        let compilation = tokio::select! {
            biased;
            _ = args.cancel.cancelled() => return Err(BuilderError::Aborted),
            result = compiler.compile(&args.cache) => result?,
        };
        if args.cancel.is_cancelled() {
            return Err(BuilderError::Aborted);
        }

        let mut stats = compilation.stats;
        let files = compilation.files;
        let output_dir = config.output_dir.clone();
        let static_dirs = config.static_dirs.clone();

        let warnings = tokio::task::spawn_blocking(move || {
            write_files(&output_dir, &files)?;
            copy_static_dirs(&static_dirs, &output_dir)
        })
        .await
        .map_err(|e| BuilderError::Task(e.to_string()))??;

        stats.warnings.extend(warnings);
        stats.duration_ms = args.start_time.elapsed().as_millis() as u64;

        for warning in &stats.warnings {
            tracing::warn!("{}", warning);
        }
        for error in &stats.errors {
            tracing::error!("{}", error);
        }
        tracing::info!(
            "Built {} story files ({} modules) into {} in {}ms",
            stats.stories,
            stats.modules,
            config.output_dir.display(),
            stats.duration_ms
        );

        Ok(Some(stats))
    }

    async fn bail(&self, reason: Option<String>) -> Result<(), BuilderError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        tracing::debug!(reason = reason.as_deref(), "Stopping dev session");
        session.cancel.cancel();

        match session.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(BuilderError::Task(e.to_string())),
        }
    }
}

/// Publish a compilation and report its outcome to the dev mount.
fn report(mount: &dyn DevMount, compilation: &Compilation) {
    let stats = &compilation.stats;
    mount.publish(compilation.files.clone());

    for warning in &stats.warnings {
        tracing::warn!("{}", warning);
    }

    if stats.has_errors() {
        for error in &stats.errors {
            tracing::error!("{}", error);
        }
        mount.notify(DevEvent::Failed {
            errors: stats.errors.clone(),
        });
    } else {
        tracing::info!(
            "Compiled {} story files in {}ms{}",
            stats.stories,
            stats.duration_ms,
            if stats.cached { " (cached)" } else { "" }
        );
        mount.notify(DevEvent::Rebuilt {
            hash: stats.hash.clone(),
            duration_ms: stats.duration_ms,
        });
    }
}

/// Copy the contents of each static directory into `output_dir`.
/// Missing directories are returned as warnings.
fn copy_static_dirs(dirs: &[PathBuf], output_dir: &Path) -> Result<Vec<String>, BuilderError> {
    let mut warnings = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            warnings.push(format!("Static directory not found: {}", dir.display()));
            continue;
        }

        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let target = output_dir.join(relative);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| BuilderError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|source| BuilderError::Write { path: target, source })?;
        }

        tracing::info!("Copied static files from {}", dir.display());
    }

    Ok(warnings)
}

fn bundle_preset() -> PresetDefinition {
    PresetDefinition::new()
        .with_handler(
            extension::ENTRIES,
            ExtensionHandler::sync(|entries, _ctx| Ok(prepend(entries, RUNTIME_ENTRY))),
        )
        .with_static(
            extension::VIRTUAL_MODULES,
            json!({ RUNTIME_ENTRY: assets::PREVIEW_RUNTIME }),
        )
}

fn override_preset(options: &Options) -> PresetDefinition {
    let output_dir = Value::String(options.output_dir.display().to_string());
    let mode = json!(options.config_type);

    PresetDefinition::new().with_handler(
        extension::WEBPACK,
        ExtensionHandler::sync(move |mut config, _ctx| {
            if let Value::Object(fields) = &mut config {
                fields.insert("outputDir".to_string(), output_dir.clone());
                fields.insert("mode".to_string(), mode.clone());
            }
            Ok(config)
        }),
    )
}

fn prepend(entries: Value, entry: &str) -> Value {
    match entries {
        Value::Array(mut items) => {
            items.insert(0, Value::String(entry.to_string()));
            Value::Array(items)
        }
        Value::Null => json!([entry]),
        other => other,
    }
}
