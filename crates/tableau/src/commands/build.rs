//! Build command - writes a static bundle.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tableau_builder::{prepare, BuilderRegistry};
use tableau_presets::{CliOptions, ConfigType};

use super::{features, finish, shutdown_signal, RunFlags};

pub struct BuildArgs {
    pub output_dir: Option<PathBuf>,
    pub static_dirs: Vec<PathBuf>,
    pub stats_json: Option<PathBuf>,
    pub stories_json: bool,
    pub debug_config: bool,
}

pub async fn run(flags: &RunFlags, args: BuildArgs) -> Result<()> {
    let cli = CliOptions {
        static_dirs: args.static_dirs,
        stats_json: args.stats_json.clone(),
        debug_config: args.debug_config,
        ..Default::default()
    };

    let mut builder = flags
        .options(ConfigType::Production, cli)
        .features(features(args.stories_json));
    if let Some(dir) = args.output_dir {
        builder = builder.output_dir(dir);
    }
    let options = finish(builder)?;

    let registry = BuilderRegistry::with_defaults();
    let prepared = prepare(options.clone(), &registry)
        .await
        .context("Failed to prepare builder")?;
    let controller = prepared.controller;

    if args.debug_config {
        let config = controller.get_config().await?;
        println!("{}", serde_json::to_string_pretty(config.as_ref())?);
        return Ok(());
    }

    tracing::info!("Building with {} builder...", controller.builder_name());

    let outcome = tokio::select! {
        outcome = controller.build() => outcome.context("Build failed")?,
        _ = shutdown_signal() => {
            controller.bail(Some("interrupted".to_string())).await?;
            bail!("Build interrupted");
        }
    };

    if let Some(path) = &args.stats_json {
        let stats = outcome.stats.clone().unwrap_or_default();
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
        tracing::info!("Stats written to {}", path.display());
    }

    if let Some(stats) = outcome.stats.as_ref().filter(|s| s.has_errors()) {
        bail!("Build failed with {} errors", stats.errors.len());
    }

    tracing::info!(
        "Build complete in {}ms",
        outcome.total_time.as_millis()
    );
    tracing::info!("Output: {}", options.output_dir.display());

    Ok(())
}
