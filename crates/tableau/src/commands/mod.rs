//! CLI command implementations.

pub mod build;
pub mod dev;
pub mod init;
pub mod inspect;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tableau_presets::{CliOptions, ConfigType, Features, Options, OptionsBuilder, PresetStrictness};

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct RunFlags {
    pub config_dir: PathBuf,
    pub framework: String,
    pub strict: bool,
    pub ignore_preview: bool,
    pub docs: bool,
    pub quiet: bool,
}

impl RunFlags {
    /// Start an options builder carrying the shared flags.
    fn options(&self, config_type: ConfigType, mut cli: CliOptions) -> OptionsBuilder {
        cli.quiet = self.quiet;

        let mut builder = OptionsBuilder::new(&self.config_dir, config_type)
            .framework(&self.framework)
            .cli(cli)
            .ignore_preview(self.ignore_preview)
            .docs_mode(self.docs);

        if self.strict {
            builder = builder.strictness(PresetStrictness::Strict);
        }

        builder
    }
}

fn finish(builder: OptionsBuilder) -> Result<Arc<Options>> {
    let options = builder.build().context("Invalid options")?;
    tracing::debug!(
        config_dir = %options.config_dir.display(),
        framework = %options.framework,
        "Options resolved"
    );
    Ok(Arc::new(options))
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn features(stories_json: bool) -> Features {
    Features {
        build_stories_json: stories_json,
        ..Default::default()
    }
}
