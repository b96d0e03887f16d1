//! Dev command - serves the workshop and rebuilds on change.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tableau_builder::{prepare, BuilderRegistry};
use tableau_presets::{CliOptions, ConfigType};
use tableau_server::{DevServer, DevServerConfig};
use tokio_util::sync::CancellationToken;

use super::{finish, shutdown_signal, RunFlags};

pub struct DevArgs {
    pub port: u16,
    pub host: String,
    pub no_open: bool,
    pub static_dirs: Vec<PathBuf>,
    pub https: bool,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub ssl_ca: Vec<PathBuf>,
    pub smoke_test: bool,
    pub ci: bool,
    pub debug_config: bool,
}

pub async fn run(flags: &RunFlags, args: DevArgs) -> Result<()> {
    let cli = CliOptions {
        port: Some(args.port),
        host: Some(args.host),
        static_dirs: args.static_dirs,
        https: args.https,
        ssl_ca: args.ssl_ca,
        ssl_cert: args.ssl_cert,
        ssl_key: args.ssl_key,
        smoke_test: args.smoke_test,
        ci: args.ci,
        no_open: args.no_open,
        debug_config: args.debug_config,
        ..Default::default()
    };
    let options = finish(flags.options(ConfigType::Development, cli))?;

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

    let server = DevServer::new(DevServerConfig::from_options(&options))?;
    let mount = server.mount();
    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(server.serve(shutdown.clone()));

    // Installed before the initial build so the cache lock is released on interrupt
    let signal = shutdown_signal();
    tokio::pin!(signal);

    tracing::info!("Starting {} builder...", controller.builder_name());

    let started = tokio::select! {
        started = controller.start(mount) => Some(started),
        _ = &mut signal => None,
    };

    let outcome = match started {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            shutdown.cancel();
            let _ = server_task.await;
            return Err(e).context("Failed to start builder");
        }
        None => {
            tracing::info!("Interrupted during startup, shutting down...");
            controller.bail(Some("interrupted".to_string())).await?;
            shutdown.cancel();
            server_task.await.context("Dev server task panicked")??;
            return Ok(());
        }
    };

    let has_errors = outcome.stats.as_ref().is_some_and(|s| s.has_errors());

    if args.smoke_test {
        outcome.bail.bail(Some("smoke test".to_string())).await?;
        shutdown.cancel();
        server_task.await.context("Dev server task panicked")??;
        if has_errors {
            bail!("Smoke test failed: initial compilation had errors");
        }
        tracing::info!("Smoke test passed");
        return Ok(());
    }

    tracing::info!(
        "Tableau started in {}ms",
        outcome.total_time.as_millis()
    );
    tracing::info!("Press Ctrl+C to stop");

    let server_result = tokio::select! {
        _ = &mut signal => {
            tracing::info!("Shutting down...");
            None
        }
        result = &mut server_task => Some(result),
    };

    outcome.bail.bail(Some("shutdown".to_string())).await?;
    shutdown.cancel();

    let result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };
    result.context("Dev server task panicked")??;

    Ok(())
}
