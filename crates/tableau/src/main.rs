//! Tableau CLI - preset-driven component workshop.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::RunFlags;

#[derive(Parser)]
#[command(name = "tableau")]
#[command(about = "Build and develop component stories")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding main.toml and preview/manager files
    #[arg(short, long, global = true, default_value = ".tableau")]
    config_dir: PathBuf,

    /// Framework whose presets are loaded
    #[arg(short, long, global = true, default_value = "html")]
    framework: String,

    /// Fail on presets that cannot be loaded instead of skipping them
    #[arg(long, global = true)]
    strict: bool,

    /// Skip the preview when it cannot be configured
    #[arg(long, global = true)]
    ignore_preview: bool,

    /// Docs-only mode
    #[arg(long, global = true)]
    docs: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dev server and rebuild on change
    Dev {
        /// Port to listen on
        #[arg(short, long, default_value = "6006")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,

        /// Directory to serve as-is (repeatable)
        #[arg(short, long = "static-dir")]
        static_dirs: Vec<PathBuf>,

        /// Serve over HTTPS (requires --ssl-cert and --ssl-key)
        #[arg(long)]
        https: bool,

        #[arg(long)]
        ssl_cert: Option<PathBuf>,

        #[arg(long)]
        ssl_key: Option<PathBuf>,

        #[arg(long)]
        ssl_ca: Vec<PathBuf>,

        /// Exit after the first compilation
        #[arg(long)]
        smoke_test: bool,

        /// CI mode: never open a browser
        #[arg(long)]
        ci: bool,

        /// Print the resolved builder config and exit
        #[arg(long)]
        debug_config: bool,
    },

    /// Build a static bundle
    Build {
        /// Output directory (defaults to tableau-static next to the config dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Directory copied into the output (repeatable)
        #[arg(short, long = "static-dir")]
        static_dirs: Vec<PathBuf>,

        /// Write build stats as JSON to this path
        #[arg(long)]
        stats_json: Option<PathBuf>,

        /// Emit stories.json alongside the bundle
        #[arg(long)]
        stories_json: bool,

        /// Print the resolved builder config and exit
        #[arg(long)]
        debug_config: bool,
    },

    /// Create a config directory and an example story
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the value an extension point resolves to
    Inspect {
        /// Extension point name (e.g., entries, stories, webpack); omit for the full builder config
        extension: Option<String>,

        /// List the loaded presets instead
        #[arg(long)]
        presets: bool,

        /// Resolve with production settings
        #[arg(long)]
        production: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let flags = RunFlags {
        config_dir: cli.config_dir,
        framework: cli.framework,
        strict: cli.strict,
        ignore_preview: cli.ignore_preview,
        docs: cli.docs,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Dev {
            port,
            host,
            no_open,
            static_dirs,
            https,
            ssl_cert,
            ssl_key,
            ssl_ca,
            smoke_test,
            ci,
            debug_config,
        } => {
            let args = commands::dev::DevArgs {
                port,
                host,
                no_open,
                static_dirs,
                https,
                ssl_cert,
                ssl_key,
                ssl_ca,
                smoke_test,
                ci,
                debug_config,
            };
            commands::dev::run(&flags, args).await?;
        }
        Commands::Build {
            output_dir,
            static_dirs,
            stats_json,
            stories_json,
            debug_config,
        } => {
            let args = commands::build::BuildArgs {
                output_dir,
                static_dirs,
                stats_json,
                stories_json,
                debug_config,
            };
            commands::build::run(&flags, args).await?;
        }
        Commands::Init { yes } => {
            commands::init::run(&flags.config_dir, yes).await?;
        }
        Commands::Inspect {
            extension,
            presets,
            production,
        } => {
            commands::inspect::run(&flags, extension, presets, production).await?;
        }
    }

    Ok(())
}
