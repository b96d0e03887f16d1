//! Scaffold a config directory and an example story.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Run the init command.
pub async fn run(config_dir: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing tableau...");

    if config_dir.exists() && !yes {
        tracing::warn!(
            "{} already exists. Use --yes to overwrite.",
            config_dir.display()
        );
        return Ok(());
    }

    fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let project_dir = config_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    write_file(&config_dir.join("main.toml"), DEFAULT_MAIN, yes)?;
    write_file(&config_dir.join("preview-head.html"), DEFAULT_PREVIEW_HEAD, yes)?;

    let stories_dir = project_dir.join("src").join("stories");
    fs::create_dir_all(&stories_dir).context("Failed to create stories directory")?;
    write_file(&stories_dir.join("button.stories.js"), DEFAULT_STORY, yes)?;

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'tableau dev' to start the development server.");

    Ok(())
}

fn write_file(path: &Path, contents: &str, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        tracing::debug!("Keeping existing {}", path.display());
        return Ok(());
    }

    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Created {}", path.display());
    Ok(())
}

const DEFAULT_MAIN: &str = r#"# Tableau configuration

stories = ["../src/**/*.stories.@(js|mjs|ts)"]

# Extra presets and addons, loaded after the framework
presets = []
addons = []

[core]
builder = "bundle"
"#;

const DEFAULT_PREVIEW_HEAD: &str = r#"<style>
  body { font-family: system-ui, sans-serif; padding: 1rem; }
</style>
"#;

const DEFAULT_STORY: &str = r#"export default {
  title: 'Example/Button',
  args: { label: 'Button' },
};

export const Primary = ({ label }) => `<button class="primary">${label}</button>`;

export const Secondary = {
  args: { label: 'Secondary' },
  render: ({ label }) => `<button>${label}</button>`,
};
"#;
