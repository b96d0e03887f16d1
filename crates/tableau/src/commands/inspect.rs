//! Inspect command - prints resolved preset values without building.

use anyhow::{Context, Result};
use serde_json::Value;
use tableau_builder::{select, BuilderRegistry};
use tableau_presets::{CliOptions, ConfigType};

use super::{finish, RunFlags};

pub async fn run(
    flags: &RunFlags,
    extension: Option<String>,
    list_presets: bool,
    production: bool,
) -> Result<()> {
    let config_type = if production {
        ConfigType::Production
    } else {
        ConfigType::Development
    };
    let options = finish(flags.options(config_type, CliOptions::default()))?;

    // No controller: inspecting must not take the build cache lock.
    let registry = BuilderRegistry::with_defaults();
    let selection = select(options, &registry)
        .await
        .context("Failed to load presets")?;
    let presets = &selection.report.presets;

    if list_presets {
        for name in presets.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let value = match extension {
        Some(name) => presets
            .apply(&name, Value::Null, Value::Null)
            .await
            .with_context(|| format!("Failed to resolve `{}`", name))?,
        None => {
            let config = selection.builder.get_config(presets).await?;
            serde_json::to_value(config)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
