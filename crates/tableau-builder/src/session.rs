//! Setting up a run: builder selection and the final preset list.

use std::sync::Arc;

use serde_json::Value;
use tableau_presets::builtin::{COMMON_PRESET, DEFAULT_BUILDER};
use tableau_presets::{
    extension, load_presets, CoreConfig, LoadReport, Options, PresetCatalog, PresetConfig,
    PresetTiers, PresetWarning,
};

use crate::controller::BuilderController;
use crate::registry::BuilderRegistry;
use crate::traits::{Builder, BuilderError};

/// Everything a command needs to drive a run.
#[derive(Debug)]
pub struct Prepared {
    pub controller: BuilderController,
    pub warnings: Vec<PresetWarning>,
}

/// Builder selected for a run and the presets loaded for it.
pub struct Selection {
    pub builder: Arc<dyn Builder>,
    pub report: LoadReport,
}

/// Pick the builder named by `core.builder` and load the presets it runs with.
///
/// Loading happens twice: once with the common preset alone to read
/// `core.builder`, then again with the builder's own core and override
/// presets folded around the framework and user tiers.
pub async fn select(
    options: Arc<Options>,
    registry: &BuilderRegistry,
) -> Result<Selection, BuilderError> {
    let mut catalog = PresetCatalog::for_options(&options);

    let probe_tiers = PresetTiers::for_options(
        vec![PresetConfig::from(COMMON_PRESET)],
        Vec::new(),
        &options,
    );
    let probe = load_presets(&probe_tiers, Arc::clone(&options), &catalog).await?;
    let core: CoreConfig = probe
        .presets
        .apply_as(extension::CORE, CoreConfig::default(), Value::Null)
        .await?;

    let name = core
        .builder
        .unwrap_or_else(|| DEFAULT_BUILDER.to_string());
    let builder = registry.get(&name)?;
    tracing::debug!("Selected {} builder", builder.name());

    builder.register_presets(&mut catalog);

    let mut core_presets = vec![PresetConfig::from(COMMON_PRESET)];
    core_presets.extend(builder.core_presets());
    let tiers = PresetTiers::for_options(core_presets, builder.override_presets(), &options);

    let report = load_presets(&tiers, options, &catalog).await?;
    for warning in &report.warnings {
        tracing::warn!("Skipped preset {}: {}", warning.preset, warning.message);
    }

    Ok(Selection { builder, report })
}

/// Select the builder and wrap it in a controller ready to run.
pub async fn prepare(
    options: Arc<Options>,
    registry: &BuilderRegistry,
) -> Result<Prepared, BuilderError> {
    let Selection { builder, report } = select(options, registry).await?;
    let controller = BuilderController::new(builder, report.presets)?;

    Ok(Prepared {
        controller,
        warnings: report.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tableau_presets::{ConfigType, OptionsBuilder};
    use tempfile::tempdir;

    #[tokio::test]
    async fn selects_bundle_builder_by_default() {
        let temp = tempdir().unwrap();
        let config_dir = temp.path().join(".tableau");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("main.toml"), "stories = [\"../src/*.stories.js\"]\n").unwrap();

        let options = OptionsBuilder::new(&config_dir, ConfigType::Production)
            .build()
            .unwrap();

        let prepared = prepare(Arc::new(options), &BuilderRegistry::with_defaults())
            .await
            .unwrap();

        assert_eq!(prepared.controller.builder_name(), "bundle");
        assert!(prepared
            .controller
            .presets()
            .names()
            .contains(&"tableau-builder-bundle/override"));
    }

    #[tokio::test]
    async fn unknown_builder_is_an_error() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("main.toml"),
            "[core]\nbuilder = \"rollup\"\n",
        )
        .unwrap();

        let options = OptionsBuilder::new(temp.path(), ConfigType::Production)
            .build()
            .unwrap();

        let err = prepare(Arc::new(options), &BuilderRegistry::with_defaults())
            .await
            .unwrap_err();

        assert!(matches!(err, BuilderError::UnknownBuilder { ref name, .. } if name == "rollup"));
    }
}
