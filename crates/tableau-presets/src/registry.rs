//! Preset registry: turns the preset tiers into one ordered preset list.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::apply::Presets;
use crate::catalog::{LoadError, PresetCatalog};
use crate::error::PresetError;
use crate::options::{Options, PresetStrictness};
use crate::preset::{LoadedPreset, PresetConfig};

/// Maximum nesting of presets declaring presets.
pub const MAX_PRESET_DEPTH: usize = 32;

/// Config files in the config directory that act as the user preset.
const USER_CONFIG_FILES: &[&str] = &["main.toml", "main.json", "main.yaml", "main.yml"];

/// Preset lists in precedence order: later tiers see and override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct PresetTiers {
    pub core: Vec<PresetConfig>,
    pub framework: Vec<PresetConfig>,
    pub user: Vec<PresetConfig>,
    pub overrides: Vec<PresetConfig>,
}

impl PresetTiers {
    /// Tiers for a run: caller-supplied core and override presets, the
    /// framework presets and user config file from `options`.
    pub fn for_options(
        core: Vec<PresetConfig>,
        overrides: Vec<PresetConfig>,
        options: &Options,
    ) -> Self {
        Self {
            core,
            framework: options.framework_presets.clone(),
            user: user_presets(options),
            overrides,
        }
    }

    fn ordered(&self) -> Vec<PresetConfig> {
        self.core
            .iter()
            .chain(&self.framework)
            .chain(&self.user)
            .chain(&self.overrides)
            .cloned()
            .collect()
    }
}

/// The user preset: the first `main.*` config file in the config directory.
pub fn user_presets(options: &Options) -> Vec<PresetConfig> {
    USER_CONFIG_FILES
        .iter()
        .find(|file| options.config_dir.join(file).is_file())
        .map(|file| vec![PresetConfig::from(format!("./{}", file))])
        .unwrap_or_default()
}

/// A preset skipped under lenient loading.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetWarning {
    pub preset: String,
    pub level: usize,
    pub message: String,
}

/// Result of loading the preset tiers.
#[derive(Debug)]
pub struct LoadReport {
    pub presets: Presets,
    pub warnings: Vec<PresetWarning>,
}

/// Load every tier into one ordered preset list.
///
/// Nested presets expand depth-first ahead of the preset that declared them,
/// followed by its addons. Duplicates are kept. Resolution failures abort
/// under [`PresetStrictness::Strict`] and are skipped with a warning otherwise.
pub async fn load_presets(
    tiers: &PresetTiers,
    options: Arc<Options>,
    catalog: &PresetCatalog,
) -> Result<LoadReport, PresetError> {
    let mut loader = Loader {
        catalog,
        options: &options,
        warnings: Vec::new(),
    };

    let list = loader.load_list(tiers.ordered(), 0).await?;
    let warnings = loader.warnings;

    tracing::debug!(count = list.len(), "loaded presets");

    Ok(LoadReport {
        presets: Presets::new(list, options),
        warnings,
    })
}

struct Loader<'a> {
    catalog: &'a PresetCatalog,
    options: &'a Options,
    warnings: Vec<PresetWarning>,
}

impl<'a> Loader<'a> {
    fn load_list(
        &mut self,
        list: Vec<PresetConfig>,
        level: usize,
    ) -> BoxFuture<'_, Result<Vec<LoadedPreset>, PresetError>> {
        Box::pin(async move {
            let mut loaded = Vec::new();

            for entry in list {
                match self.load_entry(&entry, level).await {
                    Ok(presets) => loaded.extend(presets),
                    Err(source) => self.recover(&entry, level, source)?,
                }
            }

            Ok(loaded)
        })
    }

    async fn load_entry(
        &mut self,
        entry: &PresetConfig,
        level: usize,
    ) -> Result<Vec<LoadedPreset>, LoadError> {
        if level >= MAX_PRESET_DEPTH {
            return Err(LoadError::TooDeep(MAX_PRESET_DEPTH));
        }

        let name = entry.name().to_string();
        let preset_options = entry.options();

        let definition = self
            .catalog
            .load(&name, &preset_options, self.options)
            .await?;

        let addons: Vec<PresetConfig> = definition
            .addons
            .iter()
            .map(|addon| self.resolve_addon(addon))
            .collect();

        let mut loaded = self
            .load_list(definition.presets.clone(), level + 1)
            .await
            .map_err(nested_error)?;

        loaded.extend(
            self.load_list(addons, level + 1)
                .await
                .map_err(nested_error)?,
        );

        if !definition.extensions.is_empty() {
            loaded.push(LoadedPreset {
                name,
                definition,
                options: preset_options,
            });
        }

        Ok(loaded)
    }

    /// Addons resolve to `<addon>/preset` when the catalog has one.
    fn resolve_addon(&self, addon: &PresetConfig) -> PresetConfig {
        let preset_id = format!("{}/preset", addon.name());
        if !self.catalog.resolves(&preset_id) {
            return addon.clone();
        }

        match addon {
            PresetConfig::Name(_) => PresetConfig::Name(preset_id),
            PresetConfig::WithOptions { options, .. } => PresetConfig::WithOptions {
                name: preset_id,
                options: options.clone(),
            },
        }
    }

    fn recover(
        &mut self,
        entry: &PresetConfig,
        level: usize,
        source: LoadError,
    ) -> Result<(), PresetError> {
        if self.options.strictness == PresetStrictness::Strict {
            return Err(PresetError::Load {
                name: entry.name().to_string(),
                level,
                source,
            });
        }

        if level > 0 {
            tracing::warn!("Failed to load preset {} on level {}: {}", entry, level, source);
        } else {
            tracing::warn!("Failed to load preset {}: {}", entry, source);
        }

        self.warnings.push(PresetWarning {
            preset: entry.name().to_string(),
            level,
            message: source.to_string(),
        });

        Ok(())
    }
}

/// Strict-mode failures deeper in the tree surface as-is.
fn nested_error(err: PresetError) -> LoadError {
    match err {
        PresetError::Load { source, .. } => source,
        other => LoadError::Invalid {
            name: other.preset().unwrap_or("unknown").to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ConfigType, OptionsBuilder};
    use crate::preset::PresetDefinition;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::tempdir;

    fn options(strictness: PresetStrictness) -> Arc<Options> {
        let temp = tempdir().unwrap();
        let options = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .strictness(strictness)
            .build()
            .unwrap();
        Arc::new(options)
    }

    fn catalog(names: &[&str]) -> PresetCatalog {
        let mut catalog = PresetCatalog::empty();
        for name in names {
            let tag = name.to_string();
            catalog.register(*name, move |_options, _preset_options| {
                Ok(PresetDefinition::new().with_static("X", json!([tag.clone()])))
            });
        }
        catalog
    }

    fn tiers(list: &[&str]) -> PresetTiers {
        PresetTiers {
            core: list.iter().map(|n| PresetConfig::from(*n)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn expands_nested_presets_in_place() {
        let mut catalog = catalog(&["A", "C", "X", "Y"]);
        catalog.register("P", |_options, _preset_options| {
            Ok(PresetDefinition::new().with_presets(["X", "Y"]))
        });

        let report = load_presets(&tiers(&["A", "P", "C"]), options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap();

        assert_eq!(report.presets.names(), vec!["A", "X", "Y", "C"]);
    }

    #[tokio::test]
    async fn nested_presets_precede_their_parent() {
        let mut catalog = catalog(&["X"]);
        catalog.register("P", |_options, _preset_options| {
            Ok(PresetDefinition::new()
                .with_presets(["X"])
                .with_static("X", json!(["P"])))
        });

        let report = load_presets(&tiers(&["P"]), options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap();

        assert_eq!(report.presets.names(), vec!["X", "P"]);
    }

    #[tokio::test]
    async fn tiers_apply_in_precedence_order() {
        let catalog = catalog(&["core-a", "fw-b", "user-c", "override-d"]);
        let tiers = PresetTiers {
            core: vec!["core-a".into()],
            framework: vec!["fw-b".into()],
            user: vec!["user-c".into()],
            overrides: vec!["override-d".into()],
        };

        let report = load_presets(&tiers, options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap();

        let folded = report
            .presets
            .apply("X", json!([]), Value::Null)
            .await
            .unwrap();

        assert_eq!(folded, json!(["core-a", "fw-b", "user-c", "override-d"]));
    }

    #[tokio::test]
    async fn keeps_duplicates_with_their_own_options() {
        let mut catalog = PresetCatalog::empty();
        catalog.register("dup", |_options, preset_options| {
            Ok(PresetDefinition::new().with_static("X", json!([preset_options.clone()])))
        });

        let tiers = PresetTiers {
            core: vec![
                PresetConfig::WithOptions {
                    name: "dup".to_string(),
                    options: json!(1),
                },
                PresetConfig::WithOptions {
                    name: "dup".to_string(),
                    options: json!(2),
                },
            ],
            ..Default::default()
        };

        let report = load_presets(&tiers, options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap();

        assert_eq!(report.presets.names(), vec!["dup", "dup"]);
        assert_eq!(report.presets.list()[1].options, json!(2));
    }

    #[tokio::test]
    async fn strict_mode_fails_on_missing_preset() {
        let err = load_presets(
            &tiers(&["A", "missing"]),
            options(PresetStrictness::Strict),
            &catalog(&["A"]),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PresetError::Load { ref name, level: 0, .. } if name == "missing"));
    }

    #[tokio::test]
    async fn lenient_mode_skips_and_warns() {
        let mut catalog = catalog(&["A", "C"]);
        catalog.register("P", |_options, _preset_options| {
            Ok(PresetDefinition::new()
                .with_presets(["gone"])
                .with_static("X", json!(["P"])))
        });

        let report = load_presets(
            &tiers(&["A", "missing", "P", "C"]),
            options(PresetStrictness::Lenient),
            &catalog,
        )
        .await
        .unwrap();

        assert_eq!(report.presets.names(), vec!["A", "P", "C"]);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.warnings[0].preset, "missing");
        assert_eq!(report.warnings[1].preset, "gone");
        assert_eq!(report.warnings[1].level, 1);
    }

    #[tokio::test]
    async fn rejects_cycles() {
        let mut catalog = PresetCatalog::empty();
        catalog.register("loop", |_options, _preset_options| {
            Ok(PresetDefinition::new().with_presets(["loop"]))
        });

        let err = load_presets(&tiers(&["loop"]), options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PresetError::Load {
                source: LoadError::TooDeep(MAX_PRESET_DEPTH),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn addons_prefer_preset_entry_point() {
        let mut catalog = catalog(&["essentials/preset", "plain"]);
        catalog.register("root", |_options, _preset_options| {
            Ok(PresetDefinition::new().with_addons(["essentials", "plain"]))
        });

        let report = load_presets(&tiers(&["root"]), options(PresetStrictness::Strict), &catalog)
            .await
            .unwrap();

        assert_eq!(report.presets.names(), vec!["essentials/preset", "plain"]);
    }

    #[test]
    fn finds_user_config_file() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("main.toml"), "").unwrap();

        let options = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .build()
            .unwrap();

        assert_eq!(user_presets(&options), vec![PresetConfig::from("./main.toml")]);
    }
}
