//! The resolved build request handed to a builder backend.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tableau_presets::{
    extension, ConfigType, CoreConfig, Options, Presets, Ref, TypescriptConfig,
};

use crate::traits::BuilderError;

/// Manager UI configuration, folded through the `managerWebpack` extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    pub title: String,
    pub entries: Vec<String>,
    pub refs: Vec<Ref>,
}

/// Bundler configuration, folded through the `webpack` extension.
///
/// Keys the backend does not know are preserved in `extra`, so presets can
/// carry backend-specific settings through the fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    pub mode: ConfigType,

    /// Directory relative module paths and story globs are resolved against
    pub context: PathBuf,

    pub output_dir: PathBuf,

    /// Preview entry modules: paths or `virtual:` ids
    #[serde(default)]
    pub entries: Vec<String>,

    /// Story globs, relative to `context`
    #[serde(default)]
    pub stories: Vec<String>,

    /// Sources for `virtual:` module ids
    #[serde(default)]
    pub virtual_modules: BTreeMap<String, String>,

    #[serde(default)]
    pub static_dirs: Vec<PathBuf>,

    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Values exposed to the preview as `process.env`
    #[serde(default)]
    pub define: BTreeMap<String, String>,

    #[serde(default)]
    pub preview_head: String,

    #[serde(default)]
    pub preview_body: String,

    #[serde(default)]
    pub minify: bool,

    #[serde(default)]
    pub stories_json: bool,

    /// Compiler options from the `babel` extension, passed through
    #[serde(default)]
    pub babel: Value,

    #[serde(default)]
    pub typescript: TypescriptConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_public_path() -> String {
    "/".to_string()
}

impl BundleConfig {
    /// Defaults derived from the run options, before any preset runs.
    pub fn seed(options: &Options) -> Self {
        let production = options.config_type.is_production();

        let mut define = BTreeMap::new();
        define.insert(
            "NODE_ENV".to_string(),
            if production { "production" } else { "development" }.to_string(),
        );
        define.insert(
            "TABLEAU_FRAMEWORK".to_string(),
            options.framework.clone(),
        );

        let title = if options.package_json.name.is_empty() {
            "Tableau".to_string()
        } else {
            options.package_json.name.clone()
        };

        Self {
            mode: options.config_type,
            context: options.config_dir.clone(),
            output_dir: options.output_dir.clone(),
            entries: Vec::new(),
            stories: Vec::new(),
            virtual_modules: BTreeMap::new(),
            static_dirs: options.cli.static_dirs.clone(),
            public_path: default_public_path(),
            define,
            preview_head: String::new(),
            preview_body: String::new(),
            minify: production,
            stories_json: options.features.build_stories_json,
            babel: json!({}),
            typescript: TypescriptConfig::default(),
            manager: ManagerConfig {
                title,
                ..Default::default()
            },
            extra: BTreeMap::new(),
        }
    }
}

/// Resolve a [`BundleConfig`] by folding every extension the bundle needs.
///
/// `webpack` runs last and sees the other extensions' results, with the
/// compiler options passed in `args.babelOptions`.
pub async fn resolve_config(presets: &Presets) -> Result<BundleConfig, BuilderError> {
    let options = presets.options();
    let mut config = BundleConfig::seed(options);

    let core: CoreConfig = presets
        .apply_as(extension::CORE, CoreConfig::default(), Value::Null)
        .await?;
    tracing::debug!(builder = ?core.builder, "resolved core config");

    let babel = presets
        .apply(extension::BABEL, json!({}), Value::Null)
        .await?;

    config.typescript = presets
        .apply_as(extension::TYPESCRIPT, config.typescript, Value::Null)
        .await?;
    config.entries = presets
        .apply_as(extension::ENTRIES, Vec::<String>::new(), Value::Null)
        .await?;
    config.stories = presets
        .apply_as(extension::STORIES, Vec::<String>::new(), Value::Null)
        .await?;
    config.virtual_modules = presets
        .apply_as(extension::VIRTUAL_MODULES, BTreeMap::new(), Value::Null)
        .await?;
    config.preview_head = presets
        .apply_as(extension::PREVIEW_HEAD, String::new(), Value::Null)
        .await?;
    config.preview_body = presets
        .apply_as(extension::PREVIEW_BODY, String::new(), Value::Null)
        .await?;

    let manager_entries: Vec<String> = presets
        .apply_as(extension::MANAGER_ENTRIES, Vec::new(), Value::Null)
        .await?;
    let refs: Vec<Ref> = presets
        .apply_as(extension::REFS, Vec::new(), Value::Null)
        .await?;

    let manager_args = json!({
        "babelOptions": babel,
        "entries": manager_entries,
        "refs": refs,
    });
    config.manager = presets
        .apply_as(
            extension::MANAGER_WEBPACK,
            ManagerConfig {
                entries: manager_entries,
                refs,
                ..config.manager
            },
            manager_args,
        )
        .await?;

    config.babel = babel.clone();

    let args = json!({
        "babelOptions": babel,
        "configType": options.config_type,
    });

    let config = presets
        .apply_as(extension::WEBPACK, config, args)
        .await?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tableau_presets::{
        ExtensionHandler, LoadedPreset, OptionsBuilder, PresetDefinition,
    };
    use tempfile::tempdir;

    fn preset(name: &str, definition: PresetDefinition) -> LoadedPreset {
        LoadedPreset {
            name: name.to_string(),
            definition,
            options: Value::Null,
        }
    }

    #[tokio::test]
    async fn folds_extensions_into_bundle_config() {
        let temp = tempdir().unwrap();
        let options = OptionsBuilder::new(temp.path(), ConfigType::Production)
            .build()
            .unwrap();

        let presets = Presets::new(
            vec![
                preset(
                    "base",
                    PresetDefinition::new()
                        .with_static(extension::ENTRIES, json!(["./preview.js"]))
                        .with_static(extension::STORIES, json!(["../src/*.stories.js"]))
                        .with_static(extension::BABEL, json!({"plugins": ["p"]}))
                        .with_static(extension::MANAGER_ENTRIES, json!(["./manager.js"])),
                ),
                preset(
                    "final",
                    PresetDefinition::new().with_handler(
                        extension::WEBPACK,
                        ExtensionHandler::sync(|mut config, ctx| {
                            config["publicPath"] = json!("/sb/");
                            config["babelSeen"] = ctx.args["babelOptions"].clone();
                            Ok(config)
                        }),
                    ),
                ),
            ],
            Arc::new(options),
        );

        let config = resolve_config(&presets).await.unwrap();

        assert_eq!(config.mode, ConfigType::Production);
        assert_eq!(config.entries, vec!["./preview.js"]);
        assert_eq!(config.stories, vec!["../src/*.stories.js"]);
        assert_eq!(config.manager.entries, vec!["./manager.js"]);
        assert_eq!(config.public_path, "/sb/");
        assert_eq!(config.babel, json!({"plugins": ["p"]}));
        assert_eq!(config.extra.get("babelSeen"), Some(&json!({"plugins": ["p"]})));
        assert!(config.minify);
    }

    #[tokio::test]
    async fn composition_errors_propagate() {
        let temp = tempdir().unwrap();
        let options = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .build()
            .unwrap();

        let presets = Presets::new(
            vec![preset(
                "bad",
                PresetDefinition::new().with_static(extension::ENTRIES, json!({"not": "a list"})),
            )],
            Arc::new(options),
        );

        let err = resolve_config(&presets).await.unwrap_err();

        assert!(matches!(err, BuilderError::Preset(_)));
    }
}
