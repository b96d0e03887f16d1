//! The extension-point resolver.
//!
//! [`Presets::apply`] left-folds every loaded preset's contribution for one
//! extension over an accumulating value, strictly in list order.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::PresetError;
use crate::options::Options;
use crate::preset::{Contribution, HandlerContext, LoadedPreset};

/// Shape of a JSON value, used to reject handlers that change an
/// extension's type mid-fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Ordered, immutable preset list plus the options it was loaded with.
#[derive(Clone)]
pub struct Presets {
    list: Arc<[LoadedPreset]>,
    options: Arc<Options>,
}

impl Presets {
    pub fn new(list: Vec<LoadedPreset>, options: Arc<Options>) -> Self {
        Self {
            list: list.into(),
            options,
        }
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Loaded presets in fold order.
    pub fn list(&self) -> &[LoadedPreset] {
        &self.list
    }

    /// Preset names in fold order.
    pub fn names(&self) -> Vec<&str> {
        self.list.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Fold every preset's contribution for `extension` over `seed`.
    ///
    /// Each handler receives the previous handler's output and is awaited
    /// before the next one runs. The first failure aborts the fold.
    pub async fn apply(
        &self,
        extension: &str,
        seed: Value,
        args: Value,
    ) -> Result<Value, PresetError> {
        let mut config = seed;

        for loaded in self.list.iter() {
            let Some(contribution) = loaded.definition.extensions.get(extension) else {
                continue;
            };

            let expected = ValueKind::of(&config);

            let next = match contribution {
                Contribution::Static(value) => merge_static(config, value.clone()),
                Contribution::Handler(handler) => {
                    let ctx = HandlerContext {
                        options: Arc::clone(&self.options),
                        args: args.clone(),
                        preset_options: loaded.options.clone(),
                        presets: self.clone(),
                    };

                    handler
                        .call(config, ctx)
                        .await
                        .map_err(|source| PresetError::Handler {
                            preset: loaded.name.clone(),
                            extension: extension.to_string(),
                            source,
                        })?
                }
            };

            let found = ValueKind::of(&next);
            if expected != ValueKind::Null && expected != found {
                return Err(PresetError::ShapeMismatch {
                    extension: extension.to_string(),
                    preset: loaded.name.clone(),
                    expected,
                    found,
                });
            }

            tracing::debug!(preset = %loaded.name, extension, "applied preset");
            config = next;
        }

        Ok(config)
    }

    /// Typed wrapper over [`Self::apply`].
    pub async fn apply_as<T>(&self, extension: &str, seed: T, args: Value) -> Result<T, PresetError>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let seed = serde_json::to_value(seed).map_err(|source| PresetError::Decode {
            extension: extension.to_string(),
            source,
        })?;

        let value = self.apply(extension, seed, args).await?;

        serde_json::from_value(value).map_err(|source| PresetError::Decode {
            extension: extension.to_string(),
            source,
        })
    }
}

impl fmt::Debug for Presets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presets")
            .field("list", &self.names())
            .finish()
    }
}

fn merge_static(config: Value, value: Value) -> Value {
    match (config, value) {
        (Value::Array(mut acc), Value::Array(items)) => {
            acc.extend(items);
            Value::Array(acc)
        }
        (Value::Object(mut acc), Value::Object(fields)) => {
            acc.extend(fields);
            Value::Object(acc)
        }
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ConfigType, OptionsBuilder};
    use crate::preset::{ExtensionHandler, HandlerError, HandlerResult, PresetDefinition};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn options() -> Arc<Options> {
        let temp = tempdir().unwrap();
        let options = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .build()
            .unwrap();
        Arc::new(options)
    }

    fn preset(name: &str, definition: PresetDefinition) -> LoadedPreset {
        LoadedPreset {
            name: name.to_string(),
            definition,
            options: Value::Null,
        }
    }

    fn appender(name: &'static str) -> ExtensionHandler {
        ExtensionHandler::new(move |config, _ctx| async move {
            let mut items = config.as_array().cloned().unwrap_or_default();
            items.push(json!(name));
            Ok::<Value, HandlerError>(Value::Array(items))
        })
    }

    #[tokio::test]
    async fn folds_in_list_order() {
        let presets = Presets::new(
            ["A", "B", "C"]
                .into_iter()
                .map(|name| preset(name, PresetDefinition::new().with_handler("X", appender(name))))
                .collect(),
            options(),
        );

        let result = presets.apply("X", json!([]), json!({})).await.unwrap();

        assert_eq!(result, json!(["A", "B", "C"]));
    }

    #[tokio::test]
    async fn duplicates_are_not_deduplicated() {
        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_handler("X", appender("A"))),
                preset("A", PresetDefinition::new().with_handler("X", appender("A"))),
            ],
            options(),
        );

        let result = presets.apply("X", json!([]), Value::Null).await.unwrap();

        assert_eq!(result, json!(["A", "A"]));
    }

    #[tokio::test]
    async fn presets_without_handler_are_skipped() {
        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_handler("X", appender("A"))),
                preset("B", PresetDefinition::new().with_handler("Y", appender("B"))),
            ],
            options(),
        );

        let result = presets.apply("X", json!([]), Value::Null).await.unwrap();

        assert_eq!(result, json!(["A"]));
    }

    #[tokio::test]
    async fn later_presets_override_earlier_fields() {
        let set_builder = |value: &'static str| {
            ExtensionHandler::sync(move |mut config, _ctx| {
                config["builder"] = json!(value);
                Ok(config)
            })
        };

        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_handler("core", set_builder("a"))),
                preset("D", PresetDefinition::new().with_handler("core", set_builder("d"))),
            ],
            options(),
        );

        let core = presets.apply("core", json!({}), Value::Null).await.unwrap();

        assert_eq!(core["builder"], json!("d"));
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            ExtensionHandler::sync(move |config, _ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(config)
            })
        };
        let failing = ExtensionHandler::new(|_config, _ctx| async {
            Err::<Value, HandlerError>("broken handler".into())
        });

        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_handler("X", appender("A"))),
                preset("B", PresetDefinition::new().with_handler("X", failing)),
                preset("C", PresetDefinition::new().with_handler("X", counted)),
            ],
            options(),
        );

        let err = presets.apply("X", json!([]), Value::Null).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            PresetError::Handler {
                preset,
                extension,
                source,
            } => {
                assert_eq!(preset, "B");
                assert_eq!(extension, "X");
                assert_eq!(source.to_string(), "broken handler");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn repeated_apply_is_pure() {
        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_static("X", json!(["a"]))),
                preset("B", PresetDefinition::new().with_handler("X", appender("B"))),
            ],
            options(),
        );

        let first = presets.apply("X", json!([]), Value::Null).await.unwrap();
        let second = presets.apply("X", json!([]), Value::Null).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, json!(["a", "B"]));
    }

    #[tokio::test]
    async fn static_contributions_merge() {
        let presets = Presets::new(
            vec![
                preset(
                    "A",
                    PresetDefinition::new()
                        .with_static("core", json!({"builder": "bundle", "x": 1}))
                        .with_static("title", json!("first")),
                ),
                preset(
                    "B",
                    PresetDefinition::new()
                        .with_static("core", json!({"builder": "other"}))
                        .with_static("title", json!("second")),
                ),
            ],
            options(),
        );

        let core = presets.apply("core", json!({}), Value::Null).await.unwrap();
        let title = presets.apply("title", Value::Null, Value::Null).await.unwrap();

        assert_eq!(core, json!({"builder": "other", "x": 1}));
        assert_eq!(title, json!("second"));
    }

    #[tokio::test]
    async fn rejects_shape_changes() {
        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_static("X", json!({"a": 1}))),
                preset("B", PresetDefinition::new().with_static("X", json!(["b"]))),
            ],
            options(),
        );

        let err = presets.apply("X", json!({}), Value::Null).await.unwrap_err();

        assert!(matches!(
            err,
            PresetError::ShapeMismatch {
                ref preset,
                expected: ValueKind::Object,
                found: ValueKind::Array,
                ..
            } if preset == "B"
        ));
    }

    #[tokio::test]
    async fn handlers_see_args_and_preset_options() {
        let echo = ExtensionHandler::sync(|_config, ctx| {
            Ok(json!({"args": ctx.args.clone(), "own": ctx.preset_options.clone()}))
        });

        let presets = Presets::new(
            vec![LoadedPreset {
                name: "A".to_string(),
                definition: PresetDefinition::new().with_handler("X", echo),
                options: json!({"flag": true}),
            }],
            options(),
        );

        let result = presets
            .apply("X", json!({}), json!({"babelOptions": {}}))
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({"args": {"babelOptions": {}}, "own": {"flag": true}})
        );
    }

    #[tokio::test]
    async fn handlers_can_resolve_other_extensions() {
        async fn with_entries(mut config: Value, ctx: HandlerContext) -> HandlerResult {
            let entries = ctx.presets.apply("entries", json!([]), Value::Null).await?;
            config["entries"] = entries;
            Ok(config)
        }

        let nested = ExtensionHandler::new(with_entries);

        let presets = Presets::new(
            vec![
                preset("A", PresetDefinition::new().with_static("entries", json!(["x"]))),
                preset("B", PresetDefinition::new().with_handler("webpack", nested)),
            ],
            options(),
        );

        let config = presets.apply("webpack", json!({}), Value::Null).await.unwrap();

        assert_eq!(config, json!({"entries": ["x"]}));
    }
}
