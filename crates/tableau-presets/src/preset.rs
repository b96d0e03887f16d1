//! Preset records and the handlers they contribute.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::Presets;
use crate::options::Options;

/// Error type returned by extension handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one extension handler invocation.
pub type HandlerResult = Result<Value, HandlerError>;

/// One entry in an ordered preset list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetConfig {
    /// Bare identifier
    Name(String),

    /// Identifier with options bound at load time
    WithOptions {
        name: String,
        #[serde(default)]
        options: Value,
    },
}

impl PresetConfig {
    pub fn name(&self) -> &str {
        match self {
            PresetConfig::Name(name) => name,
            PresetConfig::WithOptions { name, .. } => name,
        }
    }

    /// Options bound to this entry, `Value::Null` for bare identifiers.
    pub fn options(&self) -> Value {
        match self {
            PresetConfig::Name(_) => Value::Null,
            PresetConfig::WithOptions { options, .. } => options.clone(),
        }
    }
}

impl From<&str> for PresetConfig {
    fn from(name: &str) -> Self {
        PresetConfig::Name(name.to_string())
    }
}

impl From<String> for PresetConfig {
    fn from(name: String) -> Self {
        PresetConfig::Name(name)
    }
}

impl fmt::Display for PresetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Context handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Shared run options
    pub options: Arc<Options>,

    /// The `args` bag given to `apply`, unchanged
    pub args: Value,

    /// Options bound to the preset that owns the handler
    pub preset_options: Value,

    /// The resolver, for handlers that depend on another extension
    pub presets: Presets,
}

type HandlerFn = dyn Fn(Value, HandlerContext) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// An asynchronous `config -> config'` function for one extension point.
#[derive(Clone)]
pub struct ExtensionHandler(Arc<HandlerFn>);

impl ExtensionHandler {
    /// Wrap an async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |config, ctx| Box::pin(f(config, ctx))))
    }

    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value, &HandlerContext) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |config, ctx| {
            let result = f(config, &ctx);
            Box::pin(async move { result })
        }))
    }

    pub(crate) fn call(&self, config: Value, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
        (self.0)(config, ctx)
    }
}

impl fmt::Debug for ExtensionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtensionHandler")
    }
}

/// What a preset contributes to one extension point.
#[derive(Debug, Clone)]
pub enum Contribution {
    /// Function of the accumulated value
    Handler(ExtensionHandler),

    /// Literal merged into the accumulated value: arrays concatenate,
    /// objects shallow-merge, anything else replaces.
    Static(Value),
}

/// The resolved contents of one preset.
#[derive(Debug, Clone, Default)]
pub struct PresetDefinition {
    /// Nested presets, expanded before this one
    pub presets: Vec<PresetConfig>,

    /// Nested addons, expanded after `presets`
    pub addons: Vec<PresetConfig>,

    /// Contributions keyed by extension name
    pub extensions: BTreeMap<String, Contribution>,
}

impl PresetDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presets<I, P>(mut self, presets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PresetConfig>,
    {
        self.presets.extend(presets.into_iter().map(Into::into));
        self
    }

    pub fn with_addons<I, P>(mut self, addons: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PresetConfig>,
    {
        self.addons.extend(addons.into_iter().map(Into::into));
        self
    }

    pub fn with_handler(mut self, extension: impl Into<String>, handler: ExtensionHandler) -> Self {
        self.extensions
            .insert(extension.into(), Contribution::Handler(handler));
        self
    }

    pub fn with_static(mut self, extension: impl Into<String>, value: Value) -> Self {
        self.extensions
            .insert(extension.into(), Contribution::Static(value));
        self
    }

    /// Build a definition from a declarative document (TOML, JSON or YAML).
    ///
    /// `presets` and `addons` become nested lists, `name` is ignored and every
    /// other top-level key is a static contribution.
    pub fn from_declarative(document: Value) -> Result<Self, String> {
        let Value::Object(mut map) = document else {
            return Err("preset document must be a table".to_string());
        };

        map.remove("name");

        let presets = take_list(&mut map, "presets")?;
        let addons = take_list(&mut map, "addons")?;

        let extensions = map
            .into_iter()
            .map(|(key, value)| (key, Contribution::Static(value)))
            .collect();

        Ok(Self {
            presets,
            addons,
            extensions,
        })
    }

    pub fn contributes(&self, extension: &str) -> bool {
        self.extensions.contains_key(extension)
    }
}

fn take_list(
    map: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Result<Vec<PresetConfig>, String> {
    match map.remove(key) {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| format!("invalid `{}` list: {}", key, e)),
    }
}

/// A preset after loading: immutable, one per declared entry.
#[derive(Debug, Clone)]
pub struct LoadedPreset {
    pub name: String,
    pub definition: PresetDefinition,
    pub options: Value,
}
