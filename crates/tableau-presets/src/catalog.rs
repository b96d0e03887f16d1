//! Resolution of preset identifiers to preset definitions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::builtin;
use crate::options::Options;
use crate::preset::{HandlerError, PresetDefinition};

/// Builds a preset definition from the run options and the preset's own options.
pub type PresetFactory =
    Arc<dyn Fn(&Options, &Value) -> Result<PresetDefinition, HandlerError> + Send + Sync>;

/// Errors that can occur while resolving a single preset.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Preset not found: {0}")]
    NotFound(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid preset {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("Preset factory {name} failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: HandlerError,
    },

    #[error("Preset nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// A place preset identifiers can be resolved from.
#[async_trait]
pub trait PresetSource: Send + Sync {
    /// Source identifier for log output (e.g., "builtin", "file")
    fn name(&self) -> &'static str;

    /// Whether this source can resolve `id`.
    fn resolves(&self, id: &str) -> bool;

    /// Load the definition for `id`.
    async fn load(
        &self,
        id: &str,
        preset_options: &Value,
        options: &Options,
    ) -> Result<PresetDefinition, LoadError>;
}

/// Presets compiled into the binary, keyed by identifier.
#[derive(Clone, Default)]
pub struct BuiltinPresets {
    factories: HashMap<String, PresetFactory>,
}

impl BuiltinPresets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Options, &Value) -> Result<PresetDefinition, HandlerError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl PresetSource for BuiltinPresets {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn resolves(&self, id: &str) -> bool {
        self.contains(id)
    }

    async fn load(
        &self,
        id: &str,
        preset_options: &Value,
        options: &Options,
    ) -> Result<PresetDefinition, LoadError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| LoadError::NotFound(id.to_string()))?;

        factory(options, preset_options).map_err(|source| LoadError::Factory {
            name: id.to_string(),
            source,
        })
    }
}

const PRESET_FILE_EXTENSIONS: &[&str] = &["toml", "json", "yaml", "yml"];

/// Declarative presets read from TOML, JSON or YAML files.
///
/// Relative identifiers are resolved against `base_dir` (the config directory).
#[derive(Debug, Clone)]
pub struct FilePresets {
    base_dir: PathBuf,
}

impl FilePresets {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Find the file an identifier refers to, trying known extensions.
    pub fn locate(&self, id: &str) -> Option<PathBuf> {
        if !is_path_like(id) {
            return None;
        }

        let direct = self.base_dir.join(id);
        if direct.is_file() {
            return Some(direct);
        }

        PRESET_FILE_EXTENSIONS
            .iter()
            .map(|ext| self.base_dir.join(format!("{}.{}", id, ext)))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl PresetSource for FilePresets {
    fn name(&self) -> &'static str {
        "file"
    }

    fn resolves(&self, id: &str) -> bool {
        self.locate(id).is_some()
    }

    async fn load(
        &self,
        id: &str,
        _preset_options: &Value,
        _options: &Options,
    ) -> Result<PresetDefinition, LoadError> {
        let path = self
            .locate(id)
            .ok_or_else(|| LoadError::NotFound(id.to_string()))?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;

        let document = parse_document(&path, &content)?;

        PresetDefinition::from_declarative(document).map_err(|message| LoadError::Invalid {
            name: id.to_string(),
            message,
        })
    }
}

fn is_path_like(id: &str) -> bool {
    id.starts_with("./")
        || id.starts_with("../")
        || Path::new(id).is_absolute()
        || Path::new(id)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| PRESET_FILE_EXTENSIONS.contains(&ext))
}

fn parse_document(path: &Path, content: &str) -> Result<Value, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let parsed = match ext {
        "json" => serde_json::from_str::<Value>(content).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string()),
        _ => toml::from_str::<Value>(content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| LoadError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Ordered set of preset sources. Builtins are consulted first.
pub struct PresetCatalog {
    builtins: BuiltinPresets,
    sources: Vec<Arc<dyn PresetSource>>,
}

impl PresetCatalog {
    /// A catalog with no sources at all.
    pub fn empty() -> Self {
        Self {
            builtins: BuiltinPresets::new(),
            sources: Vec::new(),
        }
    }

    /// The default catalog for a run: bundled presets plus files under the
    /// config directory.
    pub fn for_options(options: &Options) -> Self {
        let mut catalog = Self::empty();
        builtin::register_defaults(&mut catalog.builtins);
        catalog.add_source(Arc::new(FilePresets::new(&options.config_dir)));
        catalog
    }

    pub fn builtins_mut(&mut self) -> &mut BuiltinPresets {
        &mut self.builtins
    }

    /// Register a bundled preset.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Options, &Value) -> Result<PresetDefinition, HandlerError> + Send + Sync + 'static,
    {
        self.builtins.register(name, factory);
    }

    pub fn add_source(&mut self, source: Arc<dyn PresetSource>) {
        self.sources.push(source);
    }

    pub fn resolves(&self, id: &str) -> bool {
        self.builtins.resolves(id) || self.sources.iter().any(|s| s.resolves(id))
    }

    /// Resolve `id` through the first source that knows it.
    pub async fn load(
        &self,
        id: &str,
        preset_options: &Value,
        options: &Options,
    ) -> Result<PresetDefinition, LoadError> {
        if self.builtins.resolves(id) {
            return self.builtins.load(id, preset_options, options).await;
        }

        for source in &self.sources {
            if source.resolves(id) {
                tracing::debug!(preset = id, source = source.name(), "resolving preset");
                return source.load(id, preset_options, options).await;
            }
        }

        Err(LoadError::NotFound(id.to_string()))
    }
}
