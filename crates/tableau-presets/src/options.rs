//! The per-run options context threaded through every preset call.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::preset::PresetConfig;

/// Whether the run targets the dev server or a production build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigType {
    Development,
    Production,
}

impl ConfigType {
    pub fn is_production(self) -> bool {
        self == ConfigType::Production
    }
}

/// What happens when a preset identifier cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetStrictness {
    /// The first resolution error aborts the run.
    Strict,
    /// The failing preset is skipped and reported as a warning.
    Lenient,
}

/// Minimal view of the project's package.json.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageJson {
    /// Load `package.json` from a project root. A missing file yields defaults.
    pub fn load(project_dir: &Path) -> Result<Self, OptionsError> {
        let path = project_dir.join("package.json");
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| OptionsError::Io {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| OptionsError::PackageJson { path, source })
    }
}

/// Flags that come straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub static_dirs: Vec<PathBuf>,
    pub https: bool,
    pub ssl_ca: Vec<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub smoke_test: bool,
    pub ci: bool,
    pub quiet: bool,
    pub no_open: bool,
    pub debug_config: bool,
    pub stats_json: Option<PathBuf>,
    pub preview_url: Option<String>,
}

/// Optional behaviour toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    /// Emit a `stories.json` manifest next to the build output
    pub build_stories_json: bool,
    pub postcss: bool,
}

/// Immutable configuration for one run.
///
/// Built once through [`OptionsBuilder`] before any preset executes and shared
/// behind an `Arc` afterwards.
#[derive(Debug, Clone)]
pub struct Options {
    pub config_dir: PathBuf,
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub framework: String,
    pub framework_presets: Vec<PresetConfig>,
    pub package_json: PackageJson,
    pub config_type: ConfigType,
    pub cli: CliOptions,
    pub ignore_preview: bool,
    pub docs_mode: bool,
    pub strictness: PresetStrictness,
    pub features: Features,
}

/// Errors raised while assembling [`Options`]. These are always fatal.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Configuration directory not found: {}", .0.display())]
    ConfigDirNotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    PackageJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TLS settings: {0}")]
    Tls(String),
}

/// Builder for [`Options`].
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    config_dir: PathBuf,
    project_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    framework: String,
    framework_presets: Option<Vec<PresetConfig>>,
    config_type: ConfigType,
    cli: CliOptions,
    ignore_preview: bool,
    docs_mode: bool,
    strictness: Option<PresetStrictness>,
    features: Features,
}

impl OptionsBuilder {
    pub fn new(config_dir: impl Into<PathBuf>, config_type: ConfigType) -> Self {
        Self {
            config_dir: config_dir.into(),
            project_dir: None,
            output_dir: None,
            cache_dir: None,
            framework: "html".to_string(),
            framework_presets: None,
            config_type,
            cli: CliOptions::default(),
            ignore_preview: false,
            docs_mode: false,
            strictness: None,
            features: Features::default(),
        }
    }

    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Select the framework. Unless overridden with [`Self::framework_presets`],
    /// its preset list is `tableau/framework-<name>`.
    pub fn framework(mut self, name: impl Into<String>) -> Self {
        self.framework = name.into();
        self
    }

    pub fn framework_presets(mut self, presets: Vec<PresetConfig>) -> Self {
        self.framework_presets = Some(presets);
        self
    }

    pub fn cli(mut self, cli: CliOptions) -> Self {
        self.cli = cli;
        self
    }

    pub fn ignore_preview(mut self, ignore: bool) -> Self {
        self.ignore_preview = ignore;
        self
    }

    pub fn docs_mode(mut self, docs: bool) -> Self {
        self.docs_mode = docs;
        self
    }

    pub fn strictness(mut self, strictness: PresetStrictness) -> Self {
        self.strictness = Some(strictness);
        self
    }

    pub fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Validate and freeze the options.
    pub fn build(self) -> Result<Options, OptionsError> {
        if !self.config_dir.is_dir() {
            return Err(OptionsError::ConfigDirNotFound(self.config_dir));
        }

        validate_tls(&self.cli)?;

        let project_dir = self.project_dir.unwrap_or_else(|| {
            self.config_dir
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let package_json = PackageJson::load(&project_dir)?;

        let output_dir = self
            .output_dir
            .unwrap_or_else(|| project_dir.join("tableau-static"));
        let cache_dir = self
            .cache_dir
            .unwrap_or_else(|| project_dir.join(".cache").join("tableau"));

        let framework_presets = self.framework_presets.unwrap_or_else(|| {
            vec![PresetConfig::from(format!(
                "tableau/framework-{}",
                self.framework
            ))]
        });

        let strictness = self.strictness.unwrap_or(if self.ignore_preview {
            PresetStrictness::Lenient
        } else {
            PresetStrictness::Strict
        });

        Ok(Options {
            config_dir: self.config_dir,
            project_dir,
            output_dir,
            cache_dir,
            framework: self.framework,
            framework_presets,
            package_json,
            config_type: self.config_type,
            cli: self.cli,
            ignore_preview: self.ignore_preview,
            docs_mode: self.docs_mode,
            strictness,
            features: self.features,
        })
    }
}

fn validate_tls(cli: &CliOptions) -> Result<(), OptionsError> {
    if cli.https && (cli.ssl_cert.is_none() || cli.ssl_key.is_none()) {
        return Err(OptionsError::Tls(
            "https requires both an SSL certificate and key".to_string(),
        ));
    }

    let files = cli
        .ssl_ca
        .iter()
        .chain(cli.ssl_cert.iter())
        .chain(cli.ssl_key.iter());

    for file in files {
        if !file.is_file() {
            return Err(OptionsError::Tls(format!(
                "file not found: {}",
                file.display()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_missing_config_dir() {
        let temp = tempdir().unwrap();
        let err = OptionsBuilder::new(temp.path().join("nope"), ConfigType::Development)
            .build()
            .unwrap_err();

        assert!(matches!(err, OptionsError::ConfigDirNotFound(_)));
    }

    #[test]
    fn derives_framework_presets_and_dirs() {
        let temp = tempdir().unwrap();
        let config_dir = temp.path().join(".tableau");
        fs::create_dir_all(&config_dir).unwrap();

        let options = OptionsBuilder::new(&config_dir, ConfigType::Production)
            .framework("web-components")
            .build()
            .unwrap();

        assert_eq!(
            options.framework_presets,
            vec![PresetConfig::from("tableau/framework-web-components")]
        );
        assert_eq!(options.project_dir, temp.path());
        assert_eq!(options.output_dir, temp.path().join("tableau-static"));
        assert_eq!(options.strictness, PresetStrictness::Strict);
    }

    #[test]
    fn ignore_preview_defaults_to_lenient() {
        let temp = tempdir().unwrap();
        let options = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .ignore_preview(true)
            .build()
            .unwrap();

        assert_eq!(options.strictness, PresetStrictness::Lenient);
    }

    #[test]
    fn loads_package_json() {
        let temp = tempdir().unwrap();
        let config_dir = temp.path().join(".tableau");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{"name": "demo", "version": "1.2.3", "devDependencies": {"lit": "^2.0.0"}}"#,
        )
        .unwrap();

        let options = OptionsBuilder::new(&config_dir, ConfigType::Development)
            .build()
            .unwrap();

        assert_eq!(options.package_json.name, "demo");
        assert_eq!(
            options.package_json.dev_dependencies.get("lit").map(String::as_str),
            Some("^2.0.0")
        );
    }

    #[test]
    fn https_requires_cert_and_key() {
        let temp = tempdir().unwrap();
        let cli = CliOptions {
            https: true,
            ..Default::default()
        };

        let err = OptionsBuilder::new(temp.path(), ConfigType::Development)
            .cli(cli)
            .build()
            .unwrap_err();

        assert!(matches!(err, OptionsError::Tls(_)));
    }
}
