//! Turns a resolved [`BundleConfig`] into the files of a bundle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde_json::json;

use crate::cache::{BuildCache, CacheKey};
use crate::config::BundleConfig;
use crate::output::EmittedFile;
use crate::stats::{AssetInfo, BuildStats};
use crate::traits::BuilderError;

use super::assets::{self, MANAGER_RUNTIME};
use super::glob::{normalize, title_from_path, to_slash, StoryGlob};
use super::stories::{duplicate_ids, stories_json, StoryFile};
use super::templates::{ManagerPage, PreviewPage, TemplateEngine};

/// Prefix of module ids served from `BundleConfig::virtual_modules`.
pub const VIRTUAL_PREFIX: &str = "virtual:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleKind {
    Preview,
    Story,
    Manager,
}

#[derive(Debug, Clone)]
enum ModuleSource {
    File(PathBuf),
    Virtual(String),
}

#[derive(Debug, Clone)]
struct ModuleRequest {
    specifier: String,
    kind: ModuleKind,
    source: ModuleSource,
}

#[derive(Debug)]
struct Module {
    request: ModuleRequest,
    output: String,
    contents: String,
}

/// Result of one compilation.
#[derive(Debug)]
pub struct Compilation {
    pub files: Vec<EmittedFile>,
    pub stats: BuildStats,

    /// Directories a dev session should watch
    pub watch_dirs: Vec<PathBuf>,
}

/// Compiles one resolved configuration. Reusable across rebuilds.
pub struct Compiler {
    config: Arc<BundleConfig>,
    templates: TemplateEngine,
}

impl Compiler {
    pub fn new(config: Arc<BundleConfig>) -> Result<Self, BuilderError> {
        Ok(Self {
            config,
            templates: TemplateEngine::new()?,
        })
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Compile the current sources.
    ///
    /// Missing modules and bad story globs are collected in
    /// `stats.errors`; only cache and task failures are an `Err`.
    pub async fn compile(&self, cache: &BuildCache) -> Result<Compilation, BuilderError> {
        let started = Instant::now();
        let config = &self.config;
        let mut stats = BuildStats::default();

        let mut watch_dirs = vec![config.context.clone()];
        let mut requests: Vec<ModuleRequest> = config
            .entries
            .iter()
            .map(|spec| self.request(spec, ModuleKind::Preview))
            .collect();

        let mut seen = HashSet::new();
        for pattern in &config.stories {
            let glob = match StoryGlob::new(&config.context, pattern) {
                Ok(glob) => glob,
                Err(e) => {
                    stats.errors.push(e);
                    continue;
                }
            };

            let found = glob.find();
            if found.is_empty() {
                stats
                    .warnings
                    .push(format!("No story files found for specifier `{}`", glob.pattern()));
            }
            if !watch_dirs.iter().any(|d| glob.base().starts_with(d)) {
                watch_dirs.push(glob.base().to_path_buf());
            }

            for path in found {
                if seen.insert(path.clone()) {
                    requests.push(ModuleRequest {
                        specifier: self.import_path(&path),
                        kind: ModuleKind::Story,
                        source: ModuleSource::File(path),
                    });
                }
            }
        }

        requests.extend(
            config
                .manager
                .entries
                .iter()
                .map(|spec| self.request(spec, ModuleKind::Manager)),
        );

        let modules = self.read_modules(requests, &mut stats.errors).await?;
        stats.modules = modules.len();

        let story_files: Vec<StoryFile> = modules
            .iter()
            .filter(|m| m.request.kind == ModuleKind::Story)
            .map(|m| self.index(m))
            .collect();
        stats.stories = story_files.len();
        stats.errors.extend(duplicate_ids(&story_files));

        let key = self.cache_key(&modules)?;
        stats.hash = key.short().to_string();

        let cached = match cache.get(&key).await? {
            Some(bytes) => match serde_json::from_slice::<Vec<EmittedFile>>(&bytes) {
                Ok(files) => Some(files),
                Err(e) => {
                    tracing::debug!("Ignoring unreadable cache entry {}: {}", key.short(), e);
                    None
                }
            },
            None => None,
        };

        let preview = match cached {
            Some(files) => {
                tracing::debug!("Preview bundle {} served from cache", key.short());
                stats.cached = true;
                files
            }
            None => {
                let files = self.emit_preview(&modules, &story_files);
                if stats.errors.is_empty() {
                    let bytes = serde_json::to_vec(&files)
                        .map_err(|e| BuilderError::Task(e.to_string()))?;
                    cache.put(&key, &bytes).await?;
                }
                files
            }
        };

        let mut files = preview;
        files.extend(self.emit_manager(&modules, &story_files)?);

        stats.assets = files
            .iter()
            .map(|f| AssetInfo {
                name: f.path.clone(),
                size: f.contents.len(),
            })
            .collect();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        Ok(Compilation {
            files,
            stats,
            watch_dirs,
        })
    }

    fn request(&self, specifier: &str, kind: ModuleKind) -> ModuleRequest {
        let source = if specifier.starts_with(VIRTUAL_PREFIX) {
            ModuleSource::Virtual(specifier.to_string())
        } else {
            ModuleSource::File(normalize(&self.config.context.join(specifier)))
        };

        ModuleRequest {
            specifier: specifier.to_string(),
            kind,
            source,
        }
    }

    /// Project-relative import path of a story file (e.g., "./src/button.stories.js").
    fn import_path(&self, path: &Path) -> String {
        let root = self.config.context.parent().unwrap_or(&self.config.context);
        match path.strip_prefix(root) {
            Ok(rel) => format!("./{}", to_slash(rel)),
            Err(_) => to_slash(path),
        }
    }

    /// Read every module in parallel. Missing modules become errors.
    async fn read_modules(
        &self,
        requests: Vec<ModuleRequest>,
        errors: &mut Vec<String>,
    ) -> Result<Vec<Module>, BuilderError> {
        let config = Arc::clone(&self.config);

        let results = tokio::task::spawn_blocking(move || {
            requests
                .into_par_iter()
                .enumerate()
                .map(|(index, request)| read_module(&config, index, request))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| BuilderError::Task(e.to_string()))?;

        let mut modules = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(module) => modules.push(module),
                Err(e) => errors.push(e),
            }
        }
        Ok(modules)
    }

    fn index(&self, module: &Module) -> StoryFile {
        let fallback = match &module.request.source {
            ModuleSource::File(path) => {
                let root = self.config.context.parent().unwrap_or(&self.config.context);
                title_from_path(path.strip_prefix(root).unwrap_or(path))
            }
            ModuleSource::Virtual(id) => id.clone(),
        };

        StoryFile::parse(&module.contents, &module.request.specifier, &fallback)
    }

    fn cache_key(&self, modules: &[Module]) -> Result<CacheKey, BuilderError> {
        let config = serde_json::to_vec(&*self.config).map_err(|e| BuilderError::Task(e.to_string()))?;

        let parts = std::iter::once(config).chain(modules.iter().flat_map(|m| {
            [
                m.request.specifier.clone().into_bytes(),
                m.contents.clone().into_bytes(),
            ]
        }));

        Ok(CacheKey::from_parts(parts))
    }

    fn emit_preview(&self, modules: &[Module], story_files: &[StoryFile]) -> Vec<EmittedFile> {
        let mut files = Vec::new();

        let env = json!(self.config.define);
        files.push(EmittedFile::new(
            "modules/env.js",
            format!(
                "globalThis.process = globalThis.process || {{ env: {{}} }};\nObject.assign(globalThis.process.env, {});\n",
                env
            ),
        ));

        let mut preview = String::from("import './modules/env.js';\n");
        let mut registrations = String::new();
        let mut stories = story_files.iter();

        for (n, module) in modules.iter().enumerate() {
            match module.request.kind {
                ModuleKind::Preview => {
                    preview.push_str(&format!("import './{}';\n", module.output));
                }
                ModuleKind::Story => {
                    preview.push_str(&format!("import * as stories{} from './{}';\n", n, module.output));
                    if let Some(file) = stories.next() {
                        let entry = json!({ "title": file.title, "stories": file.stories });
                        registrations.push_str(&format!(
                            "globalThis.__TABLEAU__?.register({}, stories{});\n",
                            entry, n
                        ));
                    }
                }
                ModuleKind::Manager => continue,
            }
            files.push(EmittedFile::new(module.output.clone(), module.contents.clone()));
        }

        preview.push('\n');
        preview.push_str(&registrations);
        preview.push_str("globalThis.__TABLEAU__?.start();\n");
        files.push(EmittedFile::new("preview.js", preview));

        files
    }

    fn emit_manager(
        &self,
        modules: &[Module],
        story_files: &[StoryFile],
    ) -> Result<Vec<EmittedFile>, BuilderError> {
        let config = &self.config;
        let mut files = Vec::new();

        let mut manager = String::new();
        for module in modules.iter().filter(|m| m.request.kind == ModuleKind::Manager) {
            manager.push_str(&format!("import './{}';\n", module.output));
            files.push(EmittedFile::new(module.output.clone(), module.contents.clone()));
        }

        let index = stories_json(story_files);
        manager.push_str(&format!("\nconst INDEX = {};\n\n", index));
        manager.push_str(MANAGER_RUNTIME);
        files.push(EmittedFile::new("manager.js", manager));

        files.push(EmittedFile::new("manager.css", assets::manager_css(config.minify)));

        files.push(EmittedFile::new(
            "index.html",
            self.templates.render_manager(&ManagerPage {
                title: config.manager.title.clone(),
                public_path: config.public_path.clone(),
                refs: config.manager.refs.clone(),
            })?,
        ));
        files.push(EmittedFile::new(
            "iframe.html",
            self.templates.render_preview(&PreviewPage {
                title: config.manager.title.clone(),
                public_path: config.public_path.clone(),
                head: config.preview_head.clone(),
                body: config.preview_body.clone(),
            })?,
        ));

        if config.stories_json {
            files.push(EmittedFile::new("stories.json", index.to_string()));
        }

        Ok(files)
    }
}

fn read_module(config: &BundleConfig, index: usize, request: ModuleRequest) -> Result<Module, String> {
    let contents = match &request.source {
        ModuleSource::Virtual(id) => config
            .virtual_modules
            .get(id)
            .cloned()
            .ok_or_else(|| format!("Virtual module not found: {}", id))?,
        ModuleSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("Module not found: {} (looked at {})", request.specifier, path.display())
            } else {
                format!("Failed to read {}: {}", path.display(), e)
            }
        })?,
    };

    let output = format!("modules/{}-{}", index, output_name(&request));

    Ok(Module {
        request,
        output,
        contents,
    })
}

/// File name a module is emitted under, derived from its specifier.
fn output_name(request: &ModuleRequest) -> String {
    let raw = match &request.source {
        ModuleSource::File(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        ModuleSource::Virtual(id) => format!("{}.js", id.trim_start_matches(VIRTUAL_PREFIX)),
    };

    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tableau_presets::{ConfigType, OptionsBuilder};
    use tempfile::tempdir;

    fn config(context: &Path, entries: &[&str], stories: &[&str]) -> Arc<BundleConfig> {
        let options = OptionsBuilder::new(context, ConfigType::Production)
            .build()
            .unwrap();
        let mut config = BundleConfig::seed(&options);
        config.entries = entries.iter().map(|s| s.to_string()).collect();
        config.stories = stories.iter().map(|s| s.to_string()).collect();
        config.stories_json = true;
        config.virtual_modules = BTreeMap::from([(
            "virtual:tableau/runtime".to_string(),
            "globalThis.__TABLEAU__ = {};".to_string(),
        )]);
        Arc::new(config)
    }

    fn project() -> tempfile::TempDir {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join(".tableau")).unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(
            temp.path().join("src/button.stories.js"),
            "export default { title: 'Button' };\nexport const Primary = () => '<button>';\n",
        )
        .unwrap();
        fs::write(temp.path().join(".tableau/preview.js"), "console.log('preview');").unwrap();
        temp
    }

    #[tokio::test]
    async fn emits_bundle_files() {
        let temp = project();
        let context = temp.path().join(".tableau");
        let cache = BuildCache::open(temp.path().join("cache")).unwrap();
        let compiler = Compiler::new(config(
            &context,
            &["virtual:tableau/runtime", "./preview.js"],
            &["../src/**/*.stories.js"],
        ))
        .unwrap();

        let compilation = compiler.compile(&cache).await.unwrap();
        let paths: Vec<_> = compilation.files.iter().map(|f| f.path.as_str()).collect();

        assert!(compilation.stats.errors.is_empty(), "{:?}", compilation.stats.errors);
        assert_eq!(compilation.stats.stories, 1);
        assert_eq!(compilation.stats.modules, 3);
        for expected in ["preview.js", "manager.js", "manager.css", "index.html", "iframe.html", "stories.json"] {
            assert!(paths.contains(&expected), "missing {}", expected);
        }

        let preview = &compilation.files.iter().find(|f| f.path == "preview.js").unwrap().contents;
        assert!(preview.starts_with("import './modules/env.js';\nimport './modules/0-tableau-runtime.js';"));
        assert!(preview.contains("button--primary"));
    }

    #[tokio::test]
    async fn missing_modules_are_reported_not_raised() {
        let temp = project();
        let context = temp.path().join(".tableau");
        let cache = BuildCache::open(temp.path().join("cache")).unwrap();
        let compiler = Compiler::new(config(
            &context,
            &["./missing.js", "virtual:nowhere"],
            &[],
        ))
        .unwrap();

        let compilation = compiler.compile(&cache).await.unwrap();

        assert_eq!(compilation.stats.errors.len(), 2);
        assert!(compilation.stats.errors[0].starts_with("Module not found: ./missing.js"));
        assert_eq!(compilation.stats.errors[1], "Virtual module not found: virtual:nowhere");
    }

    #[tokio::test]
    async fn colliding_story_ids_are_compile_errors() {
        let temp = project();
        fs::create_dir_all(temp.path().join("src/legacy")).unwrap();
        fs::write(
            temp.path().join("src/legacy/button.stories.js"),
            "export default { title: 'Button' };\nexport const Primary = () => '<button>';\n",
        )
        .unwrap();
        let context = temp.path().join(".tableau");
        let cache = BuildCache::open(temp.path().join("cache")).unwrap();
        let compiler = Compiler::new(config(&context, &[], &["../src/**/*.stories.js"])).unwrap();

        let compilation = compiler.compile(&cache).await.unwrap();

        assert_eq!(compilation.stats.stories, 2);
        assert_eq!(compilation.stats.errors.len(), 1, "{:?}", compilation.stats.errors);
        assert!(compilation.stats.errors[0].starts_with("Duplicate story id `button--primary`"));
    }

    #[tokio::test]
    async fn unchanged_sources_hit_the_cache() {
        let temp = project();
        let context = temp.path().join(".tableau");
        let cache = BuildCache::open(temp.path().join("cache")).unwrap();
        let compiler = Compiler::new(config(&context, &["./preview.js"], &["../src/*.stories.js"])).unwrap();

        let first = compiler.compile(&cache).await.unwrap();
        let second = compiler.compile(&cache).await.unwrap();

        assert!(!first.stats.cached);
        assert!(second.stats.cached);
        assert_eq!(first.stats.hash, second.stats.hash);

        fs::write(temp.path().join("src/button.stories.js"), "export const Other = () => '';").unwrap();
        let third = compiler.compile(&cache).await.unwrap();

        assert!(!third.stats.cached);
        assert_ne!(third.stats.hash, first.stats.hash);
    }
}
