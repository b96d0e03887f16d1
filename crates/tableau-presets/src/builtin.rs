//! Presets bundled with tableau: the common core preset, framework
//! presets and the docs addon.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::catalog::BuiltinPresets;
use crate::extension;
use crate::preset::{ExtensionHandler, HandlerResult, PresetDefinition};

pub const COMMON_PRESET: &str = "tableau/common";
pub const HTML_FRAMEWORK: &str = "tableau/framework-html";
pub const WEB_COMPONENTS_FRAMEWORK: &str = "tableau/framework-web-components";
pub const DOCS_ADDON: &str = "tableau/addon-docs/preset";

/// Default builder when no preset sets `core.builder`.
pub const DEFAULT_BUILDER: &str = "bundle";

/// Register every bundled preset.
pub fn register_defaults(builtins: &mut BuiltinPresets) {
    builtins.register(COMMON_PRESET, |_options, _preset_options| Ok(common_preset()));
    builtins.register(HTML_FRAMEWORK, |_options, _preset_options| {
        Ok(framework_preset("html", HTML_RENDERER))
    });
    builtins.register(WEB_COMPONENTS_FRAMEWORK, |_options, _preset_options| {
        Ok(framework_preset("web-components", WEB_COMPONENTS_RENDERER))
    });
    builtins.register(DOCS_ADDON, |options, _preset_options| {
        Ok(docs_addon(options.docs_mode))
    });
}

fn common_preset() -> PresetDefinition {
    PresetDefinition::new()
        .with_static(extension::CORE, json!({ "builder": DEFAULT_BUILDER }))
        .with_static(
            extension::TYPESCRIPT,
            json!({ "check": false, "reactDocgen": "react-docgen-typescript" }),
        )
        .with_handler(
            extension::BABEL,
            ExtensionHandler::new(|config, ctx| {
                load_babelrc(config, ctx.options.config_dir.join(".babelrc"))
            }),
        )
        .with_handler(
            extension::PREVIEW_HEAD,
            ExtensionHandler::new(|config, ctx| {
                append_file(config, ctx.options.config_dir.join("preview-head.html"))
            }),
        )
        .with_handler(
            extension::PREVIEW_BODY,
            ExtensionHandler::new(|config, ctx| {
                append_file(config, ctx.options.config_dir.join("preview-body.html"))
            }),
        )
        .with_handler(
            extension::ENTRIES,
            ExtensionHandler::sync(|config, ctx| {
                Ok(push_if_exists(config, &ctx.options.config_dir, &["preview.js", "preview.mjs"]))
            }),
        )
        .with_handler(
            extension::MANAGER_ENTRIES,
            ExtensionHandler::sync(|config, ctx| {
                Ok(push_if_exists(config, &ctx.options.config_dir, &["manager.js", "manager.mjs"]))
            }),
        )
}

fn framework_preset(name: &str, renderer: &str) -> PresetDefinition {
    let id = format!("virtual:tableau/framework/{}", name);

    PresetDefinition::new()
        .with_static(extension::ENTRIES, json!([id]))
        .with_static(extension::VIRTUAL_MODULES, json!({ id: renderer }))
}

fn docs_addon(docs_mode: bool) -> PresetDefinition {
    let id = "virtual:tableau/addon-docs/manager";
    let source = DOCS_MANAGER.replace("__DOCS_MODE__", if docs_mode { "true" } else { "false" });

    PresetDefinition::new()
        .with_static(extension::MANAGER_ENTRIES, json!([id]))
        .with_static(extension::VIRTUAL_MODULES, json!({ id: source }))
}

fn merge_objects(config: Value, overrides: Value) -> Value {
    match (config, overrides) {
        (Value::Object(mut base), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (Value::Null, overrides) => overrides,
        (config, _) => config,
    }
}

async fn load_babelrc(config: Value, babelrc: PathBuf) -> HandlerResult {
    let overrides = match tokio::fs::read_to_string(&babelrc).await {
        Ok(content) => serde_json::from_str::<Value>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({
            "sourceType": "unambiguous",
            "presets": [],
            "plugins": [],
        }),
        Err(e) => return Err(e.into()),
    };

    Ok(merge_objects(config, overrides))
}

async fn append_file(config: Value, path: PathBuf) -> HandlerResult {
    let base = config.as_str().unwrap_or_default().to_string();

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Value::String(format!("{}{}", base, content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::String(base)),
        Err(e) => Err(e.into()),
    }
}

fn push_if_exists(config: Value, dir: &Path, candidates: &[&str]) -> Value {
    let mut items = match config {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => return other,
    };

    if let Some(found) = candidates.iter().map(|c| dir.join(c)).find(|p| p.is_file()) {
        items.push(Value::String(found.display().to_string()));
    }

    Value::Array(items)
}

const HTML_RENDERER: &str = r#"const root = document.getElementById('root');
globalThis.__TABLEAU_RENDER__ = function render(story, args) {
  const result = story(args);
  if (typeof result === 'string') {
    root.innerHTML = result;
  } else if (result instanceof Node) {
    root.innerHTML = '';
    root.appendChild(result);
  } else {
    throw new Error('Expecting an HTML snippet or DOM node from the story');
  }
};"#;

const WEB_COMPONENTS_RENDERER: &str = r#"const root = document.getElementById('root');
globalThis.__TABLEAU_RENDER__ = function render(story, args) {
  const result = story(args);
  if (result instanceof Node) {
    if (root.firstChild === result) return;
    root.innerHTML = '';
    root.appendChild(result);
  } else if (typeof result === 'string') {
    root.innerHTML = result;
  } else {
    throw new Error('Expecting a custom element, DOM node or HTML string from the story');
  }
};"#;

const DOCS_MANAGER: &str = r#"globalThis.__TABLEAU_DOCS_MODE__ = __DOCS_MODE__;
document.documentElement.dataset.docsMode = String(__DOCS_MODE__);"#;
