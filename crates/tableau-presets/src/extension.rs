//! Well-known extension points and their value types.

use serde::{Deserialize, Serialize};

/// Core settings, including builder selection.
pub const CORE: &str = "core";
/// Compiler (transpiler) options.
pub const BABEL: &str = "babel";
/// Preview entry modules.
pub const ENTRIES: &str = "entries";
/// Story file globs.
pub const STORIES: &str = "stories";
/// Manager UI entry modules.
pub const MANAGER_ENTRIES: &str = "managerEntries";
/// Composed external story collections.
pub const REFS: &str = "refs";
pub const TYPESCRIPT: &str = "typescript";
/// Bundler configuration for the preview.
pub const WEBPACK: &str = "webpack";
/// Bundler configuration for the manager UI.
pub const MANAGER_WEBPACK: &str = "managerWebpack";
/// HTML injected into the preview `<head>`.
pub const PREVIEW_HEAD: &str = "previewHead";
/// HTML injected into the preview `<body>`.
pub const PREVIEW_BODY: &str = "previewBody";
/// Inline module sources addressable as `virtual:` entries.
pub const VIRTUAL_MODULES: &str = "virtualModules";

/// Value of the `core` extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Name of the builder backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,
}

/// Value of the `typescript` extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypescriptConfig {
    #[serde(default)]
    pub check: bool,

    /// Docgen flavour, `None` to disable
    #[serde(default)]
    pub react_docgen: Option<String>,
}

impl Default for TypescriptConfig {
    fn default() -> Self {
        Self {
            check: false,
            react_docgen: Some("react-docgen-typescript".to_string()),
        }
    }
}

/// An external story collection composed into the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}
