//! Build statistics.

use serde::{Deserialize, Serialize};

/// One emitted asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub name: String,
    pub size: usize,
}

/// Outcome of one compilation. Compile errors are collected here rather
/// than returned as `Err` so dev sessions can report them and keep going.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    /// Content hash of the compiled inputs
    pub hash: String,

    /// Number of modules bundled (entries and stories)
    pub modules: usize,

    /// Number of story files found
    pub stories: usize,

    pub assets: Vec<AssetInfo>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    /// Whether the preview output came from the build cache
    pub cached: bool,

    pub duration_ms: u64,
}

impl BuildStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Total size of all emitted assets in bytes.
    pub fn total_size(&self) -> usize {
        self.assets.iter().map(|a| a.size).sum()
    }
}
