//! Compiled output and the dev mount builders publish it to.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::traits::BuilderError;

/// A file produced by a compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedFile {
    /// Output-relative path with forward slashes (e.g., "assets/preview.js")
    pub path: String,

    pub contents: String,
}

impl EmittedFile {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Events a dev session reports to whoever hosts it.
#[derive(Debug, Clone, PartialEq)]
pub enum DevEvent {
    /// A compilation finished without errors
    Rebuilt { hash: String, duration_ms: u64 },

    /// A compilation finished with errors; the session keeps watching
    Failed { errors: Vec<String> },
}

/// The dev server surface a builder attaches to during `start`.
///
/// Builders never own the HTTP server; they publish compiled files and
/// report rebuilds through this trait.
pub trait DevMount: Send + Sync {
    /// Replace the served output with `files`.
    fn publish(&self, files: Vec<EmittedFile>);

    /// Report a build outcome.
    fn notify(&self, event: DevEvent);
}

/// Write emitted files under `output_dir`.
pub fn write_files(output_dir: &Path, files: &[EmittedFile]) -> Result<(), BuilderError> {
    for file in files {
        let path = output_dir.join(&file.path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BuilderError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, &file.contents).map_err(|source| BuilderError::Write { path, source })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_nested_files() {
        let temp = tempdir().unwrap();
        let files = vec![
            EmittedFile::new("index.html", "<html></html>"),
            EmittedFile::new("assets/preview.js", "export {};"),
        ];

        write_files(temp.path(), &files).unwrap();

        assert!(temp.path().join("index.html").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("assets/preview.js")).unwrap(),
            "export {};"
        );
    }
}
