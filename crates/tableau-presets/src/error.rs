//! Errors raised while loading or applying presets.

use crate::apply::ValueKind;
use crate::catalog::LoadError;
use crate::preset::HandlerError;

/// Errors from the preset registry and the extension resolver.
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    /// A preset identifier could not be loaded under strict mode.
    #[error("Failed to load preset {name} (level {level}): {source}")]
    Load {
        name: String,
        level: usize,
        #[source]
        source: LoadError,
    },

    /// A handler failed while folding an extension.
    #[error("Preset {preset} failed while applying `{extension}`: {source}")]
    Handler {
        preset: String,
        extension: String,
        #[source]
        source: HandlerError,
    },

    /// A handler returned a value of a different shape than it received.
    #[error("Preset {preset} turned `{extension}` from {expected} into {found}")]
    ShapeMismatch {
        extension: String,
        preset: String,
        expected: ValueKind,
        found: ValueKind,
    },

    /// The folded value does not match the type the caller asked for.
    #[error("Invalid value for `{extension}`: {source}")]
    Decode {
        extension: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PresetError {
    /// Name of the preset responsible for the error, if any.
    pub fn preset(&self) -> Option<&str> {
        match self {
            PresetError::Load { name, .. } => Some(name),
            PresetError::Handler { preset, .. } | PresetError::ShapeMismatch { preset, .. } => {
                Some(preset)
            }
            PresetError::Decode { .. } => None,
        }
    }
}
