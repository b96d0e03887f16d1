//! Preset loading and extension-point composition for tableau.
//!
//! A preset is an independently packaged bundle of configuration handlers.
//! This crate loads an ordered preset list from a [`PresetCatalog`] and folds
//! every preset's contribution to a named extension point into one value.

pub mod apply;
pub mod builtin;
pub mod catalog;
pub mod error;
pub mod extension;
pub mod options;
pub mod preset;
pub mod registry;

pub use apply::{Presets, ValueKind};
pub use catalog::{BuiltinPresets, FilePresets, LoadError, PresetCatalog, PresetFactory, PresetSource};
pub use error::PresetError;
pub use extension::{CoreConfig, Ref, TypescriptConfig};
pub use options::{
    CliOptions, ConfigType, Features, Options, OptionsBuilder, OptionsError, PackageJson,
    PresetStrictness,
};
pub use preset::{
    Contribution, ExtensionHandler, HandlerContext, HandlerError, HandlerResult, LoadedPreset,
    PresetConfig, PresetDefinition,
};
pub use registry::{load_presets, user_presets, LoadReport, PresetTiers, PresetWarning};
