//! Builder lifecycle for tableau.
//!
//! A [`Builder`] turns a resolved [`BundleConfig`] into compiled output, either
//! once for production or as a watching dev session attached to a [`DevMount`].
//! [`BuilderController`] wraps any backend behind the same start/build/bail
//! contract, with timing, cache ownership and abort handling.

pub mod bundle;
pub mod cache;
pub mod config;
pub mod controller;
pub mod output;
pub mod registry;
pub mod session;
pub mod stats;
pub mod traits;
pub mod watcher;

pub use bundle::BundleBuilder;
pub use cache::{BuildCache, CacheError, CacheKey};
pub use config::{resolve_config, BundleConfig, ManagerConfig};
pub use controller::{BailHandle, BuildOutcome, BuilderController, Phase, StartOutcome};
pub use output::{write_files, DevEvent, DevMount, EmittedFile};
pub use registry::BuilderRegistry;
pub use session::{prepare, select, Prepared, Selection};
pub use stats::{AssetInfo, BuildStats};
pub use traits::{BuildArgs, Builder, BuilderError, StartArgs, StartResult};
pub use watcher::{FileWatcher, WatchEvent};
