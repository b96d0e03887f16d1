//! The builder-facing side of the dev server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tableau_builder::{DevEvent, DevMount, EmittedFile};

use crate::websocket::{HmrHub, HmrMessage};

/// Files most recently published by the builder, keyed by output path.
#[derive(Debug, Clone, Default)]
pub struct PublishedFiles {
    inner: Arc<RwLock<HashMap<String, Arc<str>>>>,
}

impl PublishedFiles {
    pub fn replace(&self, files: Vec<EmittedFile>) {
        let map = files
            .into_iter()
            .map(|f| (f.path, Arc::from(f.contents)))
            .collect();

        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = map;
    }

    pub fn get(&self, path: &str) -> Option<Arc<str>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`DevMount`] backed by the dev server: published files are served over
/// HTTP and build events are pushed to HMR clients.
#[derive(Debug, Clone)]
pub struct ServerMount {
    files: PublishedFiles,
    hmr: HmrHub,
}

impl ServerMount {
    pub fn new(files: PublishedFiles, hmr: HmrHub) -> Self {
        Self { files, hmr }
    }
}

impl DevMount for ServerMount {
    fn publish(&self, files: Vec<EmittedFile>) {
        tracing::debug!("Publishing {} files", files.len());
        self.files.replace(files);
    }

    fn notify(&self, event: DevEvent) {
        match event {
            DevEvent::Rebuilt { hash, duration_ms } => {
                tracing::debug!(hash = %hash, duration_ms, "Reloading clients");
                self.hmr.broadcast(HmrMessage::Reload);
            }
            DevEvent::Failed { errors } => {
                self.hmr.broadcast(HmrMessage::BuildErrors { errors });
            }
        }
    }
}
