//! File watching for dev rebuilds.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

use crate::traits::BuilderError;

/// A change to a watched source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// Watches source directories and delivers changes in batches.
///
/// Events arriving within `debounce` of each other are coalesced into one
/// batch, keeping the last event per path.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn new(
        paths: &[PathBuf],
        debounce: Duration,
    ) -> Result<(Self, async_mpsc::Receiver<Vec<WatchEvent>>), BuilderError> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(|e| BuilderError::Watch(e.to_string()))?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(|e| BuilderError::Watch(format!("{}: {}", path.display(), e)))?;
                tracing::debug!("Watching {}", path.display());
            }
        }

        std::thread::spawn(move || forward_batches(sync_rx, debounce, async_tx));

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

/// Group raw events into batches until either channel closes. A batch still
/// being collected when the watcher goes away is delivered before returning.
fn forward_batches(
    events: mpsc::Receiver<notify::Event>,
    debounce: Duration,
    batches: async_mpsc::Sender<Vec<WatchEvent>>,
) {
    while let Ok(first) = events.recv() {
        let mut batch: Vec<WatchEvent> = Vec::new();
        push_event(&mut batch, first);

        let disconnected = loop {
            match events.recv_timeout(debounce) {
                Ok(event) => push_event(&mut batch, event),
                Err(RecvTimeoutError::Timeout) => break false,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        // Receiver gone means the session has stopped
        if !batch.is_empty() && batches.blocking_send(batch).is_err() {
            return;
        }
        if disconnected {
            return;
        }
    }
}

fn push_event(batch: &mut Vec<WatchEvent>, event: notify::Event) {
    for path in event.paths {
        if let Some(watch_event) = classify_event(path, &event.kind) {
            batch.retain(|existing| existing.path() != watch_event.path());
            batch.push(watch_event);
        }
    }
}

fn classify_event(path: PathBuf, kind: &notify::EventKind) -> Option<WatchEvent> {
    use notify::EventKind;

    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path)),
        EventKind::Remove(_) => Some(WatchEvent::Removed(path)),
        EventKind::Modify(_) => Some(WatchEvent::Modified(path)),
        _ => None,
    }
}
