//! Directory modification watching.
//!
//! Wraps the platform watcher behind a small start/stop interface. The
//! callback runs on the watcher's own notification thread and receives the
//! absolute path of every modified, non-directory file beneath the watched
//! directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Watches one directory tree for file modifications.
pub struct DirectoryWatcher {
    directory: PathBuf,
    on_modified: Arc<dyn Fn(PathBuf) + Send + Sync>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.directory)
            .field("running", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// Create a watcher for `directory`; `on_modified` is invoked with the
    /// absolute path of each modified file.
    pub fn new(
        directory: PathBuf,
        on_modified: impl Fn(PathBuf) + Send + Sync + 'static,
    ) -> Self {
        Self {
            directory,
            on_modified: Arc::new(on_modified),
            watcher: None,
        }
    }

    /// Start watching. Starting an already-running watcher is a no-op.
    pub fn start(&mut self) -> Result<(), notify::Error> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let callback = Arc::clone(&self.on_modified);
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if path.is_file() {
                        callback(path);
                    }
                }
            }
            Err(err) => tracing::warn!("filesystem watcher error: {err}"),
        })?;
        watcher.watch(&self.directory, RecursiveMode::Recursive)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop watching. Stopping a non-running watcher is a no-op.
    pub fn stop(&mut self) {
        self.watcher = None;
    }

    /// True while the watcher is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// The watched directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
