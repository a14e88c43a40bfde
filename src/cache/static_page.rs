//! Static Page Module
//!
//! Whole-file cache entry for small static files, reloaded synchronously
//! when the file changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use crate::error::{PageError, Result};

// == Static Entry ==
/// Cached contents of one static file.
#[derive(Debug)]
pub struct StaticEntry {
    path: PathBuf,
    /// Present only while loaded
    content: Option<Arc<[u8]>>,
    /// Modification time of the file the content was read from
    last_load: Option<SystemTime>,
    last_check: Option<Instant>,
    last_use: Option<Instant>,
}

impl StaticEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
            last_load: None,
            last_check: None,
            last_use: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Makes the next `should_reload` stat the file regardless of the interval.
    pub fn force_check(&mut self) {
        self.last_check = None;
    }

    // == Should Reload ==
    /// True if never loaded, or if the check interval has passed and the file
    /// changed since it was read.
    ///
    /// Within the interval the filesystem is not touched. A failed stat counts
    /// as changed so the following `load` surfaces the error.
    pub fn should_reload(&mut self, now: Instant, interval: Duration) -> bool {
        if !self.is_loaded() {
            return true;
        }
        if let Some(checked) = self.last_check {
            if now.saturating_duration_since(checked) < interval {
                return false;
            }
        }
        self.last_check = Some(now);
        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => self.last_load.map_or(true, |loaded| modified > loaded),
            Err(_) => true,
        }
    }

    // == Load ==
    /// Reads the whole file. On failure the entry is left unloaded.
    pub fn load(&mut self, now: Instant) -> Result<Arc<[u8]>> {
        self.unload();
        let read = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .and_then(|modified| fs::read(&self.path).map(|bytes| (modified, bytes)));
        let (modified, bytes) = read.map_err(|e| PageError::fs(&self.path, e))?;

        let content: Arc<[u8]> = Arc::from(bytes);
        debug!(path = %self.path.display(), bytes = content.len(), "static page loaded");
        self.content = Some(content.clone());
        self.last_load = Some(modified);
        self.last_check = Some(now);
        Ok(content)
    }

    // == Unload ==
    /// Drops the cached content.
    pub fn unload(&mut self) {
        self.content = None;
    }

    /// Returns the cached content and records the use.
    pub fn serve(&mut self, now: Instant) -> Option<Arc<[u8]>> {
        self.last_use = Some(now);
        self.content.clone()
    }

    /// How long the content has gone unserved; `None` when not loaded.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        if !self.is_loaded() {
            return None;
        }
        Some(self.last_use.map_or(Duration::ZERO, |used| {
            now.saturating_duration_since(used)
        }))
    }
}
