//! Opening compiled artifacts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::NativeLibrary;
use crate::error::{PageError, Result};

/// Turns an artifact on disk into resolved entry points.
pub trait ModuleLoader: Send + Sync {
    fn open(&self, artifact: &Path) -> Result<NativeLibrary>;
}

/// Loads artifacts as shared objects through the platform dynamic linker.
///
/// The dynamic linker returns the already-open handle when asked for a path
/// or inode it has loaded, which would hide a rebuilt artifact while the old
/// one is still open. Each load therefore opens a private copy with a fresh
/// name, removed again right after opening.
#[derive(Debug, Default)]
pub struct DylibLoader {
    staged: AtomicU64,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn staging_path(&self, artifact: &Path) -> PathBuf {
        let n = self.staged.fetch_add(1, Ordering::Relaxed);
        let mut name = artifact.as_os_str().to_owned();
        name.push(format!(".{}.{n}.load", std::process::id()));
        PathBuf::from(name)
    }
}

impl ModuleLoader for DylibLoader {
    fn open(&self, artifact: &Path) -> Result<NativeLibrary> {
        let staged = self.staging_path(artifact);
        fs::copy(artifact, &staged).map_err(|e| PageError::fs(artifact, e))?;

        // SAFETY: artifacts are produced by our own compile step from trusted pages.
        let opened = unsafe { NativeLibrary::open(&staged) };

        if let Err(e) = fs::remove_file(&staged) {
            warn!(path = %staged.display(), error = %e, "failed to remove staged module copy");
        }
        let library = opened.map_err(|e| match e {
            PageError::Load { reason, .. } => PageError::load(artifact, reason),
            other => other,
        })?;
        debug!(artifact = %artifact.display(), "shared object opened");
        Ok(library)
    }
}
