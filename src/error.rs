//! Error types for the page cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

// == Page Error Enum ==
/// Unified error type for compiling, loading and serving pages.
#[derive(Error, Debug)]
pub enum PageError {
    /// The template translator rejected the source; no compiler was spawned
    #[error("parse error in {path} (code {code}): {message}")]
    Parse {
        path: String,
        message: String,
        code: i32,
    },

    /// The toolchain exited unsuccessfully; `output` holds its diagnostics verbatim
    #[error("compilation of {path} failed: {message}")]
    Compile {
        path: String,
        message: String,
        output: String,
    },

    /// The artifact was built but could not be opened or is missing entry points
    #[error("failed to load module {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// stat/read/write/spawn failure on a source, temp or artifact path
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The caller's arena could not hold a page object
    #[error("arena could not provide {size} bytes for a page object")]
    Alloc { size: usize },
}

impl PageError {
    /// Builds a `Filesystem` error for `path`.
    pub fn fs(path: impl AsRef<Path>, source: io::Error) -> Self {
        PageError::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Builds a `Parse` error, the only failure a translator reports.
    pub fn parse(path: impl Into<String>, message: impl Into<String>, code: i32) -> Self {
        PageError::Parse {
            path: path.into(),
            message: message.into(),
            code,
        }
    }

    /// Builds a `Load` error for `path`.
    pub fn load(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        PageError::Load {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Captured compiler diagnostics, if this is a compile failure.
    pub fn compiler_output(&self) -> Option<&str> {
        match self {
            PageError::Compile { output, .. } => Some(output),
            _ => None,
        }
    }
}

// == Result Type Aliases ==
/// Convenience Result type for the page cache.
pub type Result<T> = std::result::Result<T, PageError>;

/// One failure broadcast to every waiter of a compile cycle.
pub type SharedError = Arc<PageError>;

/// What callbacks receive once their cycle completes.
pub type SharedResult<T> = std::result::Result<T, SharedError>;
