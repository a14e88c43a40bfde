//! Hotpage - on-demand compile-and-load cache for native page modules
//!
//! Compiles a page source the first time it is requested, recompiles it only
//! when the source changes, and swaps the loaded module while serving.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod native;
pub mod path;
pub mod tasks;

pub use cache::PageCache;
pub use config::Config;
pub use error::{PageError, SharedError};
pub use tasks::spawn_clock_task;
