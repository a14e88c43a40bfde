//! Cache Module
//!
//! Compile-on-demand cache of page modules with staleness checks and request
//! batching, plus a small whole-file cache for static pages.

mod clock;
mod module;
mod static_page;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use clock::{format_http_date, Clock};
pub use module::{
    classify, load_artifact, CompileAction, LoadOutcome, LoadStamp, ModuleCallback,
    ModuleEntry, ModuleState, PageCallback, Waiter,
};
pub use static_page::StaticEntry;
pub use stats::CacheStats;
pub use store::PageCache;
