//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache serves.
//!
//! # Tasks
//! - Tick: refreshes the cache clock and unloads idle static pages

mod tick;

pub use tick::spawn_clock_task;
