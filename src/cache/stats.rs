//! Cache Statistics Module
//!
//! Tracks how requests were served: straight from a loaded module, after a
//! compile, after a reload, or with a failure.

use serde::Serialize;

// == Cache Stats ==
/// Counters describing cache behaviour since startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Requests answered from an already loaded module
    pub hits: u64,
    /// Requests that joined an in-flight cycle instead of starting one
    pub queued: u64,
    /// Compile cycles started
    pub compiles: u64,
    /// Cycles that reopened an existing artifact without compiling
    pub reloads: u64,
    /// Cycles or checks that ended in an error
    pub failures: u64,
    /// Static page requests served from memory
    pub static_hits: u64,
    /// Static page reads from disk
    pub static_loads: u64,
    /// Static pages unloaded for being idle
    pub static_evictions: u64,
    /// Module entries in the registry
    pub modules: usize,
    /// Static entries in the registry
    pub static_pages: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Share of module requests that needed no compile or reload work.
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.queued + self.compiles + self.reloads;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_queued(&mut self) {
        self.queued += 1;
    }

    pub fn record_compile(&mut self) {
        self.compiles += 1;
    }

    pub fn record_reload(&mut self) {
        self.reloads += 1;
    }

    /// Moves a started reload over to the compile count when it had to compile after all.
    pub fn record_reload_fallback(&mut self) {
        self.reloads = self.reloads.saturating_sub(1);
        self.compiles += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_static_hit(&mut self) {
        self.static_hits += 1;
    }

    pub fn record_static_load(&mut self) {
        self.static_loads += 1;
    }

    pub fn record_static_evictions(&mut self, count: usize) {
        self.static_evictions += count as u64;
    }

    // == Update Entry Counts ==
    pub fn set_entry_counts(&mut self, modules: usize, static_pages: usize) {
        self.modules = modules;
        self.static_pages = static_pages;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.compiles, 0);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.modules, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_compile();
        stats.record_hit();
        stats.record_hit();
        stats.record_queued();
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_reload_fallback_counts_as_compile() {
        let mut stats = CacheStats::new();
        stats.record_reload();
        stats.record_reload_fallback();
        assert_eq!(stats.reloads, 0);
        assert_eq!(stats.compiles, 1);
    }

    #[test]
    fn test_static_counters() {
        let mut stats = CacheStats::new();
        stats.record_static_load();
        stats.record_static_hit();
        stats.record_static_evictions(3);
        assert_eq!(stats.static_loads, 1);
        assert_eq!(stats.static_hits, 1);
        assert_eq!(stats.static_evictions, 3);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = CacheStats::new();
        stats.record_failure();
        stats.set_entry_counts(2, 1);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["failures"], 1);
        assert_eq!(json["modules"], 2);
        assert_eq!(json["static_pages"], 1);
    }
}
