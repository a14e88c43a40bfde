//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Page cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory pages are resolved against and compiled in
    pub root: PathBuf,
    /// Toolchain binary invoked once per compile
    pub compiler: String,
    /// Global flags passed before each page's own flags
    pub compiler_flags: Vec<String>,
    /// Minimum time between source stats for a loaded module, in milliseconds
    pub check_interval_ms: u64,
    /// Minimum time between stats for a cached static file, in milliseconds
    pub static_check_interval_ms: u64,
    /// Clock refresh tick of the background task, in milliseconds
    pub tick_interval_ms: u64,
    /// Static pages unused for this long are unloaded, in seconds
    pub static_idle_secs: u64,
    /// Compiler subprocess timeout in seconds, 0 disables it
    pub compile_timeout_secs: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `HOTPAGE_ROOT` - Working directory (default: `.`)
    /// - `HOTPAGE_CXX` - Toolchain binary (default: `g++`)
    /// - `HOTPAGE_CXXFLAGS` - Whitespace separated global flags (default: `-shared -fPIC -O2`)
    /// - `HOTPAGE_CHECK_INTERVAL_MS` - Module staleness check interval (default: 2000)
    /// - `HOTPAGE_STATIC_CHECK_INTERVAL_MS` - Static file check interval (default: 2000)
    /// - `HOTPAGE_TICK_INTERVAL_MS` - Clock refresh tick (default: 100)
    /// - `HOTPAGE_STATIC_IDLE_SECS` - Static page idle eviction (default: 300)
    /// - `HOTPAGE_COMPILE_TIMEOUT_SECS` - Compiler timeout, 0 = none (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: env::var("HOTPAGE_ROOT")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            compiler: env::var("HOTPAGE_CXX").unwrap_or(defaults.compiler),
            compiler_flags: env::var("HOTPAGE_CXXFLAGS")
                .ok()
                .map(|v| split_flags(&v))
                .unwrap_or(defaults.compiler_flags),
            check_interval_ms: parse_var("HOTPAGE_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.check_interval_ms),
            static_check_interval_ms: parse_var("HOTPAGE_STATIC_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.static_check_interval_ms),
            tick_interval_ms: parse_var("HOTPAGE_TICK_INTERVAL_MS")
                .unwrap_or(defaults.tick_interval_ms),
            static_idle_secs: parse_var("HOTPAGE_STATIC_IDLE_SECS")
                .unwrap_or(defaults.static_idle_secs),
            compile_timeout_secs: parse_var("HOTPAGE_COMPILE_TIMEOUT_SECS")
                .unwrap_or(defaults.compile_timeout_secs),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn static_check_interval(&self) -> Duration {
        Duration::from_millis(self.static_check_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn static_idle(&self) -> Duration {
        Duration::from_secs(self.static_idle_secs)
    }

    /// `None` when the compiler may run indefinitely.
    pub fn compile_timeout(&self) -> Option<Duration> {
        (self.compile_timeout_secs > 0).then(|| Duration::from_secs(self.compile_timeout_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            compiler: "g++".to_string(),
            compiler_flags: split_flags("-shared -fPIC -O2"),
            check_interval_ms: 2000,
            static_check_interval_ms: 2000,
            tick_interval_ms: 100,
            static_idle_secs: 300,
            compile_timeout_secs: 0,
        }
    }
}

fn parse_var(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_flags(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
