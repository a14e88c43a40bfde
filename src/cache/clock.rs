//! Clock Snapshot Module
//!
//! One read of both clocks, shared by every lookup in a scheduling tick.

use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};

// == Clock ==
/// Wall-clock and monotonic time captured together.
///
/// Wall-clock time can jump and is only used for display and comparison with
/// file modification times; throttling uses the monotonic reading.
#[derive(Debug, Clone)]
pub struct Clock {
    wall: SystemTime,
    monotonic: Instant,
    http_date: String,
}

impl Clock {
    /// Reads both clocks now.
    pub fn now() -> Self {
        let wall = SystemTime::now();
        Self {
            wall,
            monotonic: Instant::now(),
            http_date: format_http_date(wall),
        }
    }

    pub fn wall(&self) -> SystemTime {
        self.wall
    }

    pub fn monotonic(&self) -> Instant {
        self.monotonic
    }

    /// RFC 1123 date of the snapshot, as used in HTTP `Date` headers.
    pub fn http_date(&self) -> &str {
        &self.http_date
    }
}

/// Formats `time` as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
