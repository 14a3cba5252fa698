//! Logging and debugging facilities for Vantage.
//!
//! Vantage uses the `tracing` crate for instrumentation. To see logs, install
//! a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! The engine never reaches for an ambient global logger; everything goes
//! through `tracing` targets that can be filtered per subsystem.

use std::time::Instant;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core plumbing target.
    pub const CORE: &str = "vantage_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "vantage_core::signal";
    /// Projection view target.
    pub const VIEW: &str = "vantage::view";
    /// Strategy pipeline target.
    pub const PIPELINE: &str = "vantage::pipeline";
    /// Filter engine target.
    pub const FILTER: &str = "vantage::filter";
    /// Update session target.
    pub const SESSION: &str = "vantage::session";
}

/// A scoped timing span that logs its elapsed time when dropped.
///
/// Useful for ad-hoc profiling of projection rebuilds without wiring a full
/// tracing subscriber layer.
///
/// # Example
///
/// ```
/// use vantage_core::PerfSpan;
///
/// {
///     let _span = PerfSpan::new("rebuild");
///     // ... expensive work ...
/// } // logs "rebuild took ..." at debug level
/// ```
pub struct PerfSpan {
    name: &'static str,
    started: Instant,
}

impl PerfSpan {
    /// Start a new timing span with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }

    /// Elapsed time since the span was started, in microseconds.
    pub fn elapsed_micros(&self) -> u128 {
        self.started.elapsed().as_micros()
    }
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        tracing::debug!(
            target: "vantage_core",
            name = self.name,
            elapsed_us = self.elapsed_micros() as u64,
            "perf span finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span_elapsed() {
        let span = PerfSpan::new("test");
        assert!(span.elapsed_micros() < 1_000_000);
    }
}
