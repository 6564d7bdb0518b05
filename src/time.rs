//! Processing-time service contract and wall-clock binding.
//!
//! The writer never schedules work itself. It reads the current
//! processing time and registers the instant of its next bucket
//! inspection; the host promises to call
//! [`on_processing_time`] at or after that instant, on the same
//! cooperative thread that serves writes and checkpoints.
//!
//! [`on_processing_time`]: crate::writer::MultiTableSinkWriter::on_processing_time

use chrono::Utc;

/// Host-provided clock and timer registration.
pub trait ProcessingTimeService: Send {
    /// Current processing time in epoch milliseconds.
    fn current_processing_time(&self) -> i64;

    /// Register the next timer fire instant, replacing any previous one.
    fn register_timer(&mut self, timestamp: i64);

    /// The currently registered fire instant, if any.
    fn next_timer(&self) -> Option<i64>;
}

/// Wall-clock service for production hosts.
#[derive(Debug, Default)]
pub struct SystemTimeService {
    next: Option<i64>,
}

impl SystemTimeService {
    /// Create a service with no timer registered.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessingTimeService for SystemTimeService {
    fn current_processing_time(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn register_timer(&mut self, timestamp: i64) {
        self.next = Some(timestamp);
    }

    fn next_timer(&self) -> Option<i64> {
        self.next
    }
}
