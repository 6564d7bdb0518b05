//! Bucketing context passed to bucket-id computation.

/// Reusable scratch value carrying the current record's event timestamp,
/// watermark, and processing time.
///
/// Updated once per record before extraction and consumed by shared
/// reference during bucket-id computation. Never persisted and never
/// retained beyond the assigning call.
#[derive(Debug)]
pub struct BucketContext {
    element_timestamp: Option<i64>,
    current_watermark: i64,
    current_processing_time: i64,
}

impl BucketContext {
    /// Create a context with sentinel initial values.
    pub fn new() -> Self {
        Self {
            element_timestamp: None,
            current_watermark: i64::MIN,
            current_processing_time: i64::MIN,
        }
    }

    /// Refresh the context for the next record.
    pub fn update(
        &mut self,
        element_timestamp: Option<i64>,
        watermark: i64,
        processing_time: i64,
    ) {
        self.element_timestamp = element_timestamp;
        self.current_watermark = watermark;
        self.current_processing_time = processing_time;
    }

    /// Event timestamp of the current record, if it has one.
    pub fn timestamp(&self) -> Option<i64> {
        self.element_timestamp
    }

    /// Current watermark in epoch milliseconds.
    pub fn current_watermark(&self) -> i64 {
        self.current_watermark
    }

    /// Current processing time in epoch milliseconds.
    pub fn current_processing_time(&self) -> i64 {
        self.current_processing_time
    }
}

impl Default for BucketContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_initial_sentinels() {
        let ctx = BucketContext::new();
        assert!(ctx.timestamp().is_none());
        assert_eq!(ctx.current_watermark(), i64::MIN);
        assert_eq!(ctx.current_processing_time(), i64::MIN);
    }

    #[test]
    fn test_context_update_overwrites_previous_record() {
        let mut ctx = BucketContext::new();
        ctx.update(Some(1_000), 900, 2_000);
        assert_eq!(ctx.timestamp(), Some(1_000));
        assert_eq!(ctx.current_watermark(), 900);
        assert_eq!(ctx.current_processing_time(), 2_000);

        ctx.update(None, 950, 2_100);
        assert!(ctx.timestamp().is_none());
        assert_eq!(ctx.current_watermark(), 950);
        assert_eq!(ctx.current_processing_time(), 2_100);
    }
}
