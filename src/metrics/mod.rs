//! Metrics emission for the icefall sink writer.

pub mod events;

/// Emit an internal metric event.
///
/// This macro calls the `InternalEvent::emit()` method on the given
/// event, which records the corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use icefall::metrics::events::RowsEmitted;
///
/// emit!(RowsEmitted { count: 3, target: "orders".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
