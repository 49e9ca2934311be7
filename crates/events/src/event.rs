use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are facts about committed transitions: immutable and versioned.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "procurement.request.completed").
    fn event_type(&self) -> &str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the transition happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
