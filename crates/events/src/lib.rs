//! Workflow notifications.
//!
//! Committed transitions are published as [`WorkflowEvent`]s wrapped in an
//! [`EventEnvelope`] on an [`EventBus`]. Email/notification delivery lives
//! outside this workspace and consumes the bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod workflow_event;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use workflow_event::{EntityKind, WorkflowEvent};
