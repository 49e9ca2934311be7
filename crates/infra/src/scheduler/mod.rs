//! Time-triggered transitions.
//!
//! The scheduler is just another actor: it drives the same guarded
//! transitions a user would, stamped as [`assetflow_core::Actor::Scheduler`].

pub mod venue_loans;

pub use venue_loans::{SchedulerHandle, SchedulerStats, TickReport, VenueLoanScheduler};
