//! `assetflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, the clock abstraction and the guarded
//! state-machine contract shared by every workflow entity.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{RoomId, UnitId, UserId, WarehouseId};
pub use workflow::{
    Actor, Cascade, CascadeReport, Outcome, Rejection, Rule, Stamp, Workflow, WorkflowStatus,
    ensure_acyclic,
};
