use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{Actor, Stamp};

use crate::event::Event;

/// Kind of workflow entity a notification is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ProcurementRequest,
    AssetLoan,
    VenueLoan,
    DistributionBatch,
    Distribution,
    ReturnBatch,
    AssetRequest,
    Stock,
}

impl EntityKind {
    /// Dotted prefix used in event type names.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::ProcurementRequest => "procurement.request",
            EntityKind::AssetLoan => "loans.asset_loan",
            EntityKind::VenueLoan => "loans.venue_loan",
            EntityKind::DistributionBatch => "distribution.batch",
            EntityKind::Distribution => "distribution.task",
            EntityKind::ReturnBatch => "returns.batch",
            EntityKind::AssetRequest => "distribution.asset_request",
            EntityKind::Stock => "inventory.stock",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An applied, committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    event_type: String,
    kind: EntityKind,
    entity_id: u64,
    /// Status after the transition.
    status: String,
    actor: Actor,
    occurred_at: DateTime<Utc>,
    /// The user-facing message of the applied outcome.
    message: String,
}

impl WorkflowEvent {
    /// `action` is the past-tense verb, e.g. `approved` or `completed`.
    pub fn new(
        kind: EntityKind,
        entity_id: u64,
        action: &str,
        status: impl core::fmt::Display,
        stamp: Stamp,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: format!("{}.{action}", kind.as_str()),
            kind,
            entity_id,
            status: status.to_string(),
            actor: stamp.actor,
            occurred_at: stamp.at,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn entity_id(&self) -> u64 {
        self.entity_id
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
