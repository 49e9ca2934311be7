//! Asset requests: an organisational unit asks the warehouse for assets.
//!
//! `pending → verified → completed`, with `rejected` branching from
//! `pending`. A request is completed by the distribution batch that
//! fulfilled it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    DomainError, DomainResult, Entity, Outcome, RoomId, Rule, Stamp, UnitId, UserId, Workflow,
    WorkflowStatus, define_id,
};
use assetflow_inventory::CatalogItemId;

use crate::batch::BatchId;

define_id!(AssetRequestId, "AssetRequestId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRequestStatus {
    Pending,
    Verified,
    Rejected,
    Completed,
}

impl core::fmt::Display for AssetRequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AssetRequestStatus::Pending => "pending",
            AssetRequestStatus::Verified => "verified",
            AssetRequestStatus::Rejected => "rejected",
            AssetRequestStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for AssetRequestStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            AssetRequestStatus::Rejected | AssetRequestStatus::Completed
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRequestAction {
    Verify,
    Reject,
    Complete,
}

/// One requested item type and where it should end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAsset {
    pub item: CatalogItemId,
    pub quantity: u64,
    pub room: Option<RoomId>,
    pub room_notes: Option<String>,
}

impl RequestedAsset {
    /// Room if known, otherwise the free-text notes.
    pub fn target_location(&self) -> String {
        match (&self.room, &self.room_notes) {
            (Some(room), _) => format!("room {room}"),
            (None, Some(notes)) => notes.clone(),
            (None, None) => "not specified".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssetRequest {
    pub unit: UnitId,
    pub requested_by: UserId,
    pub notes: Option<String>,
    pub items: Vec<RequestedAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequest {
    id: AssetRequestId,
    unit: UnitId,
    requested_by: UserId,
    requested_at: DateTime<Utc>,
    notes: Option<String>,
    items: Vec<RequestedAsset>,
    status: AssetRequestStatus,
    verified: Option<Stamp>,
    verification_notes: Option<String>,
    fulfilled_by: Option<BatchId>,
    received: Option<Stamp>,
}

impl AssetRequest {
    pub fn new(id: AssetRequestId, input: NewAssetRequest, at: DateTime<Utc>) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::validation("an asset request needs at least one item"));
        }
        if let Some(item) = input.items.iter().find(|i| i.quantity == 0) {
            return Err(DomainError::validation(format!(
                "requested quantity for item {} must be positive",
                item.item
            )));
        }
        Ok(Self {
            id,
            unit: input.unit,
            requested_by: input.requested_by,
            requested_at: at,
            notes: input.notes,
            items: input.items,
            status: AssetRequestStatus::Pending,
            verified: None,
            verification_notes: None,
            fulfilled_by: None,
            received: None,
        })
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[RequestedAsset] {
        &self.items
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Verification or rejection stamp.
    pub fn verified(&self) -> Option<Stamp> {
        self.verified
    }

    pub fn verification_notes(&self) -> Option<&str> {
        self.verification_notes.as_deref()
    }

    pub fn fulfilled_by(&self) -> Option<BatchId> {
        self.fulfilled_by
    }

    pub fn received(&self) -> Option<Stamp> {
        self.received
    }

    pub fn verify(&mut self, stamp: Stamp, notes: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(AssetRequestAction::Verify) {
            return rejection.into();
        }
        self.verified = Some(stamp);
        if notes.is_some() {
            self.verification_notes = notes;
        }
        Outcome::applied(format!("Asset request #{} verified", self.id))
    }

    pub fn reject(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(AssetRequestAction::Reject) {
            return rejection.into();
        }
        self.verified = Some(stamp);
        self.verification_notes = reason;
        Outcome::applied(format!("Asset request #{} rejected", self.id))
    }

    /// Close the request once `batch` delivered the assets.
    pub fn complete(&mut self, batch: BatchId, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(AssetRequestAction::Complete) {
            return rejection.into();
        }
        self.fulfilled_by = Some(batch);
        self.received = Some(stamp);
        Outcome::applied(format!(
            "Asset request #{} completed by distribution batch #{batch}",
            self.id
        ))
    }
}

impl Entity for AssetRequest {
    type Id = AssetRequestId;

    fn id(&self) -> AssetRequestId {
        self.id
    }
}

impl Workflow for AssetRequest {
    type Status = AssetRequestStatus;
    type Action = AssetRequestAction;

    const ACTIONS: &'static [AssetRequestAction] = &[
        AssetRequestAction::Verify,
        AssetRequestAction::Reject,
        AssetRequestAction::Complete,
    ];

    fn status(&self) -> AssetRequestStatus {
        self.status
    }

    fn set_status(&mut self, status: AssetRequestStatus) {
        self.status = status;
    }

    fn rule(action: AssetRequestAction) -> Rule<AssetRequestStatus> {
        match action {
            AssetRequestAction::Verify => Rule {
                from: &[AssetRequestStatus::Pending],
                to: AssetRequestStatus::Verified,
                rejection: "only pending asset requests can be verified",
            },
            AssetRequestAction::Reject => Rule {
                from: &[AssetRequestStatus::Pending],
                to: AssetRequestStatus::Rejected,
                rejection: "only pending asset requests can be rejected",
            },
            AssetRequestAction::Complete => Rule {
                from: &[AssetRequestStatus::Verified],
                to: AssetRequestStatus::Completed,
                rejection: "only verified asset requests can be completed",
            },
        }
    }
}
