//! Distribution batches.
//!
//! A batch groups draft distributions created by warehouse staff. Approving
//! the batch dispatches every draft; rejecting it rejects every draft, frees
//! the reserved units and moves the rejected drafts out of the batch so they
//! can be archived as [`RejectedDistribution`](crate::RejectedDistribution)s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    Cascade, DomainError, DomainResult, Entity, Outcome, RoomId, Rule, Stamp, UnitId, UserId,
    WarehouseId, Workflow, WorkflowStatus, define_id,
};
use assetflow_inventory::{InstanceId, InstanceRegistry, ItemStatus, Location, RegistryError};

define_id!(BatchId, "BatchId");
define_id!(
    /// Distribution number inside its batch (1-based).
    DistributionId,
    "DistributionId"
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Field staff install the unit on site (networking gear).
    Installation,
    /// Plain hand-over.
    Delivery,
}

impl TaskType {
    fn dispatch_action(self) -> DistributionAction {
        match self {
            TaskType::Installation => DistributionAction::StartInstallation,
            TaskType::Delivery => DistributionAction::StartDelivery,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Draft,
    Installing,
    InTransit,
    Installed,
    Rejected,
}

impl core::fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DistributionStatus::Draft => "draft",
            DistributionStatus::Installing => "installing",
            DistributionStatus::InTransit => "in_transit",
            DistributionStatus::Installed => "installed",
            DistributionStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for DistributionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, DistributionStatus::Installed | DistributionStatus::Rejected)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionAction {
    StartInstallation,
    StartDelivery,
    Reject,
    Complete,
}

/// Field verification of a dispatched task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVerification {
    Pending,
    Submitted,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    id: DistributionId,
    instance: InstanceId,
    unit: UnitId,
    room: Option<RoomId>,
    address: String,
    task_type: TaskType,
    status: DistributionStatus,
    field_staff: Option<UserId>,

    dispatched: Option<Stamp>,
    rejected: Option<Stamp>,
    rejection_reason: Option<String>,

    verification: TaskVerification,
    verification_notes: Option<String>,
    submitted: Option<Stamp>,
    verified: Option<Stamp>,
    verification_rejection_reason: Option<String>,
}

impl Distribution {
    pub fn id(&self) -> DistributionId {
        self.id
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn field_staff(&self) -> Option<UserId> {
        self.field_staff
    }

    pub fn dispatched(&self) -> Option<Stamp> {
        self.dispatched
    }

    pub fn rejected(&self) -> Option<Stamp> {
        self.rejected
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn verification(&self) -> TaskVerification {
        self.verification
    }

    pub fn verification_notes(&self) -> Option<&str> {
        self.verification_notes.as_deref()
    }

    pub fn verified(&self) -> Option<Stamp> {
        self.verified
    }

    pub fn verification_rejection_reason(&self) -> Option<&str> {
        self.verification_rejection_reason.as_deref()
    }

    /// Draft becomes a live task: `installing` or `in_transit` by task type.
    fn dispatch(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        let to = match self.advance(self.task_type.dispatch_action()) {
            Ok(to) => to,
            Err(rejection) => return Ok(rejection.into()),
        };
        registry.set_status(
            self.instance,
            ItemStatus::Processing,
            stamp,
            format!("dispatched on distribution {}", self.id),
        )?;
        self.dispatched = Some(stamp);
        if self.field_staff.is_none() {
            self.field_staff = stamp.actor.user();
        }
        Ok(Outcome::applied(format!("distribution {} is {to}", self.id)))
    }

    /// Draft is dropped; its unit goes back to `available`.
    fn reject_draft(
        &mut self,
        stamp: Stamp,
        reason: Option<&str>,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.advance(DistributionAction::Reject) {
            return Ok(rejection.into());
        }
        registry.set_status(
            self.instance,
            ItemStatus::Available,
            stamp,
            format!("distribution {} rejected", self.id),
        )?;
        self.rejected = Some(stamp);
        self.rejection_reason = reason.map(str::to_string);
        Ok(Outcome::applied(format!("distribution {} rejected", self.id)))
    }

    /// Field staff report the task done.
    pub fn submit_verification(&mut self, notes: Option<String>, stamp: Stamp) -> Outcome {
        if !matches!(
            self.status,
            DistributionStatus::Installing | DistributionStatus::InTransit
        ) {
            return Outcome::rejected(format!(
                "only dispatched tasks can be submitted for verification (current status: {})",
                self.status
            ));
        }
        if self.verification == TaskVerification::Verified {
            return Outcome::rejected(format!("distribution {} is already verified", self.id));
        }
        self.verification = TaskVerification::Submitted;
        self.verification_notes = notes;
        self.submitted = Some(stamp);
        Outcome::applied(format!("distribution {} submitted for verification", self.id))
    }

    /// Warehouse accepts the field report: the unit is in use at its
    /// destination.
    pub fn verify_task(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if self.verification != TaskVerification::Submitted {
            return Ok(Outcome::rejected(format!(
                "distribution {} has not been submitted for verification",
                self.id
            )));
        }
        if let Err(rejection) = self.guard(DistributionAction::Complete) {
            return Ok(rejection.into());
        }

        let destination = Location::Unit {
            unit: self.unit,
            room: self.room,
        };
        registry.update(
            self.instance,
            stamp,
            format!("installed by distribution {}", self.id),
            |unit| {
                unit.set_status(ItemStatus::InUse);
                unit.relocate(destination);
            },
        )?;

        self.status = DistributionStatus::Installed;
        self.verification = TaskVerification::Verified;
        self.verified = Some(stamp);
        Ok(Outcome::applied(format!(
            "distribution {} verified; unit installed",
            self.id
        )))
    }

    pub fn reject_verification(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if self.verification != TaskVerification::Submitted {
            return Outcome::rejected(format!(
                "distribution {} has not been submitted for verification",
                self.id
            ));
        }
        self.verification = TaskVerification::Rejected;
        self.verified = Some(stamp);
        self.verification_rejection_reason = reason;
        Outcome::applied(format!("verification of distribution {} rejected", self.id))
    }
}

impl Workflow for Distribution {
    type Status = DistributionStatus;
    type Action = DistributionAction;

    const ACTIONS: &'static [DistributionAction] = &[
        DistributionAction::StartInstallation,
        DistributionAction::StartDelivery,
        DistributionAction::Reject,
        DistributionAction::Complete,
    ];

    fn status(&self) -> DistributionStatus {
        self.status
    }

    fn set_status(&mut self, status: DistributionStatus) {
        self.status = status;
    }

    fn rule(action: DistributionAction) -> Rule<DistributionStatus> {
        use DistributionStatus::*;
        match action {
            DistributionAction::StartInstallation => Rule {
                from: &[Draft],
                to: Installing,
                rejection: "only draft distributions can be dispatched",
            },
            DistributionAction::StartDelivery => Rule {
                from: &[Draft],
                to: InTransit,
                rejection: "only draft distributions can be dispatched",
            },
            DistributionAction::Reject => Rule {
                from: &[Draft],
                to: Rejected,
                rejection: "only draft distributions can be rejected",
            },
            DistributionAction::Complete => Rule {
                from: &[Installing, InTransit],
                to: Installed,
                rejection: "only dispatched distributions can be completed",
            },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Approved,
    Rejected,
    Distributed,
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Approved => "approved",
            BatchStatus::Rejected => "rejected",
            BatchStatus::Distributed => "distributed",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for BatchStatus {
    fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Rejected | BatchStatus::Distributed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Approve,
    Reject,
    MarkDistributed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDistribution {
    pub instance: InstanceId,
    pub room: Option<RoomId>,
    pub address: String,
    pub task_type: TaskType,
    pub field_staff: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub name: String,
    pub created_by: UserId,
    pub warehouse: WarehouseId,
    pub unit: UnitId,
    pub notes: String,
    pub items: Vec<NewDistribution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionBatch {
    id: BatchId,
    batch_code: String,
    name: String,
    created_by: UserId,
    created_at: DateTime<Utc>,
    warehouse: WarehouseId,
    unit: UnitId,
    notes: String,
    status: BatchStatus,
    distributions: Vec<Distribution>,

    approved: Option<Stamp>,
    rejected: Option<Stamp>,
    rejection_reason: Option<String>,
    distributed: Option<Stamp>,
}

impl DistributionBatch {
    /// Random batch code: first 8 hex digits of a v4 UUID, upper-cased.
    pub fn generate_code() -> String {
        let mut code = uuid::Uuid::new_v4().simple().to_string();
        code.truncate(8);
        code.to_uppercase()
    }

    /// Create a batch of drafts. Every unit must be available; it is reserved
    /// (`processing`) until the batch is decided.
    pub fn new(
        id: BatchId,
        batch_code: String,
        input: NewBatch,
        registry: &mut InstanceRegistry,
        stamp: Stamp,
    ) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::validation(
                "a distribution batch needs at least one item",
            ));
        }
        for (i, item) in input.items.iter().enumerate() {
            if input.items[..i].iter().any(|d| d.instance == item.instance) {
                return Err(DomainError::validation(format!(
                    "item instance {} listed twice",
                    item.instance
                )));
            }
            let unit = registry
                .get(item.instance)
                .ok_or_else(|| DomainError::not_found(format!("item instance {}", item.instance)))?;
            if unit.status() != ItemStatus::Available {
                return Err(DomainError::conflict(format!(
                    "unit {} is not available (status: {})",
                    unit.serial_unit(),
                    unit.status()
                )));
            }
        }

        let mut distributions = Vec::with_capacity(input.items.len());
        for (i, item) in input.items.into_iter().enumerate() {
            registry
                .set_status(
                    item.instance,
                    ItemStatus::Processing,
                    stamp,
                    format!("reserved for distribution batch {batch_code}"),
                )
                .map_err(|e| DomainError::not_found(e.to_string()))?;
            distributions.push(Distribution {
                id: DistributionId::new(i as u64 + 1),
                instance: item.instance,
                unit: input.unit,
                room: item.room,
                address: item.address,
                task_type: item.task_type,
                status: DistributionStatus::Draft,
                field_staff: item.field_staff,
                dispatched: None,
                rejected: None,
                rejection_reason: None,
                verification: TaskVerification::Pending,
                verification_notes: None,
                submitted: None,
                verified: None,
                verification_rejection_reason: None,
            });
        }

        Ok(Self {
            id,
            batch_code,
            name: input.name,
            created_by: input.created_by,
            created_at: stamp.at,
            warehouse: input.warehouse,
            unit: input.unit,
            notes: input.notes,
            status: BatchStatus::Pending,
            distributions,
            approved: None,
            rejected: None,
            rejection_reason: None,
            distributed: None,
        })
    }

    pub fn batch_code(&self) -> &str {
        &self.batch_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn warehouse(&self) -> WarehouseId {
        self.warehouse
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn distributions(&self) -> &[Distribution] {
        &self.distributions
    }

    pub fn distribution(&self, id: DistributionId) -> Option<&Distribution> {
        self.distributions.iter().find(|d| d.id == id)
    }

    pub fn distribution_mut(&mut self, id: DistributionId) -> Option<&mut Distribution> {
        self.distributions.iter_mut().find(|d| d.id == id)
    }

    pub fn approved(&self) -> Option<Stamp> {
        self.approved
    }

    pub fn rejected(&self) -> Option<Stamp> {
        self.rejected
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn distributed(&self) -> Option<Stamp> {
        self.distributed
    }

    /// Approve the batch and dispatch every draft.
    pub fn approve(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(BatchAction::Approve) {
            return Ok(rejection.into());
        }

        let mut failure = None;
        let report = self.cascade(BatchAction::Approve, |child, _| {
            child.dispatch(stamp, registry).unwrap_or_else(|e| {
                let outcome = Outcome::rejected(e.to_string());
                failure.get_or_insert(e);
                outcome
            })
        });
        if let Some(err) = failure {
            return Err(err);
        }

        self.status = BatchStatus::Approved;
        self.approved = Some(stamp);
        Ok(Outcome::applied(format!(
            "Batch {} approved: {} distributions dispatched, {} skipped",
            self.batch_code, report.applied, report.skipped
        )))
    }

    /// Reject the batch and every draft in it.
    ///
    /// Returns the rejected drafts, removed from the batch, for archiving.
    pub fn reject(
        &mut self,
        stamp: Stamp,
        reason: Option<String>,
        registry: &mut InstanceRegistry,
    ) -> Result<(Outcome, Vec<Distribution>), RegistryError> {
        if let Err(rejection) = self.guard(BatchAction::Reject) {
            return Ok((rejection.into(), Vec::new()));
        }

        let mut failure = None;
        let reason_ref = reason.as_deref();
        let report = self.cascade(BatchAction::Reject, |child, _| {
            child
                .reject_draft(stamp, reason_ref, registry)
                .unwrap_or_else(|e| {
                    let outcome = Outcome::rejected(e.to_string());
                    failure.get_or_insert(e);
                    outcome
                })
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let (removed, kept): (Vec<_>, Vec<_>) = core::mem::take(&mut self.distributions)
            .into_iter()
            .partition(|d| d.status == DistributionStatus::Rejected);
        self.distributions = kept;

        self.status = BatchStatus::Rejected;
        self.rejected = Some(stamp);
        self.rejection_reason = reason;
        Ok((
            Outcome::applied(format!(
                "Batch {} rejected: {} distributions rejected, {} skipped",
                self.batch_code, report.applied, report.skipped
            )),
            removed,
        ))
    }

    pub fn mark_distributed(&mut self, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(BatchAction::MarkDistributed) {
            return rejection.into();
        }
        self.distributed = Some(stamp);
        Outcome::applied(format!("Batch {} marked distributed", self.batch_code))
    }
}

impl Entity for DistributionBatch {
    type Id = BatchId;

    fn id(&self) -> BatchId {
        self.id
    }
}

impl Workflow for DistributionBatch {
    type Status = BatchStatus;
    type Action = BatchAction;

    const ACTIONS: &'static [BatchAction] = &[
        BatchAction::Approve,
        BatchAction::Reject,
        BatchAction::MarkDistributed,
    ];

    fn status(&self) -> BatchStatus {
        self.status
    }

    fn set_status(&mut self, status: BatchStatus) {
        self.status = status;
    }

    fn rule(action: BatchAction) -> Rule<BatchStatus> {
        use BatchStatus::*;
        match action {
            BatchAction::Approve => Rule {
                from: &[Pending],
                to: Approved,
                rejection: "this batch has already been processed",
            },
            BatchAction::Reject => Rule {
                from: &[Pending],
                to: Rejected,
                rejection: "this batch has already been processed",
            },
            BatchAction::MarkDistributed => Rule {
                from: &[Approved],
                to: Distributed,
                rejection: "only approved batches can be marked distributed",
            },
        }
    }
}

impl Cascade for DistributionBatch {
    type Child = Distribution;

    fn children_mut(&mut self) -> &mut [Distribution] {
        &mut self.distributions
    }

    fn child_action(action: BatchAction, child: &Distribution) -> Option<DistributionAction> {
        match action {
            BatchAction::Approve => Some(child.task_type.dispatch_action()),
            BatchAction::Reject => Some(DistributionAction::Reject),
            BatchAction::MarkDistributed => None,
        }
    }
}
