//! Asset loans: units borrow tracked units from a warehouse.
//!
//! `pending → approved → shipped → active → returned →
//! pending_return_verification → completed`, with `cancelled` reachable from
//! `pending` and `approved`. Returns are verified item by item; the loan
//! completes itself once every item is verified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    DomainError, DomainResult, Entity, Outcome, Rule, Stamp, UnitId, UserId, WarehouseId,
    Workflow, WorkflowStatus, define_id,
};
use assetflow_inventory::{InstanceId, InstanceRegistry, ItemStatus, Location, RegistryError};

define_id!(AssetLoanId, "AssetLoanId");
define_id!(
    /// Item number inside its loan (1-based).
    LoanItemId,
    "LoanItemId"
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetLoanStatus {
    Pending,
    Approved,
    Shipped,
    Active,
    Returned,
    PendingReturnVerification,
    Completed,
    Cancelled,
}

impl core::fmt::Display for AssetLoanStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AssetLoanStatus::Pending => "pending",
            AssetLoanStatus::Approved => "approved",
            AssetLoanStatus::Shipped => "shipped",
            AssetLoanStatus::Active => "active",
            AssetLoanStatus::Returned => "returned",
            AssetLoanStatus::PendingReturnVerification => "pending_return_verification",
            AssetLoanStatus::Completed => "completed",
            AssetLoanStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for AssetLoanStatus {
    fn is_terminal(self) -> bool {
        matches!(self, AssetLoanStatus::Completed | AssetLoanStatus::Cancelled)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetLoanAction {
    Approve,
    Reject,
    Ship,
    ReceiveByUnit,
    RequestReturn,
    ApproveReturn,
    Complete,
}

/// Where an item is in its way back.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnState {
    Borrowed,
    ReturnRequested,
    Returned,
}

/// Warehouse verification of one item's return proof.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Submitted,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanItem {
    pub id: LoanItemId,
    pub instance: InstanceId,
    pub return_state: ReturnState,
    pub verification: VerificationState,
    /// Reference to the uploaded return proof (photo path, document id, ...).
    pub proof: Option<String>,
    pub proof_submitted: Option<Stamp>,
    pub verified: Option<Stamp>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssetLoan {
    pub unit: UnitId,
    pub warehouse: WarehouseId,
    pub requester: UserId,
    pub instances: Vec<InstanceId>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLoan {
    id: AssetLoanId,
    unit: UnitId,
    warehouse: WarehouseId,
    requester: UserId,
    requested_at: DateTime<Utc>,
    notes: String,
    status: AssetLoanStatus,
    items: Vec<LoanItem>,

    approved: Option<Stamp>,
    cancelled: Option<Stamp>,
    shipped: Option<Stamp>,
    received: Option<Stamp>,
    return_requested: Option<Stamp>,
    return_approved: Option<Stamp>,
    completed: Option<Stamp>,
    reason: Option<String>,
}

impl AssetLoan {
    /// Every requested unit must exist and currently be available.
    pub fn new(
        id: AssetLoanId,
        input: NewAssetLoan,
        registry: &InstanceRegistry,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.instances.is_empty() {
            return Err(DomainError::validation("an asset loan needs at least one item"));
        }

        let mut items = Vec::with_capacity(input.instances.len());
        for (i, instance) in input.instances.iter().enumerate() {
            if input.instances[..i].contains(instance) {
                return Err(DomainError::validation(format!(
                    "item instance {instance} listed twice"
                )));
            }
            let unit = registry
                .get(*instance)
                .ok_or_else(|| DomainError::not_found(format!("item instance {instance}")))?;
            if unit.status() != ItemStatus::Available {
                return Err(DomainError::conflict(format!(
                    "item instance {instance} is not available (status: {})",
                    unit.status()
                )));
            }
            items.push(LoanItem {
                id: LoanItemId::new(i as u64 + 1),
                instance: *instance,
                return_state: ReturnState::Borrowed,
                verification: VerificationState::Pending,
                proof: None,
                proof_submitted: None,
                verified: None,
                rejection_reason: None,
            });
        }

        Ok(Self {
            id,
            unit: input.unit,
            warehouse: input.warehouse,
            requester: input.requester,
            requested_at: at,
            notes: input.notes,
            status: AssetLoanStatus::Pending,
            items,
            approved: None,
            cancelled: None,
            shipped: None,
            received: None,
            return_requested: None,
            return_approved: None,
            completed: None,
            reason: None,
        })
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn warehouse(&self) -> WarehouseId {
        self.warehouse
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn items(&self) -> &[LoanItem] {
        &self.items
    }

    pub fn item(&self, id: LoanItemId) -> Option<&LoanItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn approved(&self) -> Option<Stamp> {
        self.approved
    }

    pub fn cancelled(&self) -> Option<Stamp> {
        self.cancelled
    }

    pub fn shipped(&self) -> Option<Stamp> {
        self.shipped
    }

    pub fn received(&self) -> Option<Stamp> {
        self.received
    }

    pub fn return_requested(&self) -> Option<Stamp> {
        self.return_requested
    }

    pub fn return_approved(&self) -> Option<Stamp> {
        self.return_approved
    }

    pub fn completed(&self) -> Option<Stamp> {
        self.completed
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_fully_returned(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.return_state == ReturnState::Returned)
    }

    pub fn approve(&mut self, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(AssetLoanAction::Approve) {
            return rejection.into();
        }
        self.approved = Some(stamp);
        Outcome::applied(format!("Asset loan #{} approved", self.id))
    }

    pub fn reject(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(AssetLoanAction::Reject) {
            return rejection.into();
        }
        self.cancelled = Some(stamp);
        self.reason = reason;
        Outcome::applied(format!("Asset loan #{} rejected", self.id))
    }

    /// Units leave the warehouse and become `processing`.
    pub fn ship(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(AssetLoanAction::Ship) {
            return Ok(rejection.into());
        }
        for item in &self.items {
            let unit = registry
                .get(item.instance)
                .ok_or(RegistryError::UnknownInstance(item.instance))?;
            if unit.status() != ItemStatus::Available {
                return Ok(Outcome::rejected(format!(
                    "unit {} is no longer available (status: {})",
                    unit.serial_unit(),
                    unit.status()
                )));
            }
        }

        for item in &self.items {
            registry.set_status(
                item.instance,
                ItemStatus::Processing,
                stamp,
                format!("shipped for asset loan #{}", self.id),
            )?;
        }
        self.set_status(AssetLoanAction::Ship.target());
        self.shipped = Some(stamp);
        Ok(Outcome::applied(format!(
            "Asset loan #{}: {} units shipped to unit {}",
            self.id,
            self.items.len(),
            self.unit
        )))
    }

    /// The borrowing unit confirms receipt; units are now in use there.
    pub fn receive_by_unit(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(AssetLoanAction::ReceiveByUnit) {
            return Ok(rejection.into());
        }
        for item in &self.items {
            let borrower = self.unit;
            registry.update(
                item.instance,
                stamp,
                format!("received by unit {borrower} on asset loan #{}", self.id),
                |unit| {
                    unit.set_status(ItemStatus::InUse);
                    unit.relocate(Location::Unit {
                        unit: borrower,
                        room: None,
                    });
                },
            )?;
        }
        self.set_status(AssetLoanAction::ReceiveByUnit.target());
        self.received = Some(stamp);
        Ok(Outcome::applied(format!(
            "Asset loan #{} received by unit {}; loan is active",
            self.id, self.unit
        )))
    }

    pub fn request_return(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(AssetLoanAction::RequestReturn) {
            return rejection.into();
        }
        for item in &mut self.items {
            item.return_state = ReturnState::ReturnRequested;
        }
        self.return_requested = Some(stamp);
        if reason.is_some() {
            self.reason = reason;
        }
        Outcome::applied(format!("Return requested for asset loan #{}", self.id))
    }

    pub fn approve_return(&mut self, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(AssetLoanAction::ApproveReturn) {
            return rejection.into();
        }
        self.return_approved = Some(stamp);
        Outcome::applied(format!(
            "Return of asset loan #{} approved; awaiting per-item verification",
            self.id
        ))
    }

    /// Attach a return proof to one item. A rejected proof may be resubmitted.
    pub fn submit_return_proof(
        &mut self,
        item: LoanItemId,
        proof: impl Into<String>,
        stamp: Stamp,
    ) -> Outcome {
        if !matches!(
            self.status,
            AssetLoanStatus::Returned | AssetLoanStatus::PendingReturnVerification
        ) {
            return Outcome::rejected(format!(
                "return proof can only be submitted after a return was requested (current status: {})",
                self.status
            ));
        }
        let proof = proof.into();
        if proof.trim().is_empty() {
            return Outcome::rejected("a return proof is required");
        }
        let loan = self.id;
        let Some(entry) = self.items.iter_mut().find(|i| i.id == item) else {
            return Outcome::rejected(format!("item {item} not found on asset loan #{loan}"));
        };
        match entry.verification {
            VerificationState::Pending | VerificationState::Rejected => {}
            other => {
                return Outcome::rejected(format!(
                    "item {item} return proof is already {}",
                    verification_label(other)
                ));
            }
        }

        entry.return_state = ReturnState::ReturnRequested;
        entry.verification = VerificationState::Submitted;
        entry.proof = Some(proof);
        entry.proof_submitted = Some(stamp);
        entry.rejection_reason = None;
        Outcome::applied(format!("Return proof submitted for item {item}"))
    }

    /// Warehouse verdict on one item's return. Approving makes the unit
    /// available in the loan's warehouse again; when every item is verified
    /// the loan completes.
    pub fn verify_return_item(
        &mut self,
        item: LoanItemId,
        approve: bool,
        reason: Option<String>,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if self.status != AssetLoanStatus::PendingReturnVerification {
            return Ok(Outcome::rejected(format!(
                "returns can only be verified after the return was approved (current status: {})",
                self.status
            )));
        }
        let loan = self.id;
        let warehouse = self.warehouse;
        let Some(entry) = self.items.iter_mut().find(|i| i.id == item) else {
            return Ok(Outcome::rejected(format!(
                "item {item} not found on asset loan #{loan}"
            )));
        };
        match entry.verification {
            VerificationState::Submitted => {}
            VerificationState::Verified => {
                return Ok(Outcome::rejected(format!("item {item} is already verified")));
            }
            _ => {
                return Ok(Outcome::rejected(format!(
                    "item {item} has no return proof awaiting verification"
                )));
            }
        }

        entry.verified = Some(stamp);
        if !approve {
            entry.verification = VerificationState::Rejected;
            entry.rejection_reason = reason;
            return Ok(Outcome::applied(format!("Return of item {item} rejected")));
        }

        registry.update(
            entry.instance,
            stamp,
            format!("returned from asset loan #{loan}"),
            |unit| {
                unit.set_status(ItemStatus::Available);
                unit.relocate(Location::Warehouse { warehouse });
            },
        )?;
        entry.verification = VerificationState::Verified;
        entry.return_state = ReturnState::Returned;

        if self.is_fully_returned() {
            self.set_status(AssetLoanAction::Complete.target());
            self.completed = Some(stamp);
            return Ok(Outcome::applied(format!(
                "Return of item {item} verified; all items returned, asset loan #{loan} completed"
            )));
        }
        Ok(Outcome::applied(format!("Return of item {item} verified")))
    }
}

impl AssetLoanAction {
    fn target(self) -> AssetLoanStatus {
        AssetLoan::rule(self).to
    }
}

fn verification_label(state: VerificationState) -> &'static str {
    match state {
        VerificationState::Pending => "pending",
        VerificationState::Submitted => "submitted",
        VerificationState::Verified => "verified",
        VerificationState::Rejected => "rejected",
    }
}

impl Entity for AssetLoan {
    type Id = AssetLoanId;

    fn id(&self) -> AssetLoanId {
        self.id
    }
}

impl Workflow for AssetLoan {
    type Status = AssetLoanStatus;
    type Action = AssetLoanAction;

    const ACTIONS: &'static [AssetLoanAction] = &[
        AssetLoanAction::Approve,
        AssetLoanAction::Reject,
        AssetLoanAction::Ship,
        AssetLoanAction::ReceiveByUnit,
        AssetLoanAction::RequestReturn,
        AssetLoanAction::ApproveReturn,
        AssetLoanAction::Complete,
    ];

    fn status(&self) -> AssetLoanStatus {
        self.status
    }

    fn set_status(&mut self, status: AssetLoanStatus) {
        self.status = status;
    }

    fn rule(action: AssetLoanAction) -> Rule<AssetLoanStatus> {
        use AssetLoanStatus::*;
        match action {
            AssetLoanAction::Approve => Rule {
                from: &[Pending],
                to: Approved,
                rejection: "only pending loan requests can be approved",
            },
            AssetLoanAction::Reject => Rule {
                from: &[Pending, Approved],
                to: Cancelled,
                rejection: "loan requests already being processed cannot be rejected",
            },
            AssetLoanAction::Ship => Rule {
                from: &[Approved],
                to: Shipped,
                rejection: "only approved loans can be shipped",
            },
            AssetLoanAction::ReceiveByUnit => Rule {
                from: &[Shipped],
                to: Active,
                rejection: "only shipped loans can be received",
            },
            AssetLoanAction::RequestReturn => Rule {
                from: &[Active],
                to: Returned,
                rejection: "only active loans can be returned",
            },
            AssetLoanAction::ApproveReturn => Rule {
                from: &[Returned],
                to: PendingReturnVerification,
                rejection: "there is no return request to approve",
            },
            AssetLoanAction::Complete => Rule {
                from: &[PendingReturnVerification],
                to: Completed,
                rejection: "only loans awaiting return verification can be completed",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::ensure_acyclic;
    use assetflow_inventory::NewInstance;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap()
    }

    fn stamp() -> Stamp {
        Stamp::new(UserId::new(), test_time())
    }

    fn registry_with(n: usize) -> (InstanceRegistry, Vec<InstanceId>) {
        let mut registry = InstanceRegistry::new();
        let ids = registry
            .register_batch(
                (0..n)
                    .map(|i| NewInstance {
                        serial_number: None,
                        serial_unit: format!("SU-{i}"),
                        catalog_item: None,
                    })
                    .collect(),
                stamp(),
                "received",
            )
            .unwrap();
        (registry, ids)
    }

    fn loan(registry: &InstanceRegistry, ids: &[InstanceId]) -> AssetLoan {
        AssetLoan::new(
            AssetLoanId::new(1),
            NewAssetLoan {
                unit: UnitId::new(4),
                warehouse: WarehouseId::new(2),
                requester: UserId::new(),
                instances: ids.to_vec(),
                notes: String::new(),
            },
            registry,
            test_time(),
        )
        .unwrap()
    }

    fn active_loan(registry: &mut InstanceRegistry, ids: &[InstanceId]) -> AssetLoan {
        let mut loan = loan(registry, ids);
        assert!(loan.approve(stamp()).is_applied());
        assert!(loan.ship(stamp(), registry).unwrap().is_applied());
        assert!(loan.receive_by_unit(stamp(), registry).unwrap().is_applied());
        loan
    }

    #[test]
    fn transition_table_is_a_dag() {
        assert!(ensure_acyclic::<AssetLoan>().is_ok());
    }

    #[test]
    fn creation_requires_available_units() {
        let (mut registry, ids) = registry_with(2);
        registry.set_status(ids[1], ItemStatus::Maintenance, stamp(), "repair").unwrap();

        let err = AssetLoan::new(
            AssetLoanId::new(1),
            NewAssetLoan {
                unit: UnitId::new(4),
                warehouse: WarehouseId::new(2),
                requester: UserId::new(),
                instances: ids.clone(),
                notes: String::new(),
            },
            &registry,
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn shipping_and_receiving_toggle_unit_status() {
        let (mut registry, ids) = registry_with(2);
        let mut loan = loan(&registry, &ids);

        // Not yet approved.
        assert!(loan.ship(stamp(), &mut registry).unwrap().is_rejected());
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::Available);

        let _ = loan.approve(stamp());
        let _ = loan.ship(stamp(), &mut registry).unwrap();
        assert_eq!(loan.status(), AssetLoanStatus::Shipped);
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::Processing);

        let _ = loan.receive_by_unit(stamp(), &mut registry).unwrap();
        assert_eq!(loan.status(), AssetLoanStatus::Active);
        let unit = registry.get(ids[1]).unwrap();
        assert_eq!(unit.status(), ItemStatus::InUse);
        assert_eq!(
            unit.location(),
            Some(Location::Unit {
                unit: UnitId::new(4),
                room: None
            })
        );
    }

    #[test]
    fn reject_is_allowed_until_shipped() {
        let (mut registry, ids) = registry_with(1);
        let mut loan = loan(&registry, &ids);
        let _ = loan.approve(stamp());
        assert!(loan.reject(stamp(), Some("no stock".into())).is_applied());
        assert_eq!(loan.status(), AssetLoanStatus::Cancelled);

        let mut shipped = self::loan(&registry, &ids);
        let _ = shipped.approve(stamp());
        let _ = shipped.ship(stamp(), &mut registry).unwrap();
        assert!(shipped.reject(stamp(), None).is_rejected());
    }

    #[test]
    fn verifying_every_item_completes_the_loan() {
        let (mut registry, ids) = registry_with(2);
        let mut loan = active_loan(&mut registry, &ids);

        assert!(loan.request_return(stamp(), None).is_applied());
        assert!(loan.submit_return_proof(LoanItemId::new(1), "photo-1.jpg", stamp()).is_applied());
        assert!(loan.approve_return(stamp()).is_applied());
        assert!(loan.submit_return_proof(LoanItemId::new(2), "photo-2.jpg", stamp()).is_applied());

        let first = loan
            .verify_return_item(LoanItemId::new(1), true, None, stamp(), &mut registry)
            .unwrap();
        assert!(first.is_applied());
        assert_eq!(loan.status(), AssetLoanStatus::PendingReturnVerification);
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::Available);

        let last = loan
            .verify_return_item(LoanItemId::new(2), true, None, stamp(), &mut registry)
            .unwrap();
        assert!(last.message().contains("completed"));
        assert_eq!(loan.status(), AssetLoanStatus::Completed);
        assert!(loan.completed().is_some());
        assert_eq!(
            registry.get(ids[1]).unwrap().location(),
            Some(Location::Warehouse {
                warehouse: WarehouseId::new(2)
            })
        );
    }

    #[test]
    fn rejected_proof_can_be_resubmitted() {
        let (mut registry, ids) = registry_with(1);
        let mut loan = active_loan(&mut registry, &ids);
        let _ = loan.request_return(stamp(), None);
        let _ = loan.approve_return(stamp());
        let item = LoanItemId::new(1);

        assert!(
            loan.verify_return_item(item, true, None, stamp(), &mut registry)
                .unwrap()
                .is_rejected(),
            "nothing submitted yet"
        );

        let _ = loan.submit_return_proof(item, "blurry.jpg", stamp());
        let _ = loan
            .verify_return_item(item, false, Some("photo unreadable".into()), stamp(), &mut registry)
            .unwrap();
        assert_eq!(loan.item(item).unwrap().verification, VerificationState::Rejected);
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::InUse);

        assert!(loan.submit_return_proof(item, "clear.jpg", stamp()).is_applied());
        let _ = loan.verify_return_item(item, true, None, stamp(), &mut registry).unwrap();
        assert_eq!(loan.status(), AssetLoanStatus::Completed);

        assert!(
            loan.verify_return_item(item, true, None, stamp(), &mut registry)
                .unwrap()
                .is_rejected()
        );
    }
}
