use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    DomainError, DomainResult, Entity, Outcome, Rule, Stamp, UserId, WarehouseId, Workflow,
    WorkflowStatus, define_id,
};
use assetflow_inventory::CatalogItemId;

use crate::line_item::{LineItem, LineItemId, NewLine};

define_id!(
    /// Procurement request identifier.
    RequestId,
    "RequestId"
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcurementStatus {
    Pending,
    Approved,
    Received,
    Completed,
    Rejected,
    Cancelled,
}

impl core::fmt::Display for ProcurementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ProcurementStatus::Pending => "pending",
            ProcurementStatus::Approved => "approved",
            ProcurementStatus::Received => "received",
            ProcurementStatus::Completed => "completed",
            ProcurementStatus::Rejected => "rejected",
            ProcurementStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for ProcurementStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcurementStatus::Completed | ProcurementStatus::Rejected | ProcurementStatus::Cancelled
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcurementAction {
    Approve,
    Reject,
    Receive,
    Complete,
    Cancel,
}

/// Input for [`ProcurementRequest::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub requester: UserId,
    pub warehouse: Option<WarehouseId>,
    pub notes: String,
    pub lines: Vec<NewLine>,
}

/// Procurement request header with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    id: RequestId,
    status: ProcurementStatus,
    requester: UserId,
    requested_at: DateTime<Utc>,
    /// Target warehouse; fixed to the actual one at completion.
    warehouse: Option<WarehouseId>,
    notes: String,
    invoice_number: Option<String>,

    approved: Option<Stamp>,
    rejected: Option<Stamp>,
    first_received: Option<Stamp>,
    completed: Option<Stamp>,
    cancelled: Option<Stamp>,
    reason: Option<String>,

    lines: Vec<LineItem>,
}

impl ProcurementRequest {
    pub fn new(id: RequestId, input: NewRequest, at: DateTime<Utc>) -> DomainResult<Self> {
        if input.lines.is_empty() {
            return Err(DomainError::validation(
                "a procurement request needs at least one line item",
            ));
        }

        let lines = input
            .lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| LineItem::new(LineItemId::new(i as u64 + 1), line))
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(Self {
            id,
            status: ProcurementStatus::Pending,
            requester: input.requester,
            requested_at: at,
            warehouse: input.warehouse,
            notes: input.notes,
            invoice_number: None,
            approved: None,
            rejected: None,
            first_received: None,
            completed: None,
            cancelled: None,
            reason: None,
            lines,
        })
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn warehouse(&self) -> Option<WarehouseId> {
        self.warehouse
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn invoice_number(&self) -> Option<&str> {
        self.invoice_number.as_deref()
    }

    pub fn approved(&self) -> Option<Stamp> {
        self.approved
    }

    pub fn rejected(&self) -> Option<Stamp> {
        self.rejected
    }

    pub fn first_received(&self) -> Option<Stamp> {
        self.first_received
    }

    pub fn completed(&self) -> Option<Stamp> {
        self.completed
    }

    pub fn cancelled(&self) -> Option<Stamp> {
        self.cancelled
    }

    /// Rejection or cancellation reason.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn line(&self, id: LineItemId) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.id() == id)
    }

    pub(crate) fn line_mut(&mut self, id: LineItemId) -> Option<&mut LineItem> {
        self.lines.iter_mut().find(|l| l.id() == id)
    }

    pub fn total_requested(&self) -> u64 {
        self.lines.iter().map(LineItem::requested_quantity).sum()
    }

    pub fn total_received(&self) -> u64 {
        self.lines.iter().map(LineItem::received_quantity).sum()
    }

    pub fn approve(&mut self, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(ProcurementAction::Approve) {
            return rejection.into();
        }
        self.approved = Some(stamp);
        Outcome::applied(format!("Procurement request #{} approved", self.id))
    }

    pub fn reject(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(ProcurementAction::Reject) {
            return rejection.into();
        }
        self.rejected = Some(stamp);
        self.reason = reason.filter(|r| !r.trim().is_empty());
        Outcome::applied(format!("Procurement request #{} rejected", self.id))
    }

    /// Withdraw a request before any goods arrived.
    pub fn cancel(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(ProcurementAction::Cancel) {
            return rejection.into();
        }
        self.cancelled = Some(stamp);
        self.reason = reason.filter(|r| !r.trim().is_empty());
        Outcome::applied(format!("Procurement request #{} cancelled", self.id))
    }

    /// Resolve a "pending new item" placeholder to a catalog item.
    pub fn bind_item(&mut self, line: LineItemId, item: CatalogItemId) -> Outcome {
        if self.status.is_terminal() {
            return Outcome::rejected(format!(
                "cannot change line items of a {} request",
                self.status
            ));
        }
        let id = self.id;
        let Some(target) = self.line_mut(line) else {
            return Outcome::rejected(format!("line {line} not found on request #{id}"));
        };
        if let Some(existing) = target.item().catalog_item() {
            return Outcome::rejected(format!(
                "line {line} is already bound to catalog item {existing}"
            ));
        }
        target.bind(item);
        Outcome::applied(format!("line {line} bound to catalog item {item}"))
    }

    pub(crate) fn fix_invoice(&mut self, invoice: &str) {
        if self.invoice_number.is_none() {
            self.invoice_number = Some(invoice.to_string());
        }
    }

    pub(crate) fn mark_received(&mut self, stamp: Stamp) -> DomainResult<()> {
        self.advance(ProcurementAction::Receive)
            .map_err(|r| DomainError::invariant(r.reason().to_string()))?;
        if self.first_received.is_none() {
            self.first_received = Some(stamp);
        }
        Ok(())
    }

    pub(crate) fn mark_completed(&mut self, warehouse: WarehouseId, stamp: Stamp) -> DomainResult<()> {
        self.advance(ProcurementAction::Complete)
            .map_err(|r| DomainError::invariant(r.reason().to_string()))?;
        self.warehouse = Some(warehouse);
        self.completed = Some(stamp);
        Ok(())
    }
}

impl Entity for ProcurementRequest {
    type Id = RequestId;

    fn id(&self) -> RequestId {
        self.id
    }
}

impl Workflow for ProcurementRequest {
    type Status = ProcurementStatus;
    type Action = ProcurementAction;

    const ACTIONS: &'static [ProcurementAction] = &[
        ProcurementAction::Approve,
        ProcurementAction::Reject,
        ProcurementAction::Receive,
        ProcurementAction::Complete,
        ProcurementAction::Cancel,
    ];

    fn status(&self) -> ProcurementStatus {
        self.status
    }

    fn set_status(&mut self, status: ProcurementStatus) {
        self.status = status;
    }

    fn rule(action: ProcurementAction) -> Rule<ProcurementStatus> {
        use ProcurementStatus::*;
        match action {
            ProcurementAction::Approve => Rule {
                from: &[Pending],
                to: Approved,
                rejection: "only pending requests can be approved",
            },
            ProcurementAction::Reject => Rule {
                from: &[Pending],
                to: Rejected,
                rejection: "only pending requests can be rejected",
            },
            ProcurementAction::Receive => Rule {
                from: &[Approved, Received],
                to: Received,
                rejection: "goods can only be received for approved requests",
            },
            ProcurementAction::Complete => Rule {
                from: &[Received],
                to: Completed,
                rejection: "only received requests can be completed",
            },
            ProcurementAction::Cancel => Rule {
                from: &[Pending, Approved],
                to: Cancelled,
                rejection: "only pending or approved requests can be cancelled",
            },
        }
    }
}
