//! Return batches: units coming back from organisational units to a warehouse.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    Cascade, DomainError, DomainResult, Entity, Outcome, Rule, Stamp, UnitId, UserId,
    WarehouseId, Workflow, WorkflowStatus, define_id,
};
use assetflow_inventory::{InstanceId, InstanceRegistry, ItemStatus, Location, RegistryError};

define_id!(ReturnBatchId, "ReturnBatchId");
define_id!(ReturnItemId, "ReturnItemId");

/// Condition assessment recorded when a unit comes back.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Good,
    Damaged,
    Broken,
    MissingParts,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnItemStatus {
    Pending,
    Returned,
    Cancelled,
}

impl core::fmt::Display for ReturnItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReturnItemStatus::Pending => "pending",
            ReturnItemStatus::Returned => "returned",
            ReturnItemStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for ReturnItemStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, ReturnItemStatus::Pending)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnItemAction {
    Return,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub id: ReturnItemId,
    pub instance: InstanceId,
    pub unit: UnitId,
    pub reason: Option<String>,
    pub condition: Condition,
    pub condition_notes: Option<String>,
    status: ReturnItemStatus,
}

impl ReturnItem {
    /// Receive the unit back into `warehouse`.
    fn receive(
        &mut self,
        warehouse: WarehouseId,
        stamp: Stamp,
        note: &str,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.advance(ReturnItemAction::Return) {
            return Ok(rejection.into());
        }
        registry.update(self.instance, stamp, note, |unit| {
            unit.set_status(ItemStatus::Returned);
            unit.relocate(Location::Warehouse { warehouse });
        })?;
        Ok(Outcome::applied(format!("item {} returned", self.id)))
    }
}

impl Workflow for ReturnItem {
    type Status = ReturnItemStatus;
    type Action = ReturnItemAction;

    const ACTIONS: &'static [ReturnItemAction] = &[ReturnItemAction::Return, ReturnItemAction::Cancel];

    fn status(&self) -> ReturnItemStatus {
        self.status
    }

    fn set_status(&mut self, status: ReturnItemStatus) {
        self.status = status;
    }

    fn rule(action: ReturnItemAction) -> Rule<ReturnItemStatus> {
        match action {
            ReturnItemAction::Return => Rule {
                from: &[ReturnItemStatus::Pending],
                to: ReturnItemStatus::Returned,
                rejection: "only pending return items can be received",
            },
            ReturnItemAction::Cancel => Rule {
                from: &[ReturnItemStatus::Pending],
                to: ReturnItemStatus::Cancelled,
                rejection: "only pending return items can be cancelled",
            },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnBatchStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl core::fmt::Display for ReturnBatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReturnBatchStatus::Pending => "pending",
            ReturnBatchStatus::Confirmed => "confirmed",
            ReturnBatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for ReturnBatchStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, ReturnBatchStatus::Pending)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnBatchAction {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReturnItem {
    pub instance: InstanceId,
    pub unit: UnitId,
    pub reason: Option<String>,
    pub condition: Condition,
    pub condition_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReturnBatch {
    pub warehouse: WarehouseId,
    pub return_date: NaiveDate,
    pub created_by: UserId,
    pub notes: String,
    pub items: Vec<NewReturnItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnBatch {
    id: ReturnBatchId,
    batch_code: String,
    warehouse: WarehouseId,
    return_date: NaiveDate,
    created_by: UserId,
    created_at: DateTime<Utc>,
    notes: String,
    status: ReturnBatchStatus,
    items: Vec<ReturnItem>,
    confirmed: Option<Stamp>,
    cancelled: Option<Stamp>,
}

impl ReturnBatch {
    /// `RET-WH{warehouse:03}-{YYMMDD}-{seq:03}`; `seq` continues after the
    /// highest code already issued for that warehouse and day.
    pub fn next_code<'a>(
        warehouse: WarehouseId,
        day: NaiveDate,
        existing: impl IntoIterator<Item = &'a str>,
    ) -> String {
        let prefix = format!("RET-WH{:03}-{}", warehouse.get(), day.format("%y%m%d"));
        let last = existing
            .into_iter()
            .filter_map(|code| code.strip_prefix(&prefix)?.strip_prefix('-')?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}-{:03}", last + 1)
    }

    pub fn new(
        id: ReturnBatchId,
        batch_code: String,
        input: NewReturnBatch,
        registry: &InstanceRegistry,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::validation("a return batch needs at least one item"));
        }

        let mut items = Vec::with_capacity(input.items.len());
        for (i, item) in input.items.into_iter().enumerate() {
            if items.iter().any(|r: &ReturnItem| r.instance == item.instance) {
                return Err(DomainError::validation(format!(
                    "item instance {} listed twice",
                    item.instance
                )));
            }
            if registry.get(item.instance).is_none() {
                return Err(DomainError::not_found(format!("item instance {}", item.instance)));
            }
            items.push(ReturnItem {
                id: ReturnItemId::new(i as u64 + 1),
                instance: item.instance,
                unit: item.unit,
                reason: item.reason,
                condition: item.condition,
                condition_notes: item.condition_notes,
                status: ReturnItemStatus::Pending,
            });
        }

        Ok(Self {
            id,
            batch_code,
            warehouse: input.warehouse,
            return_date: input.return_date,
            created_by: input.created_by,
            created_at: at,
            notes: input.notes,
            status: ReturnBatchStatus::Pending,
            items,
            confirmed: None,
            cancelled: None,
        })
    }

    pub fn batch_code(&self) -> &str {
        &self.batch_code
    }

    pub fn warehouse(&self) -> WarehouseId {
        self.warehouse
    }

    pub fn return_date(&self) -> NaiveDate {
        self.return_date
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn items(&self) -> &[ReturnItem] {
        &self.items
    }

    pub fn confirmed(&self) -> Option<Stamp> {
        self.confirmed
    }

    pub fn cancelled(&self) -> Option<Stamp> {
        self.cancelled
    }

    /// Every pending item comes back as `returned` into the batch warehouse.
    pub fn confirm(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(ReturnBatchAction::Confirm) {
            return Ok(rejection.into());
        }

        let warehouse = self.warehouse;
        let note = format!("returned with batch {}", self.batch_code);
        let mut failure = None;
        let report = self.cascade(ReturnBatchAction::Confirm, |item, _| {
            item.receive(warehouse, stamp, &note, registry).unwrap_or_else(|e| {
                let outcome = Outcome::rejected(e.to_string());
                failure.get_or_insert(e);
                outcome
            })
        });
        if let Some(err) = failure {
            return Err(err);
        }

        self.status = ReturnBatchStatus::Confirmed;
        self.confirmed = Some(stamp);
        Ok(Outcome::applied(format!(
            "Return batch {} confirmed: {} items returned",
            self.batch_code, report.applied
        )))
    }

    pub fn cancel(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.guard(ReturnBatchAction::Cancel) {
            return rejection.into();
        }

        let report = self.cascade(ReturnBatchAction::Cancel, |item, action| {
            match item.advance(action) {
                Ok(_) => Outcome::applied(format!("item {} cancelled", item.id)),
                Err(rejection) => rejection.into(),
            }
        });

        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            if !self.notes.is_empty() {
                self.notes.push_str("\n\n");
            }
            self.notes.push_str(&format!("Cancelled: {reason}"));
        }
        self.status = ReturnBatchStatus::Cancelled;
        self.cancelled = Some(stamp);
        Outcome::applied(format!(
            "Return batch {} cancelled ({} items)",
            self.batch_code, report.applied
        ))
    }
}

impl Entity for ReturnBatch {
    type Id = ReturnBatchId;

    fn id(&self) -> ReturnBatchId {
        self.id
    }
}

impl Workflow for ReturnBatch {
    type Status = ReturnBatchStatus;
    type Action = ReturnBatchAction;

    const ACTIONS: &'static [ReturnBatchAction] =
        &[ReturnBatchAction::Confirm, ReturnBatchAction::Cancel];

    fn status(&self) -> ReturnBatchStatus {
        self.status
    }

    fn set_status(&mut self, status: ReturnBatchStatus) {
        self.status = status;
    }

    fn rule(action: ReturnBatchAction) -> Rule<ReturnBatchStatus> {
        match action {
            ReturnBatchAction::Confirm => Rule {
                from: &[ReturnBatchStatus::Pending],
                to: ReturnBatchStatus::Confirmed,
                rejection: "only pending return batches can be confirmed",
            },
            ReturnBatchAction::Cancel => Rule {
                from: &[ReturnBatchStatus::Pending],
                to: ReturnBatchStatus::Cancelled,
                rejection: "only pending return batches can be cancelled",
            },
        }
    }
}

impl Cascade for ReturnBatch {
    type Child = ReturnItem;

    fn children_mut(&mut self) -> &mut [ReturnItem] {
        &mut self.items
    }

    fn child_action(action: ReturnBatchAction, _item: &ReturnItem) -> Option<ReturnItemAction> {
        match action {
            ReturnBatchAction::Confirm => Some(ReturnItemAction::Return),
            ReturnBatchAction::Cancel => Some(ReturnItemAction::Cancel),
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
        Utc.with_ymd_and_hms(2024, 7, 15, 13, 0, 0).unwrap()
    }

    fn stamp() -> Stamp {
        Stamp::new(UserId::new(), test_time())
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn setup(n: usize) -> (InstanceRegistry, ReturnBatch) {
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
        for id in &ids {
            registry
                .update(*id, stamp(), "installed", |unit| {
                    unit.set_status(ItemStatus::InUse);
                    unit.relocate(Location::Unit {
                        unit: UnitId::new(8),
                        room: None,
                    });
                })
                .unwrap();
        }
        let batch = ReturnBatch::new(
            ReturnBatchId::new(1),
            ReturnBatch::next_code(WarehouseId::new(2), day(), []),
            NewReturnBatch {
                warehouse: WarehouseId::new(2),
                return_date: day(),
                created_by: UserId::new(),
                notes: "end of semester".into(),
                items: ids
                    .iter()
                    .map(|id| NewReturnItem {
                        instance: *id,
                        unit: UnitId::new(8),
                        reason: None,
                        condition: Condition::Good,
                        condition_notes: None,
                    })
                    .collect(),
            },
            &registry,
            test_time(),
        )
        .unwrap();
        (registry, batch)
    }

    #[test]
    fn transition_tables_are_dags() {
        assert!(ensure_acyclic::<ReturnBatch>().is_ok());
        assert!(ensure_acyclic::<ReturnItem>().is_ok());
    }

    #[test]
    fn codes_continue_per_warehouse_and_day() {
        let existing = ["RET-WH002-240715-001", "RET-WH002-240715-004", "RET-WH003-240715-009"];
        assert_eq!(
            ReturnBatch::next_code(WarehouseId::new(2), day(), existing),
            "RET-WH002-240715-005"
        );
        assert_eq!(
            ReturnBatch::next_code(WarehouseId::new(7), day(), existing),
            "RET-WH007-240715-001"
        );
    }

    #[test]
    fn confirm_returns_units_to_the_warehouse() {
        let (mut registry, mut batch) = setup(3);
        let outcome = batch.confirm(stamp(), &mut registry).unwrap();

        assert!(outcome.message().contains("3 items returned"));
        assert!(batch.items().iter().all(|i| i.status() == ReturnItemStatus::Returned));
        for unit in registry.iter() {
            assert_eq!(unit.status(), ItemStatus::Returned);
            assert_eq!(unit.location().and_then(|l| l.warehouse()), Some(WarehouseId::new(2)));
        }
        assert!(batch.cancel(stamp(), None).is_rejected());
    }

    #[test]
    fn cancel_cascades_and_appends_reason() {
        let (registry, mut batch) = setup(2);
        let outcome = batch.cancel(stamp(), Some("wrong warehouse".into()));

        assert!(outcome.is_applied());
        assert_eq!(batch.status(), ReturnBatchStatus::Cancelled);
        assert!(batch.items().iter().all(|i| i.status() == ReturnItemStatus::Cancelled));
        assert_eq!(batch.notes(), "end of semester\n\nCancelled: wrong warehouse");
        assert!(registry.iter().all(|u| u.status() == ItemStatus::InUse));
    }

    #[test]
    fn condition_serializes_snake_case() {
        let json = serde_json::to_string(&Condition::MissingParts).unwrap();
        assert_eq!(json, "\"missing_parts\"");
    }
}
