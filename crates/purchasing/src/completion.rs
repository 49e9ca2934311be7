//! Completion: materialise received units into warehouse stock.
//!
//! Callers run this inside one store transaction. A `CompletionError` means
//! bookkeeping is inconsistent and everything done so far must be rolled back.
//! Units found in another location are anomalies, not errors: they are
//! reported and left untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use assetflow_core::{DomainError, Entity, Outcome, Stamp, WarehouseId, Workflow};
use assetflow_inventory::{
    Binding, CatalogItemId, InstanceId, InstanceRegistry, LedgerError, Location, RegistryError,
    StockLedger,
};

use crate::line_item::ItemRef;
use crate::request::{ProcurementAction, ProcurementRequest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error(transparent)]
    Integrity(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A unit left alone because it already sits elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub instance: InstanceId,
    pub serial_unit: String,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub warehouse: Option<WarehouseId>,
    pub bound: usize,
    pub already_bound: usize,
    pub skipped: Vec<SkippedUnit>,
    /// Quantity added to the ledger per catalog item.
    pub stock_added: Vec<(CatalogItemId, u64)>,
}

impl CompletionReport {
    pub fn message(&self, request: impl core::fmt::Display) -> String {
        let total: u64 = self.stock_added.iter().map(|(_, q)| *q).sum();
        let mut msg = format!(
            "Procurement request #{request} completed: {total} units added to stock; {} units placed, {} already placed",
            self.bound, self.already_bound
        );
        if !self.skipped.is_empty() {
            let codes: Vec<&str> = self.skipped.iter().map(|s| s.serial_unit.as_str()).collect();
            msg.push_str(&format!(
                "; {} units skipped (located elsewhere): {}",
                self.skipped.len(),
                codes.join(", ")
            ));
        }
        msg
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Completed(CompletionReport),
    Rejected(String),
}

impl Completion {
    pub fn into_outcome(self, request: impl core::fmt::Display) -> Outcome {
        match self {
            Completion::Completed(report) => Outcome::applied(report.message(request)),
            Completion::Rejected(reason) => Outcome::rejected(reason),
        }
    }
}

/// Complete a fully received request into `warehouse`.
pub fn complete(
    request: &mut ProcurementRequest,
    warehouse: WarehouseId,
    registry: &mut InstanceRegistry,
    ledger: &mut StockLedger,
    stamp: Stamp,
) -> Result<Completion, CompletionError> {
    if let Err(rejection) = request.guard(ProcurementAction::Complete) {
        return Ok(Completion::Rejected(rejection.reason().to_string()));
    }

    for line in request.lines() {
        if !line.is_fully_received() {
            return Ok(Completion::Rejected(format!(
                "line {} is not fully received: {} of {} units",
                line.id(),
                line.received_quantity(),
                line.requested_quantity()
            )));
        }
        if let ItemRef::Pending(descriptor) = line.item() {
            return Ok(Completion::Rejected(format!(
                "line {} has no catalog item yet (pending new item '{}'); register it before completing",
                line.id(),
                descriptor.name
            )));
        }
    }

    let request_id = request.id();
    let mut report = CompletionReport {
        warehouse: Some(warehouse),
        ..CompletionReport::default()
    };

    for line in request.lines() {
        line.check_conservation()?;

        let Some(item) = line.item().catalog_item() else {
            return Err(DomainError::invariant(format!("line {} lost its catalog item", line.id())).into());
        };

        let units: Vec<&str> = line.serial_units().collect();
        if units.len() as u64 != line.received_quantity() {
            return Err(DomainError::invariant(format!(
                "line {}: {} serial units recorded for {} received units",
                line.id(),
                units.len(),
                line.received_quantity()
            ))
            .into());
        }

        for code in units {
            let Some(id) = registry.id_for_serial_unit(code) else {
                return Err(DomainError::invariant(format!(
                    "line {}: serial unit {code} is not registered",
                    line.id()
                ))
                .into());
            };
            let instance = registry.get(id).ok_or(RegistryError::UnknownInstance(id))?;

            if let Some(serial) = instance.serial_number() {
                if !line.serial_numbers().iter().any(|s| s == serial) {
                    return Err(DomainError::invariant(format!(
                        "line {}: unit {code} carries serial {serial} not recorded on the line",
                        line.id()
                    ))
                    .into());
                }
            }
            let binding = registry.update(
                id,
                stamp,
                format!("Procurement request #{request_id} completed into warehouse {warehouse}"),
                |unit| {
                    if unit.catalog_item().is_none() {
                        unit.assign_catalog_item(item);
                    }
                    unit.bind_warehouse(warehouse)
                },
            )?;

            match binding {
                Binding::Bound => report.bound += 1,
                Binding::AlreadyBound => report.already_bound += 1,
                Binding::Conflict(location) => report.skipped.push(SkippedUnit {
                    instance: id,
                    serial_unit: code.to_string(),
                    location,
                }),
            }
        }

        ledger.add(
            item,
            warehouse,
            line.received_quantity(),
            format!("Procurement request #{request_id} line {} completed", line.id()),
            stamp.at,
        )?;
        report.stock_added.push((item, line.received_quantity()));
    }

    request.mark_completed(warehouse, stamp)?;
    Ok(Completion::Completed(report))
}
