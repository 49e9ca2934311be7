//! Receiving and reconciliation of partial deliveries.
//!
//! A delivery carries one entry per line item. Each entry is its own unit of
//! work: it is fully validated, its units are registered all-or-nothing, and
//! only then is it folded into the line. Other entries of the same delivery
//! are unaffected by a rejected one.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use assetflow_core::{Entity, Outcome, Stamp, Workflow};
use assetflow_inventory::{Catalog, InstanceRegistry, NewInstance, RegistryError, SerialUnitSequence};

use crate::line_item::{ItemRef, LineItemId};
use crate::request::{ProcurementAction, ProcurementRequest, ProcurementStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelivery {
    pub line: LineItemId,
    pub quantity: u64,
    /// Optional manufacturer serials; if given, exactly one per unit.
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

/// One shipment received against a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Leading and trailing whitespace is dropped before the invoice is
    /// fixed or compared; the rest must match exactly, case included.
    pub invoice_number: String,
    pub lines: Vec<LineDelivery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line: LineItemId,
    pub outcome: Outcome,
}

/// Aggregated result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptReport {
    /// Applied when at least one line entry was accepted.
    pub outcome: Outcome,
    pub lines: Vec<LineReceipt>,
}

impl ReceiptReport {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::rejected(reason),
            lines: Vec::new(),
        }
    }

    pub fn accepted(&self) -> usize {
        self.lines.iter().filter(|l| l.outcome.is_applied()).count()
    }

    /// Per-line messages in delivery order.
    pub fn messages(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.outcome.message()).collect()
    }
}

/// Fold one delivery into `request`.
///
/// The invoice number is fixed by the first accepted delivery; any later
/// delivery must repeat it. The request moves to `received` on the first
/// accepted entry.
pub fn receive_delivery(
    request: &mut ProcurementRequest,
    delivery: &Delivery,
    catalog: &Catalog,
    registry: &mut InstanceRegistry,
    sequence: &mut SerialUnitSequence,
    stamp: Stamp,
) -> ReceiptReport {
    if let Err(rejection) = request.guard(ProcurementAction::Receive) {
        return ReceiptReport::rejected(rejection.reason());
    }

    let invoice = delivery.invoice_number.trim();
    if invoice.is_empty() {
        return ReceiptReport::rejected("an invoice number is required");
    }
    if let Some(fixed) = request.invoice_number() {
        if fixed != invoice {
            return ReceiptReport::rejected(format!(
                "invoice number mismatch: request #{} is bound to invoice {fixed}, got {invoice}",
                request.id()
            ));
        }
    }
    if delivery.lines.is_empty() {
        return ReceiptReport::rejected("the delivery contains no line items");
    }

    let lines: Vec<LineReceipt> = delivery
        .lines
        .iter()
        .map(|entry| LineReceipt {
            line: entry.line,
            outcome: receive_line(request, entry, invoice, catalog, registry, sequence, stamp),
        })
        .collect();

    let accepted = lines.iter().filter(|l| l.outcome.is_applied()).count();
    if accepted == 0 {
        let reasons: Vec<&str> = lines.iter().map(|l| l.outcome.message()).collect();
        return ReceiptReport {
            outcome: Outcome::rejected(reasons.join("; ")),
            lines,
        };
    }

    request.fix_invoice(invoice);
    let was_approved = request.status() == ProcurementStatus::Approved;
    if let Err(err) = request.mark_received(stamp) {
        return ReceiptReport {
            outcome: Outcome::rejected(err.to_string()),
            lines,
        };
    }

    let mut summary = format!(
        "received {accepted} of {} line deliveries under invoice {invoice}; {} of {} units received",
        lines.len(),
        request.total_received(),
        request.total_requested()
    );
    if was_approved {
        summary.push_str("; request marked received");
    }
    ReceiptReport {
        outcome: Outcome::applied(summary),
        lines,
    }
}

fn receive_line(
    request: &mut ProcurementRequest,
    entry: &LineDelivery,
    invoice: &str,
    catalog: &Catalog,
    registry: &mut InstanceRegistry,
    sequence: &mut SerialUnitSequence,
    stamp: Stamp,
) -> Outcome {
    let request_id = request.id();
    let Some(line) = request.line_mut(entry.line) else {
        return Outcome::rejected(format!("line {}: not found on this request", entry.line));
    };
    let id = line.id();

    if entry.quantity == 0 {
        return Outcome::rejected(format!("line {id}: delivered quantity must be positive"));
    }
    if entry.quantity > line.remaining() {
        return Outcome::rejected(format!(
            "line {id}: cannot receive {} units; {} of {} already received, {} remaining",
            entry.quantity,
            line.received_quantity(),
            line.requested_quantity(),
            line.remaining()
        ));
    }

    let serials: Vec<String> = entry
        .serial_numbers
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let catalog_item = line.item().catalog_item();
    let requires_serial = match line.item() {
        ItemRef::Catalog(item) => catalog.get(*item).is_some_and(|i| i.requires_serial()),
        ItemRef::Pending(descriptor) => descriptor.requires_serial,
    };

    if serials.is_empty() && requires_serial {
        return Outcome::rejected(format!(
            "line {id}: serial numbers are required for this item ({} expected)",
            entry.quantity
        ));
    }
    if !serials.is_empty() && serials.len() as u64 != entry.quantity {
        return Outcome::rejected(format!(
            "line {id}: {} serial numbers supplied for {} units",
            serials.len(),
            entry.quantity
        ));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = serials.iter().find(|s| !seen.insert(s.as_str())) {
        return Outcome::rejected(format!(
            "line {id}: serial number {dup} appears more than once in this delivery"
        ));
    }

    // Draw codes from a copy; the shared sequence only advances on success.
    let mut draft = sequence.clone();
    let units = draft.take(entry.quantity as usize, stamp.at);

    let batch: Vec<NewInstance> = units
        .iter()
        .enumerate()
        .map(|(i, unit)| NewInstance {
            serial_number: serials.get(i).cloned(),
            serial_unit: unit.clone(),
            catalog_item,
        })
        .collect();

    let note = format!("received on request #{} invoice {invoice}", request_id);
    if let Err(err) = registry.register_batch(batch, stamp, &note) {
        return match err {
            RegistryError::DuplicateSerial(serial) => Outcome::rejected(format!(
                "line {id}: serial number {serial} already exists; line delivery rejected"
            )),
            RegistryError::DuplicateSerialUnit(code) => Outcome::rejected(format!(
                "line {id}: serial unit {code} already exists; line delivery rejected"
            )),
            other => Outcome::rejected(format!("line {id}: {other}")),
        };
    }
    *sequence = draft;

    let received = line
        .record_delivery(invoice, serials, units, stamp.actor, stamp.at)
        .cumulative_total;
    Outcome::applied(format!(
        "line {id}: received {} units ({received} of {} received, {} remaining)",
        entry.quantity,
        line.requested_quantity(),
        line.remaining()
    ))
}
