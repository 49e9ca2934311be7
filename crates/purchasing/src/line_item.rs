use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{Actor, DomainError, DomainResult, define_id};
use assetflow_inventory::{CatalogItemId, NewItemDescriptor};

define_id!(
    /// Line number inside its request (1-based).
    LineItemId,
    "LineItemId"
);

/// What a line asks for: a catalog item, or a not-yet-registered one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRef {
    Catalog(CatalogItemId),
    Pending(NewItemDescriptor),
}

impl ItemRef {
    pub fn catalog_item(&self) -> Option<CatalogItemId> {
        match self {
            ItemRef::Catalog(id) => Some(*id),
            ItemRef::Pending(_) => None,
        }
    }
}

/// Input for one line of a new request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLine {
    pub item: ItemRef,
    pub requested_quantity: u64,
}

/// One partial delivery folded into a line. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub invoice_number: String,
    pub quantity: u64,
    pub serial_numbers: Vec<String>,
    /// Generated serial-unit codes, one per unit.
    pub serial_units: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub received_by: Actor,
    /// Line total after this delivery.
    pub cumulative_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    id: LineItemId,
    item: ItemRef,
    requested_quantity: u64,
    received_quantity: u64,
    serial_numbers: Vec<String>,
    delivery_history: Vec<DeliveryRecord>,
}

impl LineItem {
    pub(crate) fn new(id: LineItemId, line: NewLine) -> DomainResult<Self> {
        if line.requested_quantity == 0 {
            return Err(DomainError::validation(format!(
                "line {id}: requested quantity must be positive"
            )));
        }
        Ok(Self {
            id,
            item: line.item,
            requested_quantity: line.requested_quantity,
            received_quantity: 0,
            serial_numbers: Vec::new(),
            delivery_history: Vec::new(),
        })
    }

    pub fn id(&self) -> LineItemId {
        self.id
    }

    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    pub fn requested_quantity(&self) -> u64 {
        self.requested_quantity
    }

    pub fn received_quantity(&self) -> u64 {
        self.received_quantity
    }

    pub fn remaining(&self) -> u64 {
        self.requested_quantity - self.received_quantity
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity == self.requested_quantity
    }

    /// Serial numbers received so far, in arrival order.
    pub fn serial_numbers(&self) -> &[String] {
        &self.serial_numbers
    }

    pub fn delivery_history(&self) -> &[DeliveryRecord] {
        &self.delivery_history
    }

    pub fn serial_units(&self) -> impl Iterator<Item = &str> {
        self.delivery_history
            .iter()
            .flat_map(|d| d.serial_units.iter().map(String::as_str))
    }

    /// `received == Σ history` and `received <= requested`.
    pub fn check_conservation(&self) -> DomainResult<()> {
        let history: u64 = self.delivery_history.iter().map(|d| d.quantity).sum();
        if history != self.received_quantity {
            return Err(DomainError::invariant(format!(
                "line {}: received quantity {} disagrees with delivery history total {history}",
                self.id, self.received_quantity
            )));
        }
        if self.received_quantity > self.requested_quantity {
            return Err(DomainError::invariant(format!(
                "line {}: received {} exceeds requested {}",
                self.id, self.received_quantity, self.requested_quantity
            )));
        }
        Ok(())
    }

    pub(crate) fn bind(&mut self, item: CatalogItemId) {
        self.item = ItemRef::Catalog(item);
    }

    /// Fold a validated delivery into the line. Callers have already checked
    /// for overshoot.
    pub(crate) fn record_delivery(
        &mut self,
        invoice_number: &str,
        serial_numbers: Vec<String>,
        serial_units: Vec<String>,
        received_by: Actor,
        received_at: DateTime<Utc>,
    ) -> &DeliveryRecord {
        let quantity = serial_units.len() as u64;
        self.received_quantity += quantity;
        self.serial_numbers.extend(serial_numbers.iter().cloned());
        self.delivery_history.push(DeliveryRecord {
            invoice_number: invoice_number.to_string(),
            quantity,
            serial_numbers,
            serial_units,
            received_at,
            received_by,
            cumulative_total: self.received_quantity,
        });
        &self.delivery_history[self.delivery_history.len() - 1]
    }
}
