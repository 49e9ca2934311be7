//! Per-warehouse stock ledger and its append-only movement log.
//!
//! The ledger row for `(item, warehouse)` is only ever changed through
//! [`StockLedger::add`] / [`StockLedger::remove`], each of which appends one
//! [`StockMovement`]. The row quantity therefore always equals the algebraic
//! sum of its movements; [`StockLedger::verify`] checks it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use assetflow_core::{WarehouseId, define_id};

use crate::catalog::CatalogItemId;

define_id!(
    /// Position of a movement in the append-only log.
    MovementId,
    "MovementId"
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MovementKind::In => f.write_str("IN"),
            MovementKind::Out => f.write_str("OUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub item: CatalogItemId,
    pub warehouse: WarehouseId,
    pub kind: MovementKind,
    pub quantity: u64,
    pub note: String,
    pub at: DateTime<Utc>,
}

impl StockMovement {
    fn signed(&self) -> i128 {
        match self.kind {
            MovementKind::In => i128::from(self.quantity),
            MovementKind::Out => -i128::from(self.quantity),
        }
    }
}

/// Current on-hand quantity of one `(item, warehouse)` row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub item: CatalogItemId,
    pub warehouse: WarehouseId,
    pub quantity: u64,
}

impl StockLevel {
    /// Strictly below the threshold counts as low.
    pub fn is_low(&self, threshold: u64) -> bool {
        self.quantity < threshold
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("stock movements must move a positive quantity")]
    ZeroQuantity,

    #[error(
        "insufficient stock for item {item} in warehouse {warehouse}: on hand {on_hand}, requested {requested}"
    )]
    InsufficientStock {
        item: CatalogItemId,
        warehouse: WarehouseId,
        on_hand: u64,
        requested: u64,
    },

    #[error("stock quantity overflow for item {item} in warehouse {warehouse}")]
    Overflow {
        item: CatalogItemId,
        warehouse: WarehouseId,
    },

    #[error(
        "ledger for item {item} in warehouse {warehouse} diverged from its movements: ledger {ledger}, movements {movements}"
    )]
    Diverged {
        item: CatalogItemId,
        warehouse: WarehouseId,
        ledger: u64,
        movements: i128,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockLedger {
    rows: BTreeMap<(CatalogItemId, WarehouseId), u64>,
    movements: Vec<StockMovement>,
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// On-hand quantity; unknown rows read as zero.
    pub fn quantity(&self, item: CatalogItemId, warehouse: WarehouseId) -> u64 {
        self.rows.get(&(item, warehouse)).copied().unwrap_or(0)
    }

    pub fn total_for_item(&self, item: CatalogItemId) -> u64 {
        self.rows
            .range((item, WarehouseId::new(0))..=(item, WarehouseId::new(u64::MAX)))
            .map(|(_, q)| *q)
            .sum()
    }

    pub fn levels(&self) -> impl Iterator<Item = StockLevel> + '_ {
        self.rows
            .iter()
            .map(|(&(item, warehouse), &quantity)| StockLevel {
                item,
                warehouse,
                quantity,
            })
    }

    /// Rows strictly below `threshold`, ordered by item then warehouse.
    pub fn low_stock(&self, threshold: u64) -> Vec<StockLevel> {
        self.levels().filter(|l| l.is_low(threshold)).collect()
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn movements_for(
        &self,
        item: CatalogItemId,
        warehouse: WarehouseId,
    ) -> impl Iterator<Item = &StockMovement> {
        self.movements
            .iter()
            .filter(move |m| m.item == item && m.warehouse == warehouse)
    }

    /// Increase stock and append an `IN` movement.
    pub fn add(
        &mut self,
        item: CatalogItemId,
        warehouse: WarehouseId,
        quantity: u64,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<&StockMovement, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::ZeroQuantity);
        }
        let current = self.quantity(item, warehouse);
        let next = current
            .checked_add(quantity)
            .ok_or(LedgerError::Overflow { item, warehouse })?;

        self.rows.insert((item, warehouse), next);
        Ok(self.append(item, warehouse, MovementKind::In, quantity, note.into(), at))
    }

    /// Decrease stock and append an `OUT` movement. Never goes below zero.
    pub fn remove(
        &mut self,
        item: CatalogItemId,
        warehouse: WarehouseId,
        quantity: u64,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<&StockMovement, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::ZeroQuantity);
        }
        let on_hand = self.quantity(item, warehouse);
        let next = on_hand
            .checked_sub(quantity)
            .ok_or(LedgerError::InsufficientStock {
                item,
                warehouse,
                on_hand,
                requested: quantity,
            })?;

        self.rows.insert((item, warehouse), next);
        Ok(self.append(item, warehouse, MovementKind::Out, quantity, note.into(), at))
    }

    /// Check that every row equals the sum of its movements.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let mut sums: BTreeMap<(CatalogItemId, WarehouseId), i128> = BTreeMap::new();
        for m in &self.movements {
            *sums.entry((m.item, m.warehouse)).or_default() += m.signed();
        }

        for (&(item, warehouse), &ledger) in &self.rows {
            let movements = sums.remove(&(item, warehouse)).unwrap_or(0);
            if i128::from(ledger) != movements {
                return Err(LedgerError::Diverged {
                    item,
                    warehouse,
                    ledger,
                    movements,
                });
            }
        }

        // Movements for a row that does not exist.
        if let Some((&(item, warehouse), &movements)) = sums.iter().find(|(_, s)| **s != 0) {
            return Err(LedgerError::Diverged {
                item,
                warehouse,
                ledger: 0,
                movements,
            });
        }

        Ok(())
    }

    fn append(
        &mut self,
        item: CatalogItemId,
        warehouse: WarehouseId,
        kind: MovementKind,
        quantity: u64,
        note: String,
        at: DateTime<Utc>,
    ) -> &StockMovement {
        let id = MovementId::new(self.movements.len() as u64 + 1);
        self.movements.push(StockMovement {
            id,
            item,
            warehouse,
            kind,
            quantity,
            note,
            at,
        });
        &self.movements[self.movements.len() - 1]
    }
}
